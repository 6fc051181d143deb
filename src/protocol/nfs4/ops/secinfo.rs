//! SECINFO and SECINFO_NO_NAME: advertise the security flavors accepted on
//! a name or handle. Both consume the current filehandle.
//!
//! With Kerberos disabled the advertisement is `[AUTH_SYS, AUTH_NONE]` in
//! that order; with it enabled the RPCSEC_GSS triple (privacy, integrity,
//! none) is prepended, each entry carrying the KRB5 mechanism OID.

use std::io::Read;

use crate::protocol::xdr::deserialize;
use crate::protocol::xdr::nfs4::dir::{
    SECINFO4args, SECINFO_NO_NAME4args, SECINFO_STYLE4_CURRENT_FH, SECINFO_STYLE4_PARENT,
};
use crate::protocol::xdr::nfs4::nfsstat4;
use crate::protocol::xdr::Serialize;
use crate::pseudo::{self, PseudoChild};
use crate::vfs::validate_name;

use super::super::CompoundContext;
use super::status_only;

/// The DER-encoded body of the Kerberos 5 GSS mechanism OID
/// 1.2.840.113554.1.2.2.
const KRB5_OID: [u8; 9] = [0x2a, 0x86, 0x48, 0x86, 0xf7, 0x12, 0x01, 0x02, 0x02];

const RPCSEC_GSS: u32 = 6;
const AUTH_NONE: u32 = 0;
const AUTH_SYS: u32 = 1;

const RPC_GSS_SVC_NONE: u32 = 1;
const RPC_GSS_SVC_INTEGRITY: u32 = 2;
const RPC_GSS_SVC_PRIVACY: u32 = 3;

pub async fn op_secinfo(
    ctx: &mut CompoundContext<'_>,
    input: &mut (impl Read + Send),
    body: &mut Vec<u8>,
) -> anyhow::Result<nfsstat4> {
    let args: SECINFO4args = deserialize(input)?;
    let Ok(dir_fh) = ctx.require_current_fh() else {
        return status_only(body, nfsstat4::NFS4ERR_NOFILEHANDLE);
    };
    if let Err(status) = validate_name(&args.name) {
        return status_only(body, status);
    }

    // The name must resolve, though the answer does not depend on it.
    if pseudo::is_pseudo_handle(&dir_fh) {
        let Some(node) = ctx.rpc.pseudo.node_by_handle(&dir_fh) else {
            return status_only(body, nfsstat4::NFS4ERR_BADHANDLE);
        };
        if !matches!(
            ctx.rpc.pseudo.lookup(node, &args.name),
            Some(PseudoChild::Node(_) | PseudoChild::Junction(_))
        ) {
            return status_only(body, nfsstat4::NFS4ERR_NOENT);
        }
    } else if let Err(e) = ctx.rpc.metadata.lookup(&ctx.auth(), &dir_fh, &args.name).await {
        return status_only(body, e.nfsstat());
    }

    // SECINFO consumes the current filehandle.
    ctx.current_fh = None;
    encode_flavors(body, ctx.rpc.advertise_krb5)?;
    Ok(nfsstat4::NFS4_OK)
}

pub async fn op_secinfo_no_name(
    ctx: &mut CompoundContext<'_>,
    input: &mut (impl Read + Send),
    body: &mut Vec<u8>,
) -> anyhow::Result<nfsstat4> {
    let args: SECINFO_NO_NAME4args = deserialize(input)?;
    let Ok(fh) = ctx.require_current_fh() else {
        return status_only(body, nfsstat4::NFS4ERR_NOFILEHANDLE);
    };
    match args.style {
        SECINFO_STYLE4_CURRENT_FH => {}
        SECINFO_STYLE4_PARENT => {
            // Resolving the parent proves it exists; the advertisement is
            // the same either way.
            if pseudo::is_pseudo_handle(&fh) {
                if ctx.rpc.pseudo.node_by_handle(&fh).is_none() {
                    return status_only(body, nfsstat4::NFS4ERR_BADHANDLE);
                }
            } else if let Err(e) = ctx.rpc.metadata.parent(&ctx.auth(), &fh).await {
                return status_only(body, e.nfsstat());
            }
        }
        _ => return status_only(body, nfsstat4::NFS4ERR_INVAL),
    }
    ctx.current_fh = None;
    encode_flavors(body, ctx.rpc.advertise_krb5)?;
    Ok(nfsstat4::NFS4_OK)
}

fn encode_flavors(body: &mut Vec<u8>, advertise_krb5: bool) -> std::io::Result<()> {
    nfsstat4::NFS4_OK.serialize(body)?;
    let count: u32 = if advertise_krb5 { 5 } else { 2 };
    count.serialize(body)?;
    if advertise_krb5 {
        for service in [RPC_GSS_SVC_PRIVACY, RPC_GSS_SVC_INTEGRITY, RPC_GSS_SVC_NONE] {
            RPCSEC_GSS.serialize(body)?;
            KRB5_OID.to_vec().serialize(body)?;
            0u32.serialize(body)?; // qop
            service.serialize(body)?;
        }
    }
    AUTH_SYS.serialize(body)?;
    AUTH_NONE.serialize(body)?;
    Ok(())
}
