//! ACCESS: reports which of the requested access rights the caller holds.
//! Pseudo directories are read-only for everyone; real objects delegate to
//! the metadata collaborator's permission check.

use std::io::Read;

use crate::protocol::xdr::deserialize;
use crate::protocol::xdr::nfs4::file::{
    ACCESS4_DELETE, ACCESS4_EXECUTE, ACCESS4_EXTEND, ACCESS4_LOOKUP, ACCESS4_MODIFY, ACCESS4_READ,
    ACCESS4args,
};
use crate::protocol::xdr::nfs4::nfsstat4;
use crate::protocol::xdr::Serialize;
use crate::pseudo;

use super::super::CompoundContext;
use super::status_only;

const ACCESS4_ALL: u32 = ACCESS4_READ
    | ACCESS4_LOOKUP
    | ACCESS4_MODIFY
    | ACCESS4_EXTEND
    | ACCESS4_DELETE
    | ACCESS4_EXECUTE;

pub async fn op_access(
    ctx: &mut CompoundContext<'_>,
    input: &mut (impl Read + Send),
    body: &mut Vec<u8>,
) -> anyhow::Result<nfsstat4> {
    let args: ACCESS4args = deserialize(input)?;
    let Ok(fh) = ctx.require_current_fh() else {
        return status_only(body, nfsstat4::NFS4ERR_NOFILEHANDLE);
    };

    let (supported, granted) = if pseudo::is_pseudo_handle(&fh) {
        let readonly = ACCESS4_READ | ACCESS4_LOOKUP;
        (readonly, readonly & args.access)
    } else {
        match ctx.rpc.metadata.check_permissions(&ctx.auth(), &fh, args.access).await {
            Ok(granted) => (ACCESS4_ALL & args.access, granted & args.access),
            Err(e) => return status_only(body, e.nfsstat()),
        }
    };
    nfsstat4::NFS4_OK.serialize(body)?;
    supported.serialize(body)?;
    granted.serialize(body)?;
    Ok(nfsstat4::NFS4_OK)
}
