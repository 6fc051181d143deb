//! Filehandle plumbing: PUTFH, PUTROOTFH, PUTPUBFH, GETFH, SAVEFH and
//! RESTOREFH thread the current and saved filehandles through the request
//! context. PUTPUBFH aliases PUTROOTFH.

use std::io::Read;

use tracing::debug;

use crate::protocol::xdr::nfs4::{nfs_fh4, nfsstat4};
use crate::protocol::xdr::{deserialize, Serialize};

use super::super::CompoundContext;
use super::status_only;

pub fn op_putfh(
    ctx: &mut CompoundContext<'_>,
    input: &mut (impl Read + Send),
    body: &mut Vec<u8>,
) -> anyhow::Result<nfsstat4> {
    let fh: nfs_fh4 = deserialize(input)?;
    if fh.data.is_empty() {
        return status_only(body, nfsstat4::NFS4ERR_BADHANDLE);
    }
    debug!("op_putfh({:?})", fh);
    ctx.current_fh = Some(fh.data);
    status_only(body, nfsstat4::NFS4_OK)
}

pub fn op_putrootfh(ctx: &mut CompoundContext<'_>, body: &mut Vec<u8>) -> anyhow::Result<nfsstat4> {
    ctx.current_fh = Some(ctx.rpc.pseudo.root_handle());
    status_only(body, nfsstat4::NFS4_OK)
}

pub fn op_getfh(ctx: &mut CompoundContext<'_>, body: &mut Vec<u8>) -> anyhow::Result<nfsstat4> {
    let Some(fh) = ctx.current_fh.clone() else {
        return status_only(body, nfsstat4::NFS4ERR_NOFILEHANDLE);
    };
    nfsstat4::NFS4_OK.serialize(body)?;
    nfs_fh4::from(fh).serialize(body)?;
    Ok(nfsstat4::NFS4_OK)
}

pub fn op_savefh(ctx: &mut CompoundContext<'_>, body: &mut Vec<u8>) -> anyhow::Result<nfsstat4> {
    let Some(fh) = ctx.current_fh.clone() else {
        return status_only(body, nfsstat4::NFS4ERR_NOFILEHANDLE);
    };
    ctx.saved_fh = Some(fh);
    status_only(body, nfsstat4::NFS4_OK)
}

pub fn op_restorefh(ctx: &mut CompoundContext<'_>, body: &mut Vec<u8>) -> anyhow::Result<nfsstat4> {
    let Some(saved) = ctx.saved_fh.clone() else {
        return status_only(body, nfsstat4::NFS4ERR_RESTOREFH);
    };
    // SAVEFH/RESTOREFH exchange current with saved.
    ctx.saved_fh = ctx.current_fh.take();
    ctx.current_fh = Some(saved);
    status_only(body, nfsstat4::NFS4_OK)
}
