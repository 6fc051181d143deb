//! READLINK: reads the target of a symbolic link.

use crate::protocol::xdr::nfs4::{linktext4, nfsstat4};
use crate::protocol::xdr::Serialize;
use crate::pseudo;

use super::super::CompoundContext;
use super::status_only;

pub async fn op_readlink(
    ctx: &mut CompoundContext<'_>,
    body: &mut Vec<u8>,
) -> anyhow::Result<nfsstat4> {
    let Ok(fh) = ctx.require_current_fh() else {
        return status_only(body, nfsstat4::NFS4ERR_NOFILEHANDLE);
    };
    if pseudo::is_pseudo_handle(&fh) {
        // Pseudo nodes are directories, never links.
        return status_only(body, nfsstat4::NFS4ERR_INVAL);
    }
    match ctx.rpc.metadata.read_symlink(&ctx.auth(), &fh).await {
        Ok(target) => {
            nfsstat4::NFS4_OK.serialize(body)?;
            linktext4::from(target).serialize(body)?;
            Ok(nfsstat4::NFS4_OK)
        }
        Err(e) => status_only(body, e.nfsstat()),
    }
}
