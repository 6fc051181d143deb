//! READ: stateid-validated reads through the payload collaborator.

use std::io::Read;

use tracing::debug;

use crate::protocol::xdr::deserialize;
use crate::protocol::xdr::nfs4::file::{OPEN4_SHARE_ACCESS_READ, READ4args};
use crate::protocol::xdr::nfs4::nfsstat4;
use crate::protocol::xdr::Serialize;
use crate::pseudo;

use super::super::CompoundContext;
use super::status_only;

pub async fn op_read(
    ctx: &mut CompoundContext<'_>,
    input: &mut (impl Read + Send),
    body: &mut Vec<u8>,
) -> anyhow::Result<nfsstat4> {
    let args: READ4args = deserialize(input)?;
    let Ok(fh) = ctx.require_current_fh() else {
        return status_only(body, nfsstat4::NFS4ERR_NOFILEHANDLE);
    };
    if pseudo::is_pseudo_handle(&fh) {
        return status_only(body, nfsstat4::NFS4ERR_ISDIR);
    }
    debug!("op_read(offset={}, count={})", args.offset, args.count);

    // Share-access is enforced against the backing open for non-special
    // stateids only; the anonymous and bypass stateids skip the lookup.
    if let Err(e) =
        ctx.rpc.state.validate_stateid(&args.stateid, &fh, Some(OPEN4_SHARE_ACCESS_READ))
    {
        return status_only(body, e.nfsstat());
    }

    let record = match ctx.rpc.metadata.get_file(&fh).await {
        Ok(record) => record,
        Err(e) => return status_only(body, e.nfsstat()),
    };
    if record.is_dir() {
        return status_only(body, nfsstat4::NFS4ERR_ISDIR);
    }

    match ctx.rpc.payload.read_at(&ctx.auth(), record.payload, args.offset, args.count).await {
        Ok((data, eof)) => {
            nfsstat4::NFS4_OK.serialize(body)?;
            eof.serialize(body)?;
            data.serialize(body)?;
            Ok(nfsstat4::NFS4_OK)
        }
        Err(e) => status_only(body, e.nfsstat()),
    }
}
