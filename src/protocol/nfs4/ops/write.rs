//! WRITE and COMMIT. Writes go through the metadata collaborator's
//! prepare/commit envelope around the payload store; replies always report
//! UNSTABLE4 with the server boot verifier so clients replay unstable data
//! after a restart, and COMMIT echoes the same verifier.

use std::io::Read;

use tracing::debug;

use crate::protocol::xdr::deserialize;
use crate::protocol::xdr::nfs4::file::{
    stable_how4, COMMIT4args, OPEN4_SHARE_ACCESS_WRITE, WRITE4args,
};
use crate::protocol::xdr::nfs4::nfsstat4;
use crate::protocol::xdr::Serialize;
use crate::pseudo;

use super::super::CompoundContext;
use super::status_only;

/// Writes must not reach past the largest representable file offset.
const MAX_FILE_OFFSET: u64 = i64::MAX as u64;

pub async fn op_write(
    ctx: &mut CompoundContext<'_>,
    input: &mut (impl Read + Send),
    body: &mut Vec<u8>,
) -> anyhow::Result<nfsstat4> {
    let args: WRITE4args = deserialize(input)?;
    let Ok(fh) = ctx.require_current_fh() else {
        return status_only(body, nfsstat4::NFS4ERR_NOFILEHANDLE);
    };
    if pseudo::is_pseudo_handle(&fh) {
        return status_only(body, nfsstat4::NFS4ERR_ROFS);
    }
    let end = match args.offset.checked_add(args.data.len() as u64) {
        Some(end) if end <= MAX_FILE_OFFSET => end,
        _ => return status_only(body, nfsstat4::NFS4ERR_INVAL),
    };
    debug!("op_write(offset={}, len={})", args.offset, args.data.len());

    if let Err(e) =
        ctx.rpc.state.validate_stateid(&args.stateid, &fh, Some(OPEN4_SHARE_ACCESS_WRITE))
    {
        return status_only(body, e.nfsstat());
    }

    let auth = ctx.auth();
    let intent = match ctx.rpc.metadata.prepare_write(&auth, &fh, end).await {
        Ok(intent) => intent,
        Err(e) => return status_only(body, e.nfsstat()),
    };
    let written =
        match ctx.rpc.payload.write_at(&auth, intent.payload, &args.data, args.offset).await {
            Ok(written) => written,
            Err(e) => return status_only(body, e.nfsstat()),
        };
    if let Err(e) = ctx.rpc.metadata.commit_write(&auth, intent).await {
        return status_only(body, e.nfsstat());
    }

    nfsstat4::NFS4_OK.serialize(body)?;
    written.serialize(body)?;
    stable_how4::UNSTABLE4.serialize(body)?;
    ctx.rpc.state.boot_verifier().serialize(body)?;
    Ok(nfsstat4::NFS4_OK)
}

pub async fn op_commit(
    ctx: &mut CompoundContext<'_>,
    input: &mut (impl Read + Send),
    body: &mut Vec<u8>,
) -> anyhow::Result<nfsstat4> {
    let args: COMMIT4args = deserialize(input)?;
    let Ok(fh) = ctx.require_current_fh() else {
        return status_only(body, nfsstat4::NFS4ERR_NOFILEHANDLE);
    };
    if pseudo::is_pseudo_handle(&fh) {
        return status_only(body, nfsstat4::NFS4ERR_ISDIR);
    }
    debug!("op_commit(offset={}, count={})", args.offset, args.count);

    match ctx.rpc.metadata.flush_pending_write_for_file(&ctx.auth(), &fh).await {
        Ok(flushed) => {
            debug!(flushed, "commit flushed pending writes");
            nfsstat4::NFS4_OK.serialize(body)?;
            ctx.rpc.state.boot_verifier().serialize(body)?;
            Ok(nfsstat4::NFS4_OK)
        }
        Err(e) => status_only(body, e.nfsstat()),
    }
}
