//! SETATTR: attribute mutation with stateid validation for size changes
//! and recall of delegations on directories whose significant attributes
//! change.

use std::io::Read;

use tracing::debug;

use crate::protocol::xdr::deserialize;
use crate::protocol::xdr::nfs4::attr::decode_settable;
use crate::protocol::xdr::nfs4::file::{OPEN4_SHARE_ACCESS_WRITE, SETATTR4args};
use crate::protocol::xdr::nfs4::{bitmap4, nfsstat4};
use crate::protocol::xdr::Serialize;
use crate::pseudo;

use super::super::CompoundContext;
use super::settable_to_vfs;

fn status_with_empty_set(body: &mut Vec<u8>, status: nfsstat4) -> anyhow::Result<nfsstat4> {
    status.serialize(body)?;
    bitmap4::new().serialize(body)?;
    Ok(status)
}

pub async fn op_setattr(
    ctx: &mut CompoundContext<'_>,
    input: &mut (impl Read + Send),
    body: &mut Vec<u8>,
) -> anyhow::Result<nfsstat4> {
    let args: SETATTR4args = deserialize(input)?;
    // The result always carries the set-attribute bitmap, empty on error.
    let Ok(fh) = ctx.require_current_fh() else {
        return status_with_empty_set(body, nfsstat4::NFS4ERR_NOFILEHANDLE);
    };
    if pseudo::is_pseudo_handle(&fh) {
        return status_with_empty_set(body, nfsstat4::NFS4ERR_ROFS);
    }
    let (decoded, consumed) = match decode_settable(&args.obj_attributes) {
        Ok(decoded) => decoded,
        Err(status) => {
            // A failed SETATTR still reports which attributes were set:
            // none.
            status.serialize(body)?;
            bitmap4::new().serialize(body)?;
            return Ok(status);
        }
    };
    debug!("op_setattr({:?})", consumed);

    // Size changes are writes; the stateid must permit them.
    if decoded.size.is_some() {
        if let Err(e) =
            ctx.rpc.state.validate_stateid(&args.stateid, &fh, Some(OPEN4_SHARE_ACCESS_WRITE))
        {
            let status = e.nfsstat();
            status.serialize(body)?;
            bitmap4::new().serialize(body)?;
            return Ok(status);
        }
    }
    let set = match settable_to_vfs(&decoded) {
        Ok(set) => set,
        Err(status) => {
            status.serialize(body)?;
            bitmap4::new().serialize(body)?;
            return Ok(status);
        }
    };

    match ctx.rpc.metadata.set_attributes(&ctx.auth(), &fh, &set).await {
        Ok(updated) => {
            // Significant attribute changes on a directory invalidate what
            // delegation holders cached about it.
            let significant =
                set.mode.is_some() || set.uid.is_some() || set.gid.is_some() || set.size.is_some();
            if updated.is_dir() && significant {
                ctx.rpc.state.recall_delegations_on(&fh);
            }
            nfsstat4::NFS4_OK.serialize(body)?;
            consumed.serialize(body)?;
            Ok(nfsstat4::NFS4_OK)
        }
        Err(e) => {
            let status = e.nfsstat();
            status.serialize(body)?;
            bitmap4::new().serialize(body)?;
            Ok(status)
        }
    }
}
