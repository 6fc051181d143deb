//! Byte-range locking: LOCK, LOCKT, LOCKU and RELEASE_LOCKOWNER.
//!
//! LOCK's locker union selects between the open-to-lock-owner transition
//! (a new lock-owner rides on an open stateid) and an existing lock-owner
//! adding a range. Denials carry the conflicting holder in a LOCK4denied
//! body. Blocking variants receive the same NFS4ERR_DENIED; queueing is a
//! client affair.

use std::io::Read;

use tracing::debug;

use crate::protocol::xdr::deserialize;
use crate::protocol::xdr::nfs4::lock::{
    locker4, LOCK4args, LOCKT4args, LOCKU4args, RELEASE_LOCKOWNER4args,
};
use crate::protocol::xdr::nfs4::nfsstat4;
use crate::protocol::xdr::Serialize;
use crate::pseudo;
use crate::state::error::StateError;

use super::super::CompoundContext;
use super::status_only;

pub async fn op_lock(
    ctx: &mut CompoundContext<'_>,
    input: &mut (impl Read + Send),
    body: &mut Vec<u8>,
) -> anyhow::Result<nfsstat4> {
    let args: LOCK4args = deserialize(input)?;
    let Ok(fh) = ctx.require_current_fh() else {
        return status_only(body, nfsstat4::NFS4ERR_NOFILEHANDLE);
    };
    if pseudo::is_pseudo_handle(&fh) {
        return status_only(body, nfsstat4::NFS4ERR_ISDIR);
    }
    debug!(
        "op_lock({:?}, offset={}, length={}, reclaim={})",
        args.locktype, args.offset, args.length, args.reclaim
    );

    let result = match &args.locker {
        locker4::New(new) => {
            let mut owner = new.lock_owner.clone();
            owner.clientid = ctx.effective_clientid(owner.clientid);
            ctx.rpc.state.lock_new(
                &new.open_stateid,
                new.open_seqid,
                new.lock_seqid,
                &owner,
                args.locktype,
                args.offset,
                args.length,
                args.reclaim,
                ctx.skip_owner_seqid,
            )
        }
        locker4::Existing(existing) => ctx.rpc.state.lock_existing(
            &existing.lock_stateid,
            existing.lock_seqid,
            args.locktype,
            args.offset,
            args.length,
            args.reclaim,
            ctx.skip_owner_seqid,
        ),
    };

    match result {
        Ok(stateid) => {
            nfsstat4::NFS4_OK.serialize(body)?;
            stateid.serialize(body)?;
            Ok(nfsstat4::NFS4_OK)
        }
        Err(StateError::Denied(denied)) => {
            nfsstat4::NFS4ERR_DENIED.serialize(body)?;
            denied.serialize(body)?;
            Ok(nfsstat4::NFS4ERR_DENIED)
        }
        Err(e) => status_only(body, e.nfsstat()),
    }
}

pub async fn op_lockt(
    ctx: &mut CompoundContext<'_>,
    input: &mut (impl Read + Send),
    body: &mut Vec<u8>,
) -> anyhow::Result<nfsstat4> {
    let args: LOCKT4args = deserialize(input)?;
    let Ok(fh) = ctx.require_current_fh() else {
        return status_only(body, nfsstat4::NFS4ERR_NOFILEHANDLE);
    };
    if pseudo::is_pseudo_handle(&fh) {
        return status_only(body, nfsstat4::NFS4ERR_ISDIR);
    }
    let mut owner = args.owner.clone();
    owner.clientid = ctx.effective_clientid(owner.clientid);
    match ctx.rpc.state.test_lock_on_file(&fh, &owner, args.locktype, args.offset, args.length) {
        Ok(()) => status_only(body, nfsstat4::NFS4_OK),
        Err(StateError::Denied(denied)) => {
            nfsstat4::NFS4ERR_DENIED.serialize(body)?;
            denied.serialize(body)?;
            Ok(nfsstat4::NFS4ERR_DENIED)
        }
        Err(e) => status_only(body, e.nfsstat()),
    }
}

pub async fn op_locku(
    ctx: &mut CompoundContext<'_>,
    input: &mut (impl Read + Send),
    body: &mut Vec<u8>,
) -> anyhow::Result<nfsstat4> {
    let args: LOCKU4args = deserialize(input)?;
    if ctx.require_current_fh().is_err() {
        return status_only(body, nfsstat4::NFS4ERR_NOFILEHANDLE);
    }
    debug!("op_locku(offset={}, length={})", args.offset, args.length);
    match ctx.rpc.state.unlock_file(
        &args.lock_stateid,
        args.seqid,
        args.offset,
        args.length,
        ctx.skip_owner_seqid,
    ) {
        Ok(stateid) => {
            nfsstat4::NFS4_OK.serialize(body)?;
            stateid.serialize(body)?;
            Ok(nfsstat4::NFS4_OK)
        }
        Err(e) => status_only(body, e.nfsstat()),
    }
}

pub fn op_release_lockowner(
    ctx: &mut CompoundContext<'_>,
    input: &mut (impl Read + Send),
    body: &mut Vec<u8>,
) -> anyhow::Result<nfsstat4> {
    let args: RELEASE_LOCKOWNER4args = deserialize(input)?;
    match ctx.rpc.state.release_lockowner(&args.lock_owner) {
        Ok(()) => status_only(body, nfsstat4::NFS4_OK),
        Err(e) => status_only(body, e.nfsstat()),
    }
}
