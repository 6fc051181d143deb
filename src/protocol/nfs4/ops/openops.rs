//! OPEN and its companions OPEN_CONFIRM, OPEN_DOWNGRADE and CLOSE.
//!
//! OPEN dispatches on the claim type: CLAIM_NULL opens or creates by name
//! under the current filehandle, CLAIM_PREVIOUS reclaims the current
//! filehandle during the grace period, CLAIM_DELEGATE_CUR converts a held
//! delegation, and CLAIM_DELEGATE_PREV is permanently refused. Share
//! reservations, owner seqid discipline and stateid minting all live in
//! the state manager; this module owns the namespace work and the reply
//! encoding.

use std::io::{Cursor, Read};

use tracing::debug;

use crate::protocol::xdr::deserialize;
use crate::protocol::xdr::nfs4::attr::decode_settable;
use crate::protocol::xdr::nfs4::file::{
    createhow4, nfs_space_limit4, nfsace4, open_claim4, open_delegation_type4, openflag4,
    CLOSE4args, NFS_LIMIT_SIZE, OPEN4args, OPEN4_RESULT_CONFIRM, OPEN4_RESULT_LOCKTYPE_POSIX,
    OPEN4_SHARE_ACCESS_WRITE, OPEN_CONFIRM4args, OPEN_DOWNGRADE4args,
};
use crate::protocol::xdr::nfs4::{bitmap4, change_info4, nfs_ftype4, nfsstat4, stateid4};
use crate::protocol::xdr::Serialize;
use crate::pseudo;
use crate::state::delegation::DelegationType;
use crate::state::OpenOutcome;
use crate::vfs::{validate_name, FileRecord, SetAttributes};

use super::super::CompoundContext;
use super::{settable_to_vfs, status_only};

pub async fn op_open(
    ctx: &mut CompoundContext<'_>,
    input: &mut (impl Read + Send),
    body: &mut Vec<u8>,
) -> anyhow::Result<nfsstat4> {
    let args: OPEN4args = deserialize(input)?;
    debug!("op_open({:?})", args.claim);
    let clientid = ctx.effective_clientid(args.owner.clientid);
    let wants_write = args.share_access & OPEN4_SHARE_ACCESS_WRITE != 0;

    match args.claim.clone() {
        open_claim4::NullNamed(name) => {
            open_claim_null(ctx, &args, clientid, wants_write, name.as_ref(), body).await
        }
        open_claim4::Previous(_delegate_type) => {
            open_claim_previous(ctx, &args, clientid, body).await
        }
        open_claim4::DelegateCur(deleg) => {
            open_claim_delegate_cur(
                ctx,
                &args,
                clientid,
                &deleg.delegate_stateid,
                deleg.file.as_ref(),
                body,
            )
            .await
        }
        // Pre-restart delegation state is not persisted; its reclaim is
        // permanently refused, as are the v4.1 handle-based claims.
        open_claim4::DelegatePrev(_)
        | open_claim4::DelegPrevFh
        | open_claim4::Fh
        | open_claim4::DelegCurFh(_) => status_only(body, nfsstat4::NFS4ERR_NOTSUPP),
    }
}

async fn open_claim_null(
    ctx: &mut CompoundContext<'_>,
    args: &OPEN4args,
    clientid: u64,
    wants_write: bool,
    name: &[u8],
    body: &mut Vec<u8>,
) -> anyhow::Result<nfsstat4> {
    let Ok(parent_fh) = ctx.require_current_fh() else {
        return status_only(body, nfsstat4::NFS4ERR_NOFILEHANDLE);
    };
    if let Err(status) = validate_name(name) {
        return status_only(body, status);
    }
    let creating = matches!(args.openhow, openflag4::Create(_));
    if pseudo::is_pseudo_handle(&parent_fh) {
        if creating {
            return status_only(body, nfsstat4::NFS4ERR_ROFS);
        }
        let Some(node) = ctx.rpc.pseudo.node_by_handle(&parent_fh) else {
            return status_only(body, nfsstat4::NFS4ERR_BADHANDLE);
        };
        // Everything reachable inside the pseudo tree is a directory.
        return match ctx.rpc.pseudo.lookup(node, name) {
            Some(_) => status_only(body, nfsstat4::NFS4ERR_ISDIR),
            None => status_only(body, nfsstat4::NFS4ERR_NOENT),
        };
    }

    // The grace gate comes before any namespace work.
    if let Err(e) = ctx.rpc.state.check_grace(false) {
        return status_only(body, e.nfsstat());
    }

    let auth = ctx.auth();
    let parent_before = match ctx.rpc.metadata.get_file(&parent_fh).await {
        Ok(record) => record,
        Err(e) => return status_only(body, e.nfsstat()),
    };

    let mut attrs_applied = bitmap4::new();
    let existing = ctx.rpc.metadata.lookup(&auth, &parent_fh, name).await;
    let file: FileRecord = match (&args.openhow, existing) {
        (openflag4::NoCreate, Ok(found)) => found,
        (openflag4::NoCreate, Err(e)) => return status_only(body, e.nfsstat()),
        (openflag4::Create(how), Ok(found)) => match how {
            createhow4::Guarded(_) => return status_only(body, nfsstat4::NFS4ERR_EXIST),
            createhow4::Unchecked(wire_attrs) => {
                // UNCHECKED on an existing file honors only a size-zero
                // truncation request.
                let (decoded, _) = match decode_settable(wire_attrs) {
                    Ok(decoded) => decoded,
                    Err(status) => return status_only(body, status),
                };
                if decoded.size == Some(0) {
                    let truncate =
                        SetAttributes { size: Some(0), ..Default::default() };
                    match ctx.rpc.metadata.set_attributes(&auth, &found.fh, &truncate).await {
                        Ok(updated) => updated,
                        Err(e) => return status_only(body, e.nfsstat()),
                    }
                } else {
                    found
                }
            }
            createhow4::Exclusive(_) | createhow4::Exclusive41(..) => {
                return status_only(body, nfsstat4::NFS4ERR_NOTSUPP)
            }
        },
        (openflag4::Create(how), Err(crate::vfs::MetadataError::NotFound)) => {
            let wire_attrs = match how {
                createhow4::Unchecked(attrs) | createhow4::Guarded(attrs) => attrs,
                createhow4::Exclusive(_) | createhow4::Exclusive41(..) => {
                    return status_only(body, nfsstat4::NFS4ERR_NOTSUPP)
                }
            };
            let (decoded, consumed) = match decode_settable(wire_attrs) {
                Ok(decoded) => decoded,
                Err(status) => return status_only(body, status),
            };
            let set = match settable_to_vfs(&decoded) {
                Ok(set) => set,
                Err(status) => return status_only(body, status),
            };
            match ctx.rpc.metadata.create_file(&auth, &parent_fh, name, &set).await {
                Ok(created) => {
                    attrs_applied = consumed;
                    created
                }
                Err(e) => return status_only(body, e.nfsstat()),
            }
        }
        (openflag4::Create(_), Err(e)) => return status_only(body, e.nfsstat()),
    };

    match file.kind {
        nfs_ftype4::NF4REG => {}
        nfs_ftype4::NF4DIR => return status_only(body, nfsstat4::NFS4ERR_ISDIR),
        nfs_ftype4::NF4LNK => return status_only(body, nfsstat4::NFS4ERR_SYMLINK),
        _ => return status_only(body, nfsstat4::NFS4ERR_INVAL),
    }

    // A conflicting delegation is recalled asynchronously; the opener
    // retries after the holder returns it.
    let (conflict, dispatched) =
        ctx.rpc.state.check_delegation_conflict(&file.fh, clientid, wants_write);
    if conflict {
        debug!(dispatched, "open blocked by delegation, returning DELAY");
        return status_only(body, nfsstat4::NFS4ERR_DELAY);
    }

    let outcome = match ctx.rpc.state.open_file(
        clientid,
        &args.owner.owner,
        args.seqid,
        ctx.skip_owner_seqid,
        &file.fh,
        args.share_access,
        args.share_deny,
        false,
    ) {
        Ok(outcome) => outcome,
        Err(e) => return status_only(body, e.nfsstat()),
    };
    let (stateid, new_owner) = match outcome {
        OpenOutcome::Granted { stateid, new_owner } => (stateid, new_owner),
        OpenOutcome::Replay(cached) => {
            body.extend_from_slice(&cached);
            return Ok(replay_status(&cached));
        }
    };

    let parent_after = match ctx.rpc.metadata.get_file(&parent_fh).await {
        Ok(record) => record,
        Err(e) => return status_only(body, e.nfsstat()),
    };
    let cinfo = change_info4 {
        atomic: true,
        before: parent_before.change(),
        after: parent_after.change(),
    };

    // An exclusive open from a callback-capable client earns a delegation.
    let delegation = if args.share_deny != 0 && ctx.rpc.state.callback_path_up(clientid) {
        let dtype = if wants_write { DelegationType::Write } else { DelegationType::Read };
        ctx.rpc.state.grant_delegation(clientid, &file.fh, dtype).map(|sid| (sid, dtype))
    } else {
        None
    };

    ctx.current_fh = Some(file.fh.clone());

    let mut rflags = OPEN4_RESULT_LOCKTYPE_POSIX;
    if ctx.minor_version == 0 && new_owner {
        rflags |= OPEN4_RESULT_CONFIRM;
    }
    let mut result = Vec::new();
    nfsstat4::NFS4_OK.serialize(&mut result)?;
    stateid.serialize(&mut result)?;
    cinfo.serialize(&mut result)?;
    rflags.serialize(&mut result)?;
    attrs_applied.serialize(&mut result)?;
    encode_delegation(&mut result, delegation, file.size)?;
    if ctx.minor_version == 0 {
        ctx.rpc.state.record_open_reply(clientid, &args.owner.owner, result.clone());
    }
    body.extend_from_slice(&result);
    Ok(nfsstat4::NFS4_OK)
}

async fn open_claim_previous(
    ctx: &mut CompoundContext<'_>,
    args: &OPEN4args,
    clientid: u64,
    body: &mut Vec<u8>,
) -> anyhow::Result<nfsstat4> {
    // The current filehandle is the file being reclaimed.
    let Ok(fh) = ctx.require_current_fh() else {
        return status_only(body, nfsstat4::NFS4ERR_NOFILEHANDLE);
    };
    if pseudo::is_pseudo_handle(&fh) {
        return status_only(body, nfsstat4::NFS4ERR_ROFS);
    }
    let outcome = match ctx.rpc.state.open_file(
        clientid,
        &args.owner.owner,
        args.seqid,
        ctx.skip_owner_seqid,
        &fh,
        args.share_access,
        args.share_deny,
        true,
    ) {
        Ok(outcome) => outcome,
        Err(e) => return status_only(body, e.nfsstat()),
    };
    let (stateid, new_owner) = match outcome {
        OpenOutcome::Granted { stateid, new_owner } => (stateid, new_owner),
        OpenOutcome::Replay(cached) => {
            body.extend_from_slice(&cached);
            return Ok(replay_status(&cached));
        }
    };

    let mut rflags = OPEN4_RESULT_LOCKTYPE_POSIX;
    if ctx.minor_version == 0 && new_owner {
        rflags |= OPEN4_RESULT_CONFIRM;
    }
    let mut result = Vec::new();
    nfsstat4::NFS4_OK.serialize(&mut result)?;
    stateid.serialize(&mut result)?;
    change_info4::default().serialize(&mut result)?;
    rflags.serialize(&mut result)?;
    bitmap4::new().serialize(&mut result)?;
    encode_delegation(&mut result, None, 0)?;
    if ctx.minor_version == 0 {
        ctx.rpc.state.record_open_reply(clientid, &args.owner.owner, result.clone());
    }
    body.extend_from_slice(&result);
    Ok(nfsstat4::NFS4_OK)
}

async fn open_claim_delegate_cur(
    ctx: &mut CompoundContext<'_>,
    args: &OPEN4args,
    clientid: u64,
    delegate_stateid: &stateid4,
    name: &[u8],
    body: &mut Vec<u8>,
) -> anyhow::Result<nfsstat4> {
    let Ok(parent_fh) = ctx.require_current_fh() else {
        return status_only(body, nfsstat4::NFS4ERR_NOFILEHANDLE);
    };
    if let Err(status) = validate_name(name) {
        return status_only(body, status);
    }
    if pseudo::is_pseudo_handle(&parent_fh) {
        return status_only(body, nfsstat4::NFS4ERR_ROFS);
    }
    // The delegation must exist and belong to the caller.
    let deleg_fh = match ctx.rpc.state.delegation_for(delegate_stateid, clientid) {
        Ok(fh) => fh,
        Err(e) => return status_only(body, e.nfsstat()),
    };
    let file = match ctx.rpc.metadata.lookup(&ctx.auth(), &parent_fh, name).await {
        Ok(record) => record,
        Err(e) => return status_only(body, e.nfsstat()),
    };
    if file.fh != deleg_fh {
        return status_only(body, nfsstat4::NFS4ERR_BAD_STATEID);
    }
    let outcome = match ctx.rpc.state.open_file(
        clientid,
        &args.owner.owner,
        args.seqid,
        ctx.skip_owner_seqid,
        &file.fh,
        args.share_access,
        args.share_deny,
        false,
    ) {
        Ok(outcome) => outcome,
        Err(e) => return status_only(body, e.nfsstat()),
    };
    let (stateid, new_owner) = match outcome {
        OpenOutcome::Granted { stateid, new_owner } => (stateid, new_owner),
        OpenOutcome::Replay(cached) => {
            body.extend_from_slice(&cached);
            return Ok(replay_status(&cached));
        }
    };
    ctx.current_fh = Some(file.fh);

    let mut rflags = OPEN4_RESULT_LOCKTYPE_POSIX;
    if ctx.minor_version == 0 && new_owner {
        rflags |= OPEN4_RESULT_CONFIRM;
    }
    let mut result = Vec::new();
    nfsstat4::NFS4_OK.serialize(&mut result)?;
    stateid.serialize(&mut result)?;
    change_info4::default().serialize(&mut result)?;
    rflags.serialize(&mut result)?;
    bitmap4::new().serialize(&mut result)?;
    // Converting a delegation to an open never grants a new one.
    encode_delegation(&mut result, None, 0)?;
    if ctx.minor_version == 0 {
        ctx.rpc.state.record_open_reply(clientid, &args.owner.owner, result.clone());
    }
    body.extend_from_slice(&result);
    Ok(nfsstat4::NFS4_OK)
}

/// Encodes the open_delegation4 union arm of an OPEN result.
fn encode_delegation(
    dest: &mut Vec<u8>,
    grant: Option<(stateid4, DelegationType)>,
    file_size: u64,
) -> std::io::Result<()> {
    match grant {
        None => open_delegation_type4::OPEN_DELEGATE_NONE.serialize(dest),
        Some((stateid, DelegationType::Read)) => {
            open_delegation_type4::OPEN_DELEGATE_READ.serialize(dest)?;
            stateid.serialize(dest)?;
            false.serialize(dest)?; // recall
            everyone_ace().serialize(dest)
        }
        Some((stateid, DelegationType::Write)) => {
            open_delegation_type4::OPEN_DELEGATE_WRITE.serialize(dest)?;
            stateid.serialize(dest)?;
            false.serialize(dest)?; // recall
            nfs_space_limit4 { limitby: NFS_LIMIT_SIZE, filesize: file_size.max(1 << 20) }
                .serialize(dest)?;
            everyone_ace().serialize(dest)
        }
    }
}

fn everyone_ace() -> nfsace4 {
    nfsace4 { acetype: 0, aceflag: 0, accessmask: 0, who: "EVERYONE@".into() }
}

/// Pulls the status out of a cached v4.0 replay body.
pub(crate) fn replay_status(cached: &[u8]) -> nfsstat4 {
    let mut cursor = Cursor::new(cached);
    deserialize::<nfsstat4, _>(&mut cursor).unwrap_or(nfsstat4::NFS4ERR_SERVERFAULT)
}

pub async fn op_open_confirm(
    ctx: &mut CompoundContext<'_>,
    input: &mut (impl Read + Send),
    body: &mut Vec<u8>,
) -> anyhow::Result<nfsstat4> {
    let args: OPEN_CONFIRM4args = deserialize(input)?;
    if ctx.require_current_fh().is_err() {
        return status_only(body, nfsstat4::NFS4ERR_NOFILEHANDLE);
    }
    match ctx.rpc.state.open_confirm(&args.open_stateid, args.seqid) {
        Ok(stateid) => {
            nfsstat4::NFS4_OK.serialize(body)?;
            stateid.serialize(body)?;
            Ok(nfsstat4::NFS4_OK)
        }
        Err(e) => status_only(body, e.nfsstat()),
    }
}

pub async fn op_open_downgrade(
    ctx: &mut CompoundContext<'_>,
    input: &mut (impl Read + Send),
    body: &mut Vec<u8>,
) -> anyhow::Result<nfsstat4> {
    let args: OPEN_DOWNGRADE4args = deserialize(input)?;
    if ctx.require_current_fh().is_err() {
        return status_only(body, nfsstat4::NFS4ERR_NOFILEHANDLE);
    }
    match ctx.rpc.state.downgrade_open(
        &args.open_stateid,
        args.seqid,
        ctx.skip_owner_seqid,
        args.share_access,
        args.share_deny,
    ) {
        Ok(stateid) => {
            nfsstat4::NFS4_OK.serialize(body)?;
            stateid.serialize(body)?;
            Ok(nfsstat4::NFS4_OK)
        }
        Err(e) => status_only(body, e.nfsstat()),
    }
}

pub async fn op_close(
    ctx: &mut CompoundContext<'_>,
    input: &mut (impl Read + Send),
    body: &mut Vec<u8>,
) -> anyhow::Result<nfsstat4> {
    let args: CLOSE4args = deserialize(input)?;
    if ctx.require_current_fh().is_err() {
        return status_only(body, nfsstat4::NFS4ERR_NOFILEHANDLE);
    }
    debug!("op_close({:?})", args.open_stateid);
    match ctx.rpc.state.close_file(&args.open_stateid, args.seqid, ctx.skip_owner_seqid) {
        Ok(stateid) => {
            nfsstat4::NFS4_OK.serialize(body)?;
            stateid.serialize(body)?;
            Ok(nfsstat4::NFS4_OK)
        }
        Err(e) => status_only(body, e.nfsstat()),
    }
}
