//! Per-operation handlers for the NFSv4 COMPOUND engine.
//!
//! Every handler follows the same shape: require any filehandle invariant,
//! reject pseudo-fs handles for mutating operations, decode its arguments
//! (consuming exactly the declared bytes), delegate to the state manager
//! and/or the metadata collaborator, map errors onto a status, and encode
//! its own result body (status first). The engine prefixes the opcode and
//! stops the COMPOUND at the first non-OK status.

use std::io::Read;

use crate::protocol::xdr::nfs4::attr::AttrSource;
use crate::protocol::xdr::nfs4::{fsid4, nfs_opnum4, nfsstat4};
use crate::protocol::xdr::{deserialize, Serialize};
use crate::pseudo;
use crate::vfs::FileRecord;

use super::CompoundContext;

mod access;
mod clientid;
mod create;
mod deleg;
mod fh;
mod getattr;
mod lockops;
mod lookup;
mod openops;
mod read;
mod readdir;
mod readlink;
mod secinfo;
mod sessionops;
mod setattr;
mod write;

pub use sessionops::op_sequence_args;

/// Dispatches one operation to its handler. The result body (status
/// included) lands in `body`; the returned status drives the engine's
/// stop-on-first-failure rule.
pub async fn dispatch_op(
    ctx: &mut CompoundContext<'_>,
    opcode: nfs_opnum4,
    input: &mut (impl Read + Send),
    body: &mut Vec<u8>,
) -> anyhow::Result<nfsstat4> {
    match opcode {
        nfs_opnum4::OP_ACCESS => access::op_access(ctx, input, body).await,
        nfs_opnum4::OP_CLOSE => openops::op_close(ctx, input, body).await,
        nfs_opnum4::OP_COMMIT => write::op_commit(ctx, input, body).await,
        nfs_opnum4::OP_CREATE => create::op_create(ctx, input, body).await,
        nfs_opnum4::OP_DELEGRETURN => deleg::op_delegreturn(ctx, input, body).await,
        nfs_opnum4::OP_GETATTR => getattr::op_getattr(ctx, input, body).await,
        nfs_opnum4::OP_GETFH => fh::op_getfh(ctx, body),
        nfs_opnum4::OP_LINK => create::op_link(ctx, input, body).await,
        nfs_opnum4::OP_LOCK => lockops::op_lock(ctx, input, body).await,
        nfs_opnum4::OP_LOCKT => lockops::op_lockt(ctx, input, body).await,
        nfs_opnum4::OP_LOCKU => lockops::op_locku(ctx, input, body).await,
        nfs_opnum4::OP_LOOKUP => lookup::op_lookup(ctx, input, body).await,
        nfs_opnum4::OP_LOOKUPP => lookup::op_lookupp(ctx, body).await,
        nfs_opnum4::OP_NVERIFY => getattr::op_nverify(ctx, input, body).await,
        nfs_opnum4::OP_OPEN => openops::op_open(ctx, input, body).await,
        nfs_opnum4::OP_OPEN_CONFIRM => openops::op_open_confirm(ctx, input, body).await,
        nfs_opnum4::OP_OPEN_DOWNGRADE => openops::op_open_downgrade(ctx, input, body).await,
        nfs_opnum4::OP_PUTFH => fh::op_putfh(ctx, input, body),
        nfs_opnum4::OP_PUTPUBFH => fh::op_putrootfh(ctx, body),
        nfs_opnum4::OP_PUTROOTFH => fh::op_putrootfh(ctx, body),
        nfs_opnum4::OP_READ => read::op_read(ctx, input, body).await,
        nfs_opnum4::OP_READDIR => readdir::op_readdir(ctx, input, body).await,
        nfs_opnum4::OP_READLINK => readlink::op_readlink(ctx, body).await,
        nfs_opnum4::OP_REMOVE => create::op_remove(ctx, input, body).await,
        nfs_opnum4::OP_RENAME => create::op_rename(ctx, input, body).await,
        nfs_opnum4::OP_RENEW => clientid::op_renew(ctx, input, body),
        nfs_opnum4::OP_RESTOREFH => fh::op_restorefh(ctx, body),
        nfs_opnum4::OP_SAVEFH => fh::op_savefh(ctx, body),
        nfs_opnum4::OP_SECINFO => secinfo::op_secinfo(ctx, input, body).await,
        nfs_opnum4::OP_SETATTR => setattr::op_setattr(ctx, input, body).await,
        nfs_opnum4::OP_SETCLIENTID => clientid::op_setclientid(ctx, input, body),
        nfs_opnum4::OP_SETCLIENTID_CONFIRM => clientid::op_setclientid_confirm(ctx, input, body),
        nfs_opnum4::OP_VERIFY => getattr::op_verify(ctx, input, body).await,
        nfs_opnum4::OP_WRITE => write::op_write(ctx, input, body).await,
        nfs_opnum4::OP_RELEASE_LOCKOWNER => lockops::op_release_lockowner(ctx, input, body),
        nfs_opnum4::OP_BIND_CONN_TO_SESSION => {
            sessionops::op_bind_conn_to_session(ctx, input, body)
        }
        nfs_opnum4::OP_EXCHANGE_ID => sessionops::op_exchange_id(ctx, input, body),
        nfs_opnum4::OP_CREATE_SESSION => sessionops::op_create_session(ctx, input, body),
        nfs_opnum4::OP_DESTROY_SESSION => sessionops::op_destroy_session(ctx, input, body),
        nfs_opnum4::OP_DESTROY_CLIENTID => sessionops::op_destroy_clientid(ctx, input, body),
        nfs_opnum4::OP_RECLAIM_COMPLETE => sessionops::op_reclaim_complete(ctx, input, body),
        nfs_opnum4::OP_SECINFO_NO_NAME => secinfo::op_secinfo_no_name(ctx, input, body).await,
        nfs_opnum4::OP_SET_SSV => sessionops::op_set_ssv(ctx, input, body),
        // Deliberately refused operations: decode what wire compatibility
        // requires, answer NFS4ERR_NOTSUPP.
        nfs_opnum4::OP_OPENATTR => {
            let _createdir: bool = deserialize(input)?;
            status_only(body, nfsstat4::NFS4ERR_NOTSUPP)
        }
        nfs_opnum4::OP_DELEGPURGE => {
            let _clientid: u64 = deserialize(input)?;
            status_only(body, nfsstat4::NFS4ERR_NOTSUPP)
        }
        _ => status_only(body, nfsstat4::NFS4ERR_NOTSUPP),
    }
}

/// Emits a status-only result body.
pub fn status_only(body: &mut Vec<u8>, status: nfsstat4) -> anyhow::Result<nfsstat4> {
    status.serialize(body)?;
    Ok(status)
}

/// Converts decoded wire attributes into the metadata collaborator's
/// set-attribute form, resolving the `uid:<N>`/`gid:<N>` owner strings.
pub(crate) fn settable_to_vfs(
    decoded: &crate::protocol::xdr::nfs4::attr::DecodedSetAttrs,
) -> Result<crate::vfs::SetAttributes, nfsstat4> {
    use crate::protocol::xdr::nfs4::attr::{parse_numeric_owner, SetTime as WireSetTime};
    use crate::vfs::SetTime;

    let mut set = crate::vfs::SetAttributes {
        mode: decoded.mode,
        size: decoded.size,
        ..Default::default()
    };
    if let Some(owner) = &decoded.owner {
        set.uid = Some(parse_numeric_owner(owner, "uid:")?);
    }
    if let Some(group) = &decoded.owner_group {
        set.gid = Some(parse_numeric_owner(group, "gid:")?);
    }
    set.atime = match decoded.atime {
        WireSetTime::NoChange => SetTime::NoChange,
        WireSetTime::ServerTime => SetTime::ServerCurrent,
        WireSetTime::ClientTime(t) => SetTime::ClientProvided(t),
    };
    set.mtime = match decoded.mtime {
        WireSetTime::NoChange => SetTime::NoChange,
        WireSetTime::ServerTime => SetTime::ServerCurrent,
        WireSetTime::ClientTime(t) => SetTime::ClientProvided(t),
    };
    Ok(set)
}

/// Builds the attribute-encoder view of a real file record.
pub(crate) fn record_attr_source(ctx: &CompoundContext<'_>, record: &FileRecord) -> AttrSource {
    AttrSource {
        ftype: record.kind,
        change: record.change(),
        size: record.size,
        fsid: fsid4 { major: 1, minor: 0 },
        fileid: record.fileid,
        mode: record.mode,
        nlink: record.nlink,
        owner: ctx.rpc.metadata.render_owner(record.uid),
        owner_group: ctx.rpc.metadata.render_group(record.gid),
        space_used: record.space_used,
        atime: record.atime,
        ctime: record.ctime,
        mtime: record.mtime,
        filehandle: record.fh.clone(),
        lease_time: ctx.rpc.state.lease_seconds(),
    }
}

/// Builds the attribute-encoder view of whatever the handle points at:
/// a pseudo directory or a real object.
pub(crate) async fn attr_source_for(
    ctx: &CompoundContext<'_>,
    fh: &[u8],
) -> Result<AttrSource, nfsstat4> {
    if pseudo::is_pseudo_handle(fh) {
        let node = ctx.rpc.pseudo.node_by_handle(fh).ok_or(nfsstat4::NFS4ERR_BADHANDLE)?;
        return Ok(ctx.rpc.pseudo.attributes(node, ctx.rpc.state.lease_seconds()));
    }
    let record = ctx.rpc.metadata.get_file(fh).await.map_err(|e| e.nfsstat())?;
    Ok(record_attr_source(ctx, &record))
}
