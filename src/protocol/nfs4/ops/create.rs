//! Namespace mutations: CREATE, REMOVE, RENAME and LINK.
//!
//! All four validate names, refuse pseudo-fs handles with ROFS, and report
//! `change_info4` computed from the parent directory's change attribute
//! before and after the mutation. CREATE refuses regular files (OPEN
//! creates those) and node kinds the metadata collaborator cannot express.

use std::io::Read;

use tracing::debug;

use crate::protocol::xdr::deserialize;
use crate::protocol::xdr::nfs4::attr::decode_settable;
use crate::protocol::xdr::nfs4::dir::{
    createtype4, CREATE4args, LINK4args, REMOVE4args, RENAME4args,
};
use crate::protocol::xdr::nfs4::{change_info4, nfsstat4};
use crate::protocol::xdr::Serialize;
use crate::pseudo;
use crate::vfs::validate_name;

use super::super::CompoundContext;
use super::{settable_to_vfs, status_only};

pub async fn op_create(
    ctx: &mut CompoundContext<'_>,
    input: &mut (impl Read + Send),
    body: &mut Vec<u8>,
) -> anyhow::Result<nfsstat4> {
    let args: CREATE4args = deserialize(input)?;
    let Ok(parent_fh) = ctx.require_current_fh() else {
        return status_only(body, nfsstat4::NFS4ERR_NOFILEHANDLE);
    };
    if pseudo::is_pseudo_handle(&parent_fh) {
        return status_only(body, nfsstat4::NFS4ERR_ROFS);
    }
    if let Err(status) = validate_name(&args.objname) {
        return status_only(body, status);
    }
    if let Err(e) = ctx.rpc.state.check_grace(false) {
        return status_only(body, e.nfsstat());
    }
    debug!("op_create({:?}, {:?})", args.objtype, args.objname);

    let (decoded, consumed) = match decode_settable(&args.createattrs) {
        Ok(decoded) => decoded,
        Err(status) => return status_only(body, status),
    };
    let set = match settable_to_vfs(&decoded) {
        Ok(set) => set,
        Err(status) => return status_only(body, status),
    };

    let auth = ctx.auth();
    let before = match ctx.rpc.metadata.get_file(&parent_fh).await {
        Ok(record) => record,
        Err(e) => return status_only(body, e.nfsstat()),
    };

    let created = match args.objtype {
        createtype4::Directory => {
            ctx.rpc.metadata.create_directory(&auth, &parent_fh, &args.objname, &set).await
        }
        createtype4::Link(target) => {
            ctx.rpc
                .metadata
                .create_symlink(&auth, &parent_fh, &args.objname, target.as_ref(), &set)
                .await
        }
        // Regular files are created through OPEN.
        createtype4::Refused(_) => return status_only(body, nfsstat4::NFS4ERR_BADTYPE),
        // Device nodes, sockets and fifos have no metadata counterpart.
        createtype4::Block(_) | createtype4::Char(_) | createtype4::Socket
        | createtype4::Fifo => return status_only(body, nfsstat4::NFS4ERR_NOTSUPP),
    };
    let created = match created {
        Ok(record) => record,
        Err(e) => return status_only(body, e.nfsstat()),
    };

    let after = match ctx.rpc.metadata.get_file(&parent_fh).await {
        Ok(record) => record,
        Err(e) => return status_only(body, e.nfsstat()),
    };
    ctx.current_fh = Some(created.fh);

    nfsstat4::NFS4_OK.serialize(body)?;
    change_info4 { atomic: true, before: before.change(), after: after.change() }
        .serialize(body)?;
    consumed.serialize(body)?;
    Ok(nfsstat4::NFS4_OK)
}

pub async fn op_remove(
    ctx: &mut CompoundContext<'_>,
    input: &mut (impl Read + Send),
    body: &mut Vec<u8>,
) -> anyhow::Result<nfsstat4> {
    let args: REMOVE4args = deserialize(input)?;
    let Ok(parent_fh) = ctx.require_current_fh() else {
        return status_only(body, nfsstat4::NFS4ERR_NOFILEHANDLE);
    };
    if pseudo::is_pseudo_handle(&parent_fh) {
        return status_only(body, nfsstat4::NFS4ERR_ROFS);
    }
    if let Err(status) = validate_name(&args.target) {
        return status_only(body, status);
    }
    debug!("op_remove({:?})", args.target);

    let auth = ctx.auth();
    let before = match ctx.rpc.metadata.get_file(&parent_fh).await {
        Ok(record) => record,
        Err(e) => return status_only(body, e.nfsstat()),
    };
    if let Err(e) = ctx.rpc.metadata.remove(&auth, &parent_fh, &args.target).await {
        return status_only(body, e.nfsstat());
    }
    let after = match ctx.rpc.metadata.get_file(&parent_fh).await {
        Ok(record) => record,
        Err(e) => return status_only(body, e.nfsstat()),
    };

    nfsstat4::NFS4_OK.serialize(body)?;
    change_info4 { atomic: true, before: before.change(), after: after.change() }
        .serialize(body)?;
    Ok(nfsstat4::NFS4_OK)
}

pub async fn op_rename(
    ctx: &mut CompoundContext<'_>,
    input: &mut (impl Read + Send),
    body: &mut Vec<u8>,
) -> anyhow::Result<nfsstat4> {
    let args: RENAME4args = deserialize(input)?;
    let Ok(target_fh) = ctx.require_current_fh() else {
        return status_only(body, nfsstat4::NFS4ERR_NOFILEHANDLE);
    };
    let Some(source_fh) = ctx.saved_fh.clone() else {
        return status_only(body, nfsstat4::NFS4ERR_NOFILEHANDLE);
    };
    if pseudo::is_pseudo_handle(&target_fh) || pseudo::is_pseudo_handle(&source_fh) {
        return status_only(body, nfsstat4::NFS4ERR_ROFS);
    }
    if let Err(status) = validate_name(&args.oldname) {
        return status_only(body, status);
    }
    if let Err(status) = validate_name(&args.newname) {
        return status_only(body, status);
    }
    debug!("op_rename({:?} -> {:?})", args.oldname, args.newname);

    let auth = ctx.auth();
    let source_before = match ctx.rpc.metadata.get_file(&source_fh).await {
        Ok(record) => record,
        Err(e) => return status_only(body, e.nfsstat()),
    };
    let target_before = match ctx.rpc.metadata.get_file(&target_fh).await {
        Ok(record) => record,
        Err(e) => return status_only(body, e.nfsstat()),
    };
    if let Err(e) = ctx
        .rpc
        .metadata
        .rename(&auth, &source_fh, &args.oldname, &target_fh, &args.newname)
        .await
    {
        return status_only(body, e.nfsstat());
    }
    let source_after = match ctx.rpc.metadata.get_file(&source_fh).await {
        Ok(record) => record,
        Err(e) => return status_only(body, e.nfsstat()),
    };
    let target_after = match ctx.rpc.metadata.get_file(&target_fh).await {
        Ok(record) => record,
        Err(e) => return status_only(body, e.nfsstat()),
    };

    nfsstat4::NFS4_OK.serialize(body)?;
    change_info4 {
        atomic: true,
        before: source_before.change(),
        after: source_after.change(),
    }
    .serialize(body)?;
    change_info4 {
        atomic: true,
        before: target_before.change(),
        after: target_after.change(),
    }
    .serialize(body)?;
    Ok(nfsstat4::NFS4_OK)
}

pub async fn op_link(
    ctx: &mut CompoundContext<'_>,
    input: &mut (impl Read + Send),
    body: &mut Vec<u8>,
) -> anyhow::Result<nfsstat4> {
    let args: LINK4args = deserialize(input)?;
    let Ok(dir_fh) = ctx.require_current_fh() else {
        return status_only(body, nfsstat4::NFS4ERR_NOFILEHANDLE);
    };
    let Some(source_fh) = ctx.saved_fh.clone() else {
        return status_only(body, nfsstat4::NFS4ERR_NOFILEHANDLE);
    };
    if pseudo::is_pseudo_handle(&dir_fh) {
        return status_only(body, nfsstat4::NFS4ERR_ROFS);
    }
    if pseudo::is_pseudo_handle(&source_fh) {
        // Pseudo directories cannot be hard-linked into an export.
        return status_only(body, nfsstat4::NFS4ERR_XDEV);
    }
    if let Err(status) = validate_name(&args.newname) {
        return status_only(body, status);
    }
    debug!("op_link({:?})", args.newname);

    let auth = ctx.auth();
    let before = match ctx.rpc.metadata.get_file(&dir_fh).await {
        Ok(record) => record,
        Err(e) => return status_only(body, e.nfsstat()),
    };
    if let Err(e) = ctx.rpc.metadata.link(&auth, &source_fh, &dir_fh, &args.newname).await {
        return status_only(body, e.nfsstat());
    }
    let after = match ctx.rpc.metadata.get_file(&dir_fh).await {
        Ok(record) => record,
        Err(e) => return status_only(body, e.nfsstat()),
    };

    nfsstat4::NFS4_OK.serialize(body)?;
    change_info4 { atomic: true, before: before.change(), after: after.change() }
        .serialize(body)?;
    Ok(nfsstat4::NFS4_OK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::xdr::deserialize as xdr_deserialize;
    use std::io::Cursor;

    #[test]
    fn create_args_with_symlink_round_trip() {
        let args = CREATE4args {
            objtype: createtype4::Link("to/here".into()),
            objname: "linkname".into(),
            createattrs: Default::default(),
        };
        let mut buf = Vec::new();
        args.serialize(&mut buf).unwrap();
        let back: CREATE4args = xdr_deserialize(&mut Cursor::new(&buf)).unwrap();
        assert!(matches!(back.objtype, createtype4::Link(ref t) if t.as_ref() == b"to/here"));
        assert_eq!(back.objname.as_ref(), b"linkname");
    }
}
