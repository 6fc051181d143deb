//! LOOKUP and LOOKUPP: name resolution across the pseudo-fs junction tree
//! and the real exported filesystems.
//!
//! On pseudo handles LOOKUP navigates the junction tree; resolving an
//! export root swaps the current filehandle for the real-fs root handle of
//! that export. LOOKUPP from a real-fs share root climbs back into the
//! pseudo tree.

use std::io::Read;

use tracing::debug;

use crate::protocol::xdr::deserialize;
use crate::protocol::xdr::nfs4::dir::LOOKUP4args;
use crate::protocol::xdr::nfs4::nfsstat4;
use crate::pseudo::{self, PseudoChild};
use crate::vfs::validate_name;

use super::super::CompoundContext;
use super::status_only;

pub async fn op_lookup(
    ctx: &mut CompoundContext<'_>,
    input: &mut (impl Read + Send),
    body: &mut Vec<u8>,
) -> anyhow::Result<nfsstat4> {
    let args: LOOKUP4args = deserialize(input)?;
    let Ok(dir_fh) = ctx.require_current_fh() else {
        return status_only(body, nfsstat4::NFS4ERR_NOFILEHANDLE);
    };
    if let Err(status) = validate_name(&args.objname) {
        return status_only(body, status);
    }
    debug!("op_lookup({:?})", args.objname);

    if pseudo::is_pseudo_handle(&dir_fh) {
        let Some(node) = ctx.rpc.pseudo.node_by_handle(&dir_fh) else {
            return status_only(body, nfsstat4::NFS4ERR_BADHANDLE);
        };
        match ctx.rpc.pseudo.lookup(node, &args.objname) {
            Some(PseudoChild::Node(child)) => {
                ctx.current_fh = Some(ctx.rpc.pseudo.handle_of(child));
                status_only(body, nfsstat4::NFS4_OK)
            }
            Some(PseudoChild::Junction(export)) => match ctx.rpc.metadata.root_handle(export) {
                Ok(root) => {
                    ctx.current_fh = Some(root);
                    status_only(body, nfsstat4::NFS4_OK)
                }
                Err(e) => status_only(body, e.nfsstat()),
            },
            None => status_only(body, nfsstat4::NFS4ERR_NOENT),
        }
    } else {
        match ctx.rpc.metadata.lookup(&ctx.auth(), &dir_fh, &args.objname).await {
            Ok(record) => {
                ctx.current_fh = Some(record.fh);
                status_only(body, nfsstat4::NFS4_OK)
            }
            Err(e) => status_only(body, e.nfsstat()),
        }
    }
}

pub async fn op_lookupp(
    ctx: &mut CompoundContext<'_>,
    body: &mut Vec<u8>,
) -> anyhow::Result<nfsstat4> {
    let Ok(fh) = ctx.require_current_fh() else {
        return status_only(body, nfsstat4::NFS4ERR_NOFILEHANDLE);
    };

    if pseudo::is_pseudo_handle(&fh) {
        let Some(node) = ctx.rpc.pseudo.node_by_handle(&fh) else {
            return status_only(body, nfsstat4::NFS4ERR_BADHANDLE);
        };
        let parent = ctx.rpc.pseudo.parent(node);
        ctx.current_fh = Some(ctx.rpc.pseudo.handle_of(parent));
        return status_only(body, nfsstat4::NFS4_OK);
    }

    // A share root's parent is its junction's pseudo directory.
    for export in ctx.rpc.pseudo.exports() {
        if let Ok(root) = ctx.rpc.metadata.root_handle(export) {
            if root == fh {
                let Some(node) = ctx.rpc.pseudo.node_for_export(export) else {
                    return status_only(body, nfsstat4::NFS4ERR_SERVERFAULT);
                };
                let parent = ctx.rpc.pseudo.parent(node);
                ctx.current_fh = Some(ctx.rpc.pseudo.handle_of(parent));
                return status_only(body, nfsstat4::NFS4_OK);
            }
        }
    }

    match ctx.rpc.metadata.parent(&ctx.auth(), &fh).await {
        Ok(record) => {
            ctx.current_fh = Some(record.fh);
            status_only(body, nfsstat4::NFS4_OK)
        }
        Err(e) => status_only(body, e.nfsstat()),
    }
}
