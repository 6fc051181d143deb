//! READDIR: paginated directory listing over both the pseudo tree and real
//! exports.
//!
//! Cookies are positional: entry N carries cookie N+3 (0 starts the
//! listing; 1 and 2 are reserved by the protocol). The cookie verifier is
//! fixed zero bytes. Every encoded entry is `(present, cookie, name,
//! fattr4)`; the list ends with `present = false` followed by the eof
//! flag. The `maxcount` budget covers the whole result and is enforced
//! with a byte-counting writer; `dircount` approximates the name/cookie
//! portion only.

use std::io::{Read, Write};

use tracing::{debug, trace};

use crate::protocol::xdr::deserialize;
use crate::protocol::xdr::nfs4::attr::{encode_attrs, AttrSource};
use crate::protocol::xdr::nfs4::dir::READDIR4args;
use crate::protocol::xdr::nfs4::{component4, nfsstat4, verifier4};
use crate::protocol::xdr::Serialize;
use crate::pseudo::{self, PseudoChild};
use crate::write_counter::WriteCounter;

use super::super::CompoundContext;
use super::{record_attr_source, status_only};

/// Cookie of the first real entry; 0 starts a listing, 1 and 2 are
/// reserved.
const FIRST_COOKIE: u64 = 3;

/// Bytes consumed by the fixed parts of the result: status, verifier,
/// list terminator and eof flag.
const RESULT_OVERHEAD: usize = 4 + 8 + 4 + 4;

fn cookie_to_index(cookie: u64) -> u64 {
    if cookie == 0 {
        0
    } else {
        cookie - FIRST_COOKIE + 1
    }
}

pub async fn op_readdir(
    ctx: &mut CompoundContext<'_>,
    input: &mut (impl Read + Send),
    body: &mut Vec<u8>,
) -> anyhow::Result<nfsstat4> {
    let args: READDIR4args = deserialize(input)?;
    let Ok(fh) = ctx.require_current_fh() else {
        return status_only(body, nfsstat4::NFS4ERR_NOFILEHANDLE);
    };
    if args.cookie == 1 || args.cookie == 2 {
        return status_only(body, nfsstat4::NFS4ERR_BAD_COOKIE);
    }
    if args.cookie != 0 && args.cookieverf != verifier4::default() {
        return status_only(body, nfsstat4::NFS4ERR_BAD_COOKIE);
    }
    if (args.maxcount as usize) <= RESULT_OVERHEAD {
        return status_only(body, nfsstat4::NFS4ERR_TOOSMALL);
    }
    debug!("op_readdir(cookie={}, maxcount={})", args.cookie, args.maxcount);

    let start_index = cookie_to_index(args.cookie);
    let (entries, exhausted) = match gather_entries(ctx, &fh, start_index, args.dircount).await {
        Ok(page) => page,
        Err(status) => return status_only(body, status),
    };

    let mut counting = WriteCounter::new(body);
    nfsstat4::NFS4_OK.serialize(&mut counting)?;
    verifier4::default().serialize(&mut counting)?;

    let max_bytes = args.maxcount as usize;
    let mut dircount_budget = args.dircount as usize;
    let mut emitted = 0usize;
    let mut truncated = false;
    for (index, name, source) in entries {
        let cookie = index + FIRST_COOKIE;
        let mut entry_buf: Vec<u8> = Vec::new();
        true.serialize(&mut entry_buf)?;
        cookie.serialize(&mut entry_buf)?;
        component4::from(name.as_slice()).serialize(&mut entry_buf)?;
        encode_attrs(&args.attr_request, &source)?.serialize(&mut entry_buf)?;

        let dircount_cost = 8 + 4 + name.len();
        // Terminator and eof flag still have to fit after this entry.
        let fits_bytes = counting.bytes_written() + entry_buf.len() + 8 <= max_bytes;
        let fits_dircount = args.dircount == 0 || dircount_cost <= dircount_budget;
        if !fits_bytes || !fits_dircount {
            trace!("readdir budget reached after {emitted} entries");
            truncated = true;
            break;
        }
        counting.write_all(&entry_buf)?;
        dircount_budget = dircount_budget.saturating_sub(dircount_cost);
        emitted += 1;
    }

    if emitted == 0 && truncated {
        // Not even one entry fits the requested budget.
        let body = counting.into_inner();
        body.clear();
        return status_only(body, nfsstat4::NFS4ERR_TOOSMALL);
    }

    false.serialize(&mut counting)?;
    let eof = exhausted && !truncated;
    eof.serialize(&mut counting)?;
    debug!("readdir emitted {emitted} entries, eof={eof}");
    Ok(nfsstat4::NFS4_OK)
}

/// Collects a page of entries starting at `start_index`, each with its
/// absolute index and attribute source.
async fn gather_entries(
    ctx: &CompoundContext<'_>,
    fh: &[u8],
    start_index: u64,
    dircount: u32,
) -> Result<(Vec<(u64, Vec<u8>, AttrSource)>, bool), nfsstat4> {
    let mut out = Vec::new();
    if pseudo::is_pseudo_handle(fh) {
        let node = ctx.rpc.pseudo.node_by_handle(fh).ok_or(nfsstat4::NFS4ERR_BADHANDLE)?;
        for (index, (name, child)) in ctx.rpc.pseudo.children(node).enumerate() {
            if (index as u64) < start_index {
                continue;
            }
            let source = match child {
                PseudoChild::Node(child_node) => {
                    ctx.rpc.pseudo.attributes(child_node, ctx.rpc.state.lease_seconds())
                }
                PseudoChild::Junction(export) => {
                    // A junction lists with the attributes of the export's
                    // real root.
                    let root = ctx
                        .rpc
                        .metadata
                        .root_handle(export)
                        .map_err(|e| e.nfsstat())?;
                    match ctx.rpc.metadata.get_file(&root).await {
                        Ok(record) => record_attr_source(ctx, &record),
                        Err(e) => return Err(e.nfsstat()),
                    }
                }
            };
            out.push((index as u64, name.to_vec(), source));
        }
        return Ok((out, true));
    }

    let page = ctx
        .rpc
        .metadata
        .read_directory(&ctx.auth(), fh, start_index, dircount.max(512))
        .await
        .map_err(|e| e.nfsstat())?;
    for (offset, entry) in page.entries.into_iter().enumerate() {
        let source = record_attr_source(ctx, &entry.file);
        out.push((start_index + offset as u64, entry.name, source));
    }
    Ok((out, !page.has_more))
}
