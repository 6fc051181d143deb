//! The COMPOUND request engine: minor-version routing, v4.1 SEQUENCE
//! gating against the session slot table, and sequential dispatch of the
//! operation list with stop-on-first-failure semantics.
//!
//! The engine owns no state beyond the per-request context; every mutation
//! happens in the handlers or the state manager. Replies are assembled in
//! memory so a slot's reply cache can capture the exact bytes served.

use std::io::{Read, Write};

use num_traits::cast::FromPrimitive;
use tracing::{debug, trace, warn};

use crate::protocol::rpc;
use crate::protocol::xdr::nfs4::session::SEQUENCE4resok;
use crate::protocol::xdr::nfs4::{
    self, nfs_opnum4, nfsstat4, nfsstring, MAX_COMPOUND_OPS, NFS4_OPAQUE_LIMIT,
};
use crate::protocol::xdr::{self, deserialize, deserialize_opaque_max, Serialize};
use crate::state::session::SlotDisposition;

use super::ops;
use super::{CompoundContext, SessionSlot};

/// Main handler for the NFSv4 program: NULL and COMPOUND.
pub async fn handle_nfs4(
    xid: u32,
    call: xdr::rpc::call_body,
    input: &mut (impl Read + Send),
    output: &mut impl Write,
    context: &rpc::Context,
) -> Result<(), anyhow::Error> {
    if call.vers != nfs4::VERSION {
        warn!("Invalid NFS version {} != {}", call.vers, nfs4::VERSION);
        xdr::rpc::prog_mismatch_reply_message(xid, nfs4::VERSION).serialize(output)?;
        return Ok(());
    }
    match call.proc {
        // NFSPROC4_NULL
        0 => {
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            Ok(())
        }
        // NFSPROC4_COMPOUND
        1 => {
            let header = decode_compound_header(input);
            let (tag, minorversion, numops) = match header {
                Ok(parts) => parts,
                Err(e) => {
                    debug!("unparseable COMPOUND header: {e:?}");
                    xdr::rpc::garbage_args_reply_message(xid).serialize(output)?;
                    return Ok(());
                }
            };
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            let mut reply = Vec::new();
            process_compound(tag, minorversion, numops, input, &mut reply, context).await?;
            output.write_all(&reply)?;
            Ok(())
        }
        _ => {
            xdr::rpc::proc_unavail_reply_message(xid).serialize(output)?;
            Ok(())
        }
    }
}

fn decode_compound_header(
    input: &mut (impl Read + Send),
) -> std::io::Result<(nfsstring, u32, u32)> {
    let tag = nfsstring(deserialize_opaque_max(input, NFS4_OPAQUE_LIMIT)?);
    let minorversion: u32 = deserialize(input)?;
    let numops: u32 = deserialize(input)?;
    Ok((tag, minorversion, numops))
}

/// Runs one COMPOUND and writes the encoded COMPOUND4res into `reply`.
pub async fn process_compound(
    tag: nfsstring,
    minorversion: u32,
    numops: u32,
    input: &mut (impl Read + Send),
    reply: &mut Vec<u8>,
    context: &rpc::Context,
) -> Result<(), anyhow::Error> {
    debug!(
        "COMPOUND tag={:?} minor={} numops={} from {}",
        tag, minorversion, numops, context.client_addr
    );
    // The tag is echoed regardless of status.
    if minorversion > 1 {
        return finish(reply, nfsstat4::NFS4ERR_MINOR_VERS_MISMATCH, &tag, &[]);
    }
    if numops > MAX_COMPOUND_OPS {
        return finish(reply, nfsstat4::NFS4ERR_RESOURCE, &tag, &[]);
    }

    let mut ctx = CompoundContext::new(context, minorversion);
    let mut results: Vec<(nfs_opnum4, Vec<u8>)> = Vec::with_capacity(numops as usize);
    let mut status = nfsstat4::NFS4_OK;
    let mut pending_opcode: Option<nfs_opnum4> = None;
    let mut start_index = 0u32;

    // Minor version 1 requires SEQUENCE first unless the opener is one of
    // the session-management operations.
    if minorversion == 1 && numops > 0 {
        let raw: u32 = match deserialize(input) {
            Ok(raw) => raw,
            Err(_) => {
                return finish(reply, nfsstat4::NFS4ERR_BADXDR, &tag, &[]);
            }
        };
        match nfs_opnum4::from_u32(raw) {
            Some(nfs_opnum4::OP_SEQUENCE) => {
                start_index = 1;
                let args = match ops::op_sequence_args(input) {
                    Ok(args) => args,
                    Err(_) => {
                        let mut body = Vec::new();
                        nfsstat4::NFS4ERR_BADXDR.serialize(&mut body)?;
                        results.push((nfs_opnum4::OP_SEQUENCE, body));
                        return finish(reply, nfsstat4::NFS4ERR_BADXDR, &tag, &results);
                    }
                };
                match context.state.sequence_accept(
                    args.sa_sessionid,
                    args.sa_slotid,
                    args.sa_sequenceid,
                    args.sa_cachethis,
                    context.conn_id,
                ) {
                    Err(e) => {
                        let seq_status = e.nfsstat();
                        let mut body = Vec::new();
                        seq_status.serialize(&mut body)?;
                        results.push((nfs_opnum4::OP_SEQUENCE, body));
                        return finish(reply, seq_status, &tag, &results);
                    }
                    Ok(accept) => match accept.disposition {
                        SlotDisposition::Replay(cached) => {
                            // Serve the cached reply byte-for-byte; the
                            // COMPOUND is not re-executed.
                            trace!("slot replay, serving {} cached bytes", cached.len());
                            reply.extend_from_slice(&cached);
                            return Ok(());
                        }
                        SlotDisposition::Fresh => {
                            let mut body = Vec::new();
                            nfsstat4::NFS4_OK.serialize(&mut body)?;
                            SEQUENCE4resok {
                                sr_sessionid: args.sa_sessionid,
                                sr_sequenceid: args.sa_sequenceid,
                                sr_slotid: args.sa_slotid,
                                sr_highest_slotid: accept.highest_slotid,
                                sr_target_highest_slotid: accept.target_highest_slotid,
                                sr_status_flags: accept.status_flags,
                            }
                            .serialize(&mut body)?;
                            results.push((nfs_opnum4::OP_SEQUENCE, body));
                            ctx.session = Some(SessionSlot {
                                sessionid: args.sa_sessionid,
                                slotid: args.sa_slotid,
                                cache_this: args.sa_cachethis,
                            });
                            // The session slot supplants per-owner seqid
                            // replay detection.
                            ctx.skip_owner_seqid = true;
                            ctx.session_client =
                                context.state.session_client(args.sa_sessionid).ok();
                        }
                    },
                }
            }
            Some(op) if op.is_session_exempt() => {
                pending_opcode = Some(op);
            }
            Some(_) | None => {
                return finish(reply, nfsstat4::NFS4ERR_OP_NOT_IN_SESSION, &tag, &[]);
            }
        }
    }

    for index in start_index..numops {
        // The cancellation signal is checked between operations; a dead
        // connection aborts without a wire response.
        if ctx.rpc.cancelled.load(std::sync::atomic::Ordering::Relaxed) {
            if let Some(slot) = ctx.session {
                context.state.sequence_abort(slot.sessionid, slot.slotid);
            }
            anyhow::bail!("compound aborted: connection cancelled");
        }

        let opcode = match pending_opcode.take() {
            Some(op) => op,
            None => {
                let raw: u32 = match deserialize(input) {
                    Ok(raw) => raw,
                    Err(_) => {
                        status = nfsstat4::NFS4ERR_BADXDR;
                        let mut body = Vec::new();
                        status.serialize(&mut body)?;
                        results.push((nfs_opnum4::OP_ILLEGAL, body));
                        break;
                    }
                };
                match nfs_opnum4::from_u32(raw) {
                    Some(op) => op,
                    None => {
                        status = nfsstat4::NFS4ERR_OP_ILLEGAL;
                        let mut body = Vec::new();
                        status.serialize(&mut body)?;
                        results.push((nfs_opnum4::OP_ILLEGAL, body));
                        break;
                    }
                }
            }
        };
        trace!("op[{index}] = {opcode:?}");

        // Version gates: v4.1-only operations inside a v4.0 COMPOUND and
        // the removed v4.0 operations inside a v4.1 COMPOUND are refused;
        // a SEQUENCE anywhere but first is a position error.
        let gate = if opcode == nfs_opnum4::OP_ILLEGAL {
            Some(nfsstat4::NFS4ERR_OP_ILLEGAL)
        } else if minorversion == 0 && opcode.is_minor_one_only() {
            Some(nfsstat4::NFS4ERR_NOTSUPP)
        } else if minorversion == 1 && opcode.is_removed_in_minor_one() {
            Some(nfsstat4::NFS4ERR_NOTSUPP)
        } else if minorversion == 1 && opcode == nfs_opnum4::OP_SEQUENCE {
            Some(nfsstat4::NFS4ERR_SEQUENCE_POS)
        } else {
            None
        };
        if let Some(gate_status) = gate {
            status = gate_status;
            let mut body = Vec::new();
            status.serialize(&mut body)?;
            results.push((opcode, body));
            break;
        }

        let mut body = Vec::new();
        match ops::dispatch_op(&mut ctx, opcode, input, &mut body).await {
            Ok(op_status) => {
                status = op_status;
                results.push((opcode, body));
                if status != nfsstat4::NFS4_OK {
                    break;
                }
            }
            Err(e) => {
                // Argument decoding failed mid-operation; nothing after it
                // in the stream can be trusted.
                debug!("op {opcode:?} failed to decode: {e:?}");
                status = nfsstat4::NFS4ERR_BADXDR;
                body.clear();
                status.serialize(&mut body)?;
                results.push((opcode, body));
                break;
            }
        }
    }

    finish(reply, status, &tag, &results)?;
    if let Some(slot) = ctx.session {
        context.state.sequence_complete(slot.sessionid, slot.slotid, reply);
    }
    Ok(())
}

/// Encodes the COMPOUND4res: status, echoed tag, and the gathered results.
fn finish(
    reply: &mut Vec<u8>,
    status: nfsstat4,
    tag: &nfsstring,
    results: &[(nfs_opnum4, Vec<u8>)],
) -> Result<(), anyhow::Error> {
    status.serialize(reply)?;
    tag.serialize(reply)?;
    (results.len() as u32).serialize(reply)?;
    for (opcode, body) in results {
        opcode.serialize(reply)?;
        reply.extend_from_slice(body);
    }
    Ok(())
}
