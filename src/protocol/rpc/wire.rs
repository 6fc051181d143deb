//! RPC message framing and dispatch over TCP, per the RFC 5531 record
//! marking standard.
//!
//! Incoming fragments are reassembled into records, queued for ordered
//! processing, and routed by program number to the NFSv4, portmap or NSM
//! handlers. Replies are written back as record-marked fragments.

use std::io::Cursor;
use std::io::{Read, Write};

use anyhow::anyhow;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

use crate::protocol::rpc::command_queue::{CommandQueue, CommandResult, ResponseBuffer};
use crate::protocol::xdr::{self, deserialize, nfs4, nsm, portmap, Serialize};
use crate::protocol::{nfs4 as nfs4_proto, nsm as nsm_proto, portmap as portmap_proto, rpc};

/// RPC program number for the Network Lock Manager. Advertised in portmap
/// but not served; the blocking-lock queue lives outside this server.
const NLM_PROGRAM: u32 = 100021;

/// Initial size of RPC response buffers.
const DEFAULT_RESPONSE_BUFFER_CAPACITY: usize = 8192;

/// Processes a single RPC record: deserializes the message, validates the
/// RPC version, decodes credentials, suppresses retransmissions and routes
/// the call by program number.
///
/// Returns true if a response was produced, false for suppressed
/// retransmissions.
pub async fn handle_rpc(
    input: &mut (impl Read + Send),
    output: &mut impl Write,
    mut context: rpc::Context,
) -> Result<bool, anyhow::Error> {
    let recv = deserialize::<xdr::rpc::rpc_msg, _>(input)?;
    let xid = recv.xid;
    let xdr::rpc::rpc_body::CALL(call) = recv.body else {
        error!("unexpectedly received a Reply instead of a Call");
        return Err(anyhow!("bad RPC call format"));
    };
    if call.rpcvers != xdr::rpc::RPC_VERSION {
        warn!("invalid RPC version {} != {}", call.rpcvers, xdr::rpc::RPC_VERSION);
        xdr::rpc::rpc_vers_mismatch(xid).serialize(output)?;
        return Ok(true);
    }
    match call.cred.flavor {
        xdr::rpc::auth_flavor::AUTH_NULL => {}
        xdr::rpc::auth_flavor::AUTH_UNIX => {
            context.auth = deserialize(&mut Cursor::new(&call.cred.body))?;
        }
        _ => {
            warn!("rejecting credentials with flavor {:?}", call.cred.flavor);
            xdr::rpc::auth_error_reply_message(xid, xdr::rpc::auth_stat::AUTH_TOOWEAK)
                .serialize(output)?;
            return Ok(true);
        }
    }

    if context.transaction_tracker.is_retransmission(xid, &context.client_addr) {
        debug!("retransmission detected, xid: {}, client: {}", xid, context.client_addr);
        return Ok(false);
    }

    let res = match call.prog {
        nfs4::PROGRAM => nfs4_proto::handle_nfs4(xid, call, input, output, &context).await,
        portmap::PROGRAM => portmap_proto::handle_portmap(xid, &call, input, output, &context),
        nsm::PROGRAM => nsm_proto::handle_nsm(xid, &call, input, output, &context).await,
        NLM_PROGRAM => {
            trace!("NLM call answered PROG_UNAVAIL");
            xdr::rpc::prog_unavail_reply_message(xid).serialize(output)?;
            Ok(())
        }
        unknown => {
            warn!("unknown RPC program number {unknown}");
            xdr::rpc::prog_unavail_reply_message(xid).serialize(output)?;
            Ok(())
        }
    }
    .map(|_| true);
    context.transaction_tracker.mark_processed(xid, &context.client_addr);
    res
}

/// Reads one record-marked fragment, appending its payload to `append_to`.
/// Returns true when it was the record's last fragment.
async fn read_fragment(
    socket: &mut DuplexStream,
    append_to: &mut Vec<u8>,
) -> Result<bool, anyhow::Error> {
    let mut header_buf = [0_u8; 4];
    socket.read_exact(&mut header_buf).await?;
    let fragment_header = u32::from_be_bytes(header_buf);
    let is_last = (fragment_header & (1 << 31)) > 0;
    let length = (fragment_header & ((1 << 31) - 1)) as usize;
    trace!("reading fragment length:{}, last:{}", length, is_last);
    if append_to.len().saturating_add(length) > rpc::MAX_RPC_RECORD_LENGTH {
        return Err(anyhow!(
            "RPC record length {} exceeds max {}",
            length,
            rpc::MAX_RPC_RECORD_LENGTH
        ));
    }
    let start_offset = append_to.len();
    append_to.resize(append_to.len() + length, 0);
    socket.read_exact(&mut append_to[start_offset..]).await?;
    Ok(is_last)
}

/// Writes a reply as record-marked fragments.
pub async fn write_fragment(
    socket: &mut tokio::net::TcpStream,
    buf: &[u8],
) -> Result<(), anyhow::Error> {
    const MAX_FRAGMENT_SIZE: usize = (1 << 31) - 1;

    let mut offset = 0;
    while offset < buf.len() {
        let remaining = buf.len() - offset;
        let fragment_size = std::cmp::min(remaining, MAX_FRAGMENT_SIZE);
        let is_last = offset + fragment_size >= buf.len();
        let fragment_header =
            if is_last { fragment_size as u32 + (1 << 31) } else { fragment_size as u32 };

        socket.write_all(&u32::to_be_bytes(fragment_header)).await?;
        trace!("writing fragment length:{}, last:{}", fragment_size, is_last);
        socket.write_all(&buf[offset..offset + fragment_size]).await?;
        offset += fragment_size;
    }

    Ok(())
}

pub type SocketMessageType = Result<Vec<u8>, anyhow::Error>;

/// Reassembles record-marked RPC messages from a connection and feeds them
/// through the FIFO command queue.
#[derive(Debug)]
pub struct SocketMessageHandler {
    cur_fragment: Vec<u8>,
    socket_receive_channel: DuplexStream,
    context: rpc::Context,
    command_queue: CommandQueue,
}

impl SocketMessageHandler {
    /// Creates the handler plus the duplex stream the transport writes
    /// socket bytes into and the channel replies drain from.
    pub fn new(
        context: &rpc::Context,
    ) -> (Self, DuplexStream, mpsc::UnboundedReceiver<SocketMessageType>) {
        let (socksend, sockrecv) = tokio::io::duplex(256_000);
        let (msgsend, msgrecv) = mpsc::unbounded_channel();
        let (result_sender, mut result_receiver) = mpsc::unbounded_channel::<CommandResult>();

        let command_queue =
            CommandQueue::new(process_rpc_command, result_sender, DEFAULT_RESPONSE_BUFFER_CAPACITY);

        // Drain command results into the reply channel in order.
        tokio::spawn(async move {
            while let Some(result) = result_receiver.recv().await {
                match result {
                    Ok(Some(response)) if response.has_content() => {
                        let _ = msgsend.send(Ok(response.into_inner()));
                    }
                    Ok(Some(_)) | Ok(None) => {
                        // Nothing to send (retransmission or empty buffer).
                    }
                    Err(e) => {
                        error!("RPC error: {:?}", e);
                        let _ = msgsend.send(Err(e));
                    }
                }
            }
            debug!("command result handler finished");
        });

        (
            Self {
                cur_fragment: Vec::new(),
                socket_receive_channel: sockrecv,
                context: context.clone(),
                command_queue,
            },
            socksend,
            msgrecv,
        )
    }

    /// Reads one fragment; when a record completes, submits it for ordered
    /// processing. Call in a loop.
    pub async fn read(&mut self) -> Result<(), anyhow::Error> {
        let is_last =
            read_fragment(&mut self.socket_receive_channel, &mut self.cur_fragment).await?;
        if is_last {
            let record = std::mem::take(&mut self.cur_fragment);
            let context = self.context.clone();
            if let Err(e) = self.command_queue.submit_command(record, context) {
                error!("failed to submit command to queue: {:?}", e);
                return Err(anyhow!("command queue error: {}", e));
            }
        }
        Ok(())
    }
}

/// The processor function the command queue runs for each record.
pub fn process_rpc_command<'a>(
    data: &[u8],
    output: &'a mut ResponseBuffer,
    context: rpc::Context,
) -> futures::future::BoxFuture<'a, anyhow::Result<bool>> {
    let data_clone = data.to_vec();
    Box::pin(async move {
        let mut input_cursor = Cursor::new(data_clone);
        let output_buffer = output.get_mut_buffer();
        let mut output_cursor = Cursor::new(output_buffer);
        handle_rpc(&mut input_cursor, &mut output_cursor, context).await
    })
}
