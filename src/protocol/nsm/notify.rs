//! Outbound SM_NOTIFY fan-out.
//!
//! On boot (or simulated crash) the monitor notifies every registrant that
//! this server's state changed, each over a fresh TCP connection with a
//! five-second total budget for dial plus I/O. A registrant that cannot be
//! reached is declared crashed: its registration is dropped and the crash
//! hook releases the NLM locks it held.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::protocol::xdr::{self, nsm, Serialize};

/// Dial-plus-I/O budget per notification target.
const NOTIFY_TIMEOUT: Duration = Duration::from_secs(5);

/// Sends SM_NOTIFY to every registrant in parallel. `local_name` is the
/// mon_name peers registered us under. Returns the number of targets that
/// could not be reached (each already handled as crashed).
pub async fn notify_all(monitor: &Arc<super::MonitorSet>, local_name: &str) -> usize {
    let state = monitor.state();
    let registrations = monitor.registrations();
    debug!(targets = registrations.len(), state, "dispatching SM_NOTIFY fan-out");

    let mut tasks = Vec::with_capacity(registrations.len());
    for registration in registrations {
        let monitor = Arc::clone(monitor);
        let local_name = local_name.to_string();
        tasks.push(tokio::spawn(async move {
            let target = registration.mon_id.mon_name.clone();
            let outcome =
                tokio::time::timeout(NOTIFY_TIMEOUT, send_notify(&registration, &local_name, state))
                    .await;
            match outcome {
                Ok(Ok(())) => {
                    debug!("SM_NOTIFY delivered to {:?}", target);
                    false
                }
                Ok(Err(e)) => {
                    warn!("SM_NOTIFY to {:?} failed: {e}", target);
                    monitor.client_crashed(&target);
                    true
                }
                Err(_) => {
                    warn!("SM_NOTIFY to {:?} timed out", target);
                    monitor.client_crashed(&target);
                    true
                }
            }
        }));
    }

    let mut failures = 0;
    for task in tasks {
        if task.await.unwrap_or(true) {
            failures += 1;
        }
    }
    failures
}

/// One SM_NOTIFY call: dial the registrant's callback address and invoke
/// the program/version/procedure it asked for, with AUTH_NULL credentials.
/// The reply is read and discarded to confirm delivery.
async fn send_notify(
    registration: &nsm::mon,
    local_name: &str,
    state: i32,
) -> Result<(), anyhow::Error> {
    let address = String::from_utf8_lossy(&registration.mon_id.my_id.my_name).into_owned();
    let mut socket = TcpStream::connect(&address).await?;

    let call = xdr::rpc::rpc_msg {
        xid: notify_xid(),
        body: xdr::rpc::rpc_body::CALL(xdr::rpc::call_body {
            rpcvers: xdr::rpc::RPC_VERSION,
            prog: registration.mon_id.my_id.my_prog,
            vers: registration.mon_id.my_id.my_vers,
            proc: registration.mon_id.my_id.my_proc,
            cred: xdr::rpc::opaque_auth::default(),
            verf: xdr::rpc::opaque_auth::default(),
        }),
    };
    let message = nsm::stat_chge {
        mon_name: local_name.as_bytes().to_vec(),
        state,
        private: registration.private,
    };

    let mut record = Vec::new();
    call.serialize(&mut record)?;
    message.serialize(&mut record)?;

    // Record marking: a single last fragment.
    let header = (record.len() as u32) | (1 << 31);
    socket.write_all(&header.to_be_bytes()).await?;
    socket.write_all(&record).await?;

    // Read the reply header and body, discarding the contents.
    let mut reply_header = [0u8; 4];
    socket.read_exact(&mut reply_header).await?;
    let reply_len = (u32::from_be_bytes(reply_header) & ((1 << 31) - 1)) as usize;
    let mut reply = vec![0u8; reply_len.min(4096)];
    socket.read_exact(&mut reply).await?;
    Ok(())
}

/// Transaction ids for notification calls; uniqueness within the process
/// lifetime is all the protocol needs.
fn notify_xid() -> u32 {
    use std::sync::atomic::{AtomicU32, Ordering};
    static NEXT: AtomicU32 = AtomicU32::new(0x534d_0001);
    NEXT.fetch_add(1, Ordering::Relaxed)
}
