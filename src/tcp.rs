//! TCP front end: accepts NFSv4 client connections, assembles the
//! per-connection RPC context, and runs the shared server machinery
//! (state manager, pseudo-fs, NSM monitor, lease sweeper).
//!
//! Configuration is programmatic: construct [`ServerOptions`], then
//! [`NfsTcpListener::bind`]. The listener owns the boot-time sequencing:
//! loading persisted NSM registrations, seeding the grace period from the
//! previous boot's client list, and dispatching the SM_NOTIFY fan-out.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::protocol::nsm::{notify, MonitorSet};
use crate::protocol::portmap::PortmapTable;
use crate::protocol::{rpc, xdr};
use crate::protocol::xdr::Serialize;
use crate::pseudo::PseudoFs;
use crate::state::{StateConfig, StateManager};
use crate::vfs::{NfsMetadata, PayloadStore};

/// File under the state directory holding NSM registrations.
const NSM_STATE_FILE: &str = "nsm-registrations";
/// File under the state directory holding the previous boot's client
/// owner list, used to seed the grace period.
const CLIENT_RECOVERY_FILE: &str = "client-recovery";

/// Server configuration consumed by [`NfsTcpListener::bind`].
#[derive(Clone, Debug)]
pub struct ServerOptions {
    /// Absolute export paths stitched into the pseudo-fs.
    pub exports: Vec<String>,
    pub lease_duration: Duration,
    /// Directory for the NSM registration store and client recovery list.
    /// Without one, both live in memory only.
    pub state_dir: Option<PathBuf>,
    /// Per-session connection-binding budget.
    pub max_connections_per_session: usize,
    /// Advertise RPCSEC_GSS (Kerberos) flavors in SECINFO.
    pub advertise_krb5: bool,
    /// The mon_name peers registered this server under; used in outbound
    /// SM_NOTIFY.
    pub hostname: String,
    /// Upper bound on NSM registrations.
    pub max_monitored_clients: usize,
}

impl Default for ServerOptions {
    fn default() -> ServerOptions {
        ServerOptions {
            exports: vec!["/export".to_string()],
            lease_duration: Duration::from_secs(90),
            state_dir: None,
            max_connections_per_session: 16,
            advertise_krb5: false,
            hostname: "nfs-sable".to_string(),
            max_monitored_clients: 1024,
        }
    }
}

/// Generates a local loopback IP address from a 16-bit host number.
/// Used for creating multiple local test addresses in the 127.88.x.y range.
pub fn generate_host_ip(hostnum: u16) -> String {
    format!("127.88.{}.{}", ((hostnum >> 8) & 0xFF) as u8, (hostnum & 0xFF) as u8)
}

/// Interface of the NFS TCP server.
#[async_trait]
pub trait NfsTcp: Send + Sync {
    /// The actual port the server is listening on (useful with port 0).
    fn get_listen_port(&self) -> u16;

    /// The IP address the server is listening on.
    fn get_listen_ip(&self) -> IpAddr;

    /// Accepts and serves client connections until the listener fails.
    async fn handle_forever(&self) -> io::Result<()>;
}

/// NFS TCP connection handler: accepts connections and processes NFSv4,
/// portmap and NSM RPC over them.
pub struct NfsTcpListener {
    listener: TcpListener,
    port: u16,
    metadata: Arc<dyn NfsMetadata>,
    payload: Arc<dyn PayloadStore>,
    state: Arc<StateManager>,
    pseudo: Arc<PseudoFs>,
    monitor: Arc<MonitorSet>,
    transaction_tracker: Arc<rpc::TransactionTracker>,
    portmap_table: Arc<RwLock<PortmapTable>>,
    next_conn_id: AtomicU64,
    options: ServerOptions,
}

impl NfsTcpListener {
    /// Binds the listener and assembles the shared server state.
    ///
    /// `ipstr` is "IP:PORT"; the special IP "auto" probes the 127.88.0.0/16
    /// range for a bindable local address.
    pub async fn bind(
        ipstr: &str,
        metadata: Arc<dyn NfsMetadata>,
        payload: Arc<dyn PayloadStore>,
        options: ServerOptions,
    ) -> io::Result<NfsTcpListener> {
        let (ip, port) = ipstr.split_once(':').ok_or_else(|| {
            io::Error::new(io::ErrorKind::AddrNotAvailable, "IP address must be of form ip:port")
        })?;
        let port = port.parse::<u16>().map_err(|_| {
            io::Error::new(io::ErrorKind::AddrNotAvailable, "port not in range 0..=65535")
        })?;

        if ip != "auto" {
            return NfsTcpListener::bind_internal(ip, port, metadata, payload, options).await;
        }
        const NUM_TRIES: u16 = 32;
        for try_ip in 1..=NUM_TRIES {
            let ip = generate_host_ip(try_ip);
            let result = NfsTcpListener::bind_internal(
                &ip,
                port,
                Arc::clone(&metadata),
                Arc::clone(&payload),
                options.clone(),
            )
            .await;
            if result.is_ok() {
                return result;
            }
        }
        Err(io::Error::other("can't bind automatically"))
    }

    async fn bind_internal(
        ip: &str,
        port: u16,
        metadata: Arc<dyn NfsMetadata>,
        payload: Arc<dyn PayloadStore>,
        options: ServerOptions,
    ) -> io::Result<NfsTcpListener> {
        let ipstr = format!("{ip}:{port}");
        let listener = TcpListener::bind(&ipstr).await?;
        info!("listening on {:?}", &ipstr);
        let port = match listener.local_addr()? {
            SocketAddr::V4(s) => s.port(),
            SocketAddr::V6(s) => s.port(),
        };

        let state = Arc::new(StateManager::new(StateConfig {
            lease_duration: options.lease_duration,
            max_connections_per_session: options.max_connections_per_session,
            ..Default::default()
        }));
        let boot_secs =
            SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64;
        let pseudo = Arc::new(
            PseudoFs::build(&options.exports, boot_secs)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?,
        );

        let monitor = match &options.state_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                Arc::new(MonitorSet::load(
                    dir.join(NSM_STATE_FILE),
                    options.max_monitored_clients,
                )?)
            }
            None => Arc::new(MonitorSet::new(options.max_monitored_clients)),
        };
        {
            // A crashed client's NLM locks are keyed by owner prefix.
            let state = Arc::clone(&state);
            monitor.set_crash_hook(Box::new(move |host| {
                let prefix = format!("nlm:{host}:");
                state.release_lock_owners_with_prefix(prefix.as_bytes());
            }));
        }

        if let Some(dir) = &options.state_dir {
            let previous = load_client_owners(&dir.join(CLIENT_RECOVERY_FILE))?;
            state.start_grace_period(previous);
        }

        Ok(NfsTcpListener {
            listener,
            port,
            metadata,
            payload,
            state,
            pseudo,
            monitor,
            transaction_tracker: Arc::new(rpc::TransactionTracker::new(Duration::from_secs(60))),
            portmap_table: Arc::new(RwLock::new(PortmapTable::seeded(port as u32))),
            next_conn_id: AtomicU64::new(1),
            options,
        })
    }

    /// The shared state manager, for embedding servers that want to
    /// observe or drive state directly.
    pub fn state_manager(&self) -> Arc<StateManager> {
        Arc::clone(&self.state)
    }

    /// The NSM monitor set.
    pub fn monitor(&self) -> Arc<MonitorSet> {
        Arc::clone(&self.monitor)
    }

    /// Sends SM_NOTIFY to every registrant from a previous boot.
    pub async fn notify_peers(&self) -> usize {
        notify::notify_all(&self.monitor, &self.options.hostname).await
    }

    fn make_context(&self, client_addr: String) -> rpc::Context {
        rpc::Context {
            local_port: self.port,
            client_addr,
            conn_id: self.next_conn_id.fetch_add(1, Ordering::Relaxed),
            auth: xdr::rpc::auth_unix::default(),
            metadata: Arc::clone(&self.metadata),
            payload: Arc::clone(&self.payload),
            state: Arc::clone(&self.state),
            pseudo: Arc::clone(&self.pseudo),
            monitor: Arc::clone(&self.monitor),
            transaction_tracker: Arc::clone(&self.transaction_tracker),
            portmap_table: Arc::clone(&self.portmap_table),
            cancelled: Arc::new(AtomicBool::new(false)),
            advertise_krb5: self.options.advertise_krb5,
        }
    }

    fn spawn_client_list_writer(&self) {
        let Some(dir) = self.options.state_dir.clone() else { return };
        let state = Arc::clone(&self.state);
        let period = self.options.lease_duration / 2;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period.max(Duration::from_secs(1)));
            loop {
                ticker.tick().await;
                let owners = state.live_client_owners();
                if let Err(e) = store_client_owners(&dir.join(CLIENT_RECOVERY_FILE), &owners) {
                    error!("failed to persist client recovery list: {e}");
                }
            }
        });
    }
}

/// Processes an established connection: pumps socket bytes into the
/// message handler and record-marked replies back out. On any exit the
/// connection's cancellation flag is raised and its session bindings
/// dropped.
async fn process_socket(
    mut socket: tokio::net::TcpStream,
    context: rpc::Context,
) -> Result<(), anyhow::Error> {
    let (mut message_handler, mut socksend, mut msgrecvchan) =
        rpc::SocketMessageHandler::new(&context);
    let _ = socket.set_nodelay(true);

    {
        let cancelled = Arc::clone(&context.cancelled);
        tokio::spawn(async move {
            loop {
                if let Err(e) = message_handler.read().await {
                    debug!("message loop broken due to {:?}", e);
                    cancelled.store(true, Ordering::Relaxed);
                    break;
                }
            }
        });
    }
    loop {
        tokio::select! {
            _ = socket.readable() => {
                let mut buf = [0; 128_000];
                match socket.try_read(&mut buf) {
                    Ok(0) => {
                        return Ok(());
                    }
                    Ok(n) => {
                        let _ = socksend.write_all(&buf[..n]).await;
                    }
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                        // spurious readiness
                    }
                    Err(e) => {
                        debug!("message handling closed: {:?}", e);
                        return Err(e.into());
                    }
                }
            },
            reply = msgrecvchan.recv() => {
                match reply {
                    Some(Err(e)) => {
                        debug!("message handling closed: {:?}", e);
                        return Err(e);
                    }
                    Some(Ok(msg)) => {
                        if let Err(e) = rpc::write_fragment(&mut socket, &msg).await {
                            error!("write error {:?}", e);
                        }
                    }
                    None => {
                        return Err(anyhow::anyhow!("unexpected socket context termination"));
                    }
                }
            }
        }
    }
}

#[async_trait]
impl NfsTcp for NfsTcpListener {
    fn get_listen_port(&self) -> u16 {
        self.listener.local_addr().map(|a| a.port()).unwrap_or(self.port)
    }

    fn get_listen_ip(&self) -> IpAddr {
        self.listener.local_addr().map(|a| a.ip()).unwrap_or(IpAddr::from([0, 0, 0, 0]))
    }

    async fn handle_forever(&self) -> io::Result<()> {
        StateManager::spawn_lease_sweeper(Arc::clone(&self.state));
        self.spawn_client_list_writer();
        // Tell everyone who watched the previous incarnation that state
        // changed; unreachable watchers are handled as crashed.
        let failures = self.notify_peers().await;
        if failures > 0 {
            info!(failures, "SM_NOTIFY fan-out found crashed clients");
        }

        loop {
            let (socket, _) = self.listener.accept().await?;
            let context = self.make_context(socket.peer_addr()?.to_string());
            info!("accepting connection from {}", context.client_addr);
            debug!("accepting socket {:?} {:?}", socket, context);
            let state = Arc::clone(&self.state);
            tokio::spawn(async move {
                let conn_id = context.conn_id;
                let cancelled = Arc::clone(&context.cancelled);
                let _ = process_socket(socket, context).await;
                cancelled.store(true, Ordering::Relaxed);
                state.connection_closed(conn_id);
            });
        }
    }
}

/// Reads the previous boot's client owner list.
fn load_client_owners(path: &std::path::Path) -> io::Result<Vec<Vec<u8>>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut cursor = std::io::Cursor::new(bytes);
    let count: u32 = xdr::deserialize(&mut cursor)?;
    let mut owners = Vec::with_capacity(count.min(4096) as usize);
    for _ in 0..count {
        owners.push(xdr::deserialize(&mut cursor)?);
    }
    Ok(owners)
}

/// Writes the live client owner list for the next boot's grace period.
fn store_client_owners(path: &std::path::Path, owners: &[Vec<u8>]) -> io::Result<()> {
    let mut bytes = Vec::new();
    (owners.len() as u32).serialize(&mut bytes)?;
    for owner in owners {
        owner.serialize(&mut bytes)?;
    }
    std::fs::write(path, bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_owner_list_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CLIENT_RECOVERY_FILE);
        let owners = vec![b"client-a".to_vec(), b"client-b".to_vec()];
        store_client_owners(&path, &owners).unwrap();
        assert_eq!(load_client_owners(&path).unwrap(), owners);
        assert!(load_client_owners(&dir.path().join("missing")).unwrap().is_empty());
    }
}
