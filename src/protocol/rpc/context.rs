//! The per-connection RPC context: everything a protocol handler needs to
//! authenticate, authorize and execute a request.
//!
//! Each accepted connection gets its own context. The shared server pieces
//! (state manager, pseudo-fs, collaborators, portmap table, NSM monitor
//! set) are behind `Arc`s; the per-connection pieces (address, connection
//! id, credentials, cancellation flag) are plain fields.

use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, RwLock};

use crate::protocol::nsm::MonitorSet;
use crate::protocol::portmap::PortmapTable;
use crate::protocol::xdr;
use crate::pseudo::PseudoFs;
use crate::state::StateManager;
use crate::vfs;

/// Represents the execution context for RPC operations.
///
/// Cloned per request; the clone is cheap (Arcs and small fields) and the
/// AUTH_UNIX credentials are patched in per call.
#[derive(Clone)]
pub struct Context {
    /// Port number on which the server is listening
    pub local_port: u16,

    /// Client's network address (IP:port) used for logging and request tracking
    pub client_addr: String,

    /// Server-unique identity of the underlying connection; session
    /// bindings and cancellation key off it
    pub conn_id: u64,

    /// UNIX-style authentication credentials from the client
    pub auth: xdr::rpc::auth_unix,

    /// The metadata collaborator backing the exported namespace
    pub metadata: Arc<dyn vfs::NfsMetadata>,

    /// The payload collaborator backing file contents
    pub payload: Arc<dyn vfs::PayloadStore>,

    /// The NFSv4 state manager
    pub state: Arc<StateManager>,

    /// The immutable pseudo-fs junction tree
    pub pseudo: Arc<PseudoFs>,

    /// The NSM registration store and state counter
    pub monitor: Arc<MonitorSet>,

    /// Transaction state tracker for handling RPC-level retransmissions
    pub transaction_tracker: Arc<super::TransactionTracker>,

    /// Portmap table storing program-to-port mappings
    pub portmap_table: Arc<RwLock<PortmapTable>>,

    /// Set when the connection dies; checked between COMPOUND operations
    pub cancelled: Arc<AtomicBool>,

    /// Advertise RPCSEC_GSS (Kerberos) flavors in SECINFO replies
    pub advertise_krb5: bool,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("rpc::Context")
            .field("local_port", &self.local_port)
            .field("client_addr", &self.client_addr)
            .field("conn_id", &self.conn_id)
            .field("auth", &self.auth)
            .finish()
    }
}
