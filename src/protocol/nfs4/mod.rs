//! NFSv4 protocol implementation: the COMPOUND engine and the
//! per-operation handlers for minor versions 0 and 1.
//!
//! The RPC layer hands a COMPOUND's raw argument bytes to
//! [`compound::handle_nfs4`]; the engine decodes the header, applies
//! minor-version routing and v4.1 SEQUENCE gating, then dispatches the
//! operation list sequentially. All server state flows through the request
//! context assembled here; handlers own no state of their own.

use crate::protocol::rpc;
use crate::protocol::xdr::nfs4::{clientid4, nfsstat4, sessionid4, slotid4};
use crate::vfs::AuthContext;

pub mod compound;
pub mod ops;

pub use compound::handle_nfs4;

/// The session slot a v4.1 COMPOUND is executing under.
#[derive(Copy, Clone, Debug)]
pub struct SessionSlot {
    pub sessionid: sessionid4,
    pub slotid: slotid4,
    pub cache_this: bool,
}

/// Mutable per-request state threaded through the operations of one
/// COMPOUND: the current and saved filehandles plus the session context.
pub struct CompoundContext<'a> {
    pub rpc: &'a rpc::Context,
    pub minor_version: u32,
    pub current_fh: Option<Vec<u8>>,
    pub saved_fh: Option<Vec<u8>>,
    /// Set when a SEQUENCE was accepted: the session slot supplies
    /// exactly-once semantics, so per-owner seqid checks are bypassed.
    pub skip_owner_seqid: bool,
    pub session: Option<SessionSlot>,
    /// The client behind the session, for handlers that need an identity
    /// without an explicit clientid argument.
    pub session_client: Option<clientid4>,
}

impl<'a> CompoundContext<'a> {
    pub fn new(rpc: &'a rpc::Context, minor_version: u32) -> CompoundContext<'a> {
        CompoundContext {
            rpc,
            minor_version,
            current_fh: None,
            saved_fh: None,
            skip_owner_seqid: false,
            session: None,
            session_client: None,
        }
    }

    /// The current filehandle, or the error every handler maps its absence
    /// to.
    pub fn require_current_fh(&self) -> Result<Vec<u8>, nfsstat4> {
        self.current_fh.clone().ok_or(nfsstat4::NFS4ERR_NOFILEHANDLE)
    }

    /// The caller identity for the metadata collaborator.
    pub fn auth(&self) -> AuthContext {
        AuthContext {
            uid: self.rpc.auth.uid,
            gid: self.rpc.auth.gid,
            gids: self.rpc.auth.gids.clone(),
        }
    }

    /// The client identity an operation should charge state to: the
    /// session's client under v4.1, the wire-supplied one otherwise.
    pub fn effective_clientid(&self, from_args: clientid4) -> clientid4 {
        self.session_client.unwrap_or(from_args)
    }
}
