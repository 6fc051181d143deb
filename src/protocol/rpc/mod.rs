//! RPC (Remote Procedure Call) protocol plumbing as specified in RFC 5531.
//!
//! This layer provides record-marked message framing over TCP, transaction
//! tracking for retransmission suppression, AUTH_UNIX credential handling,
//! program dispatching to the NFSv4, portmap and NSM services, and ordered
//! command processing with FIFO reply guarantees.

mod command_queue;
mod context;
mod transaction_tracker;
mod wire;

pub use context::Context;
pub use transaction_tracker::TransactionTracker;
pub use wire::{write_fragment, SocketMessageHandler};

/// Upper bound on a reassembled RPC record. Anything larger is treated as
/// a protocol violation and drops the connection.
pub const MAX_RPC_RECORD_LENGTH: usize = 8 * 1024 * 1024;
