//! NFS Sable - a user-space NFSv4.0 / NFSv4.1 server implementation in Rust.
//!
//! The crate exposes file systems over the network to NFSv4 clients. A
//! consumer implements the metadata collaborator (and optionally the
//! payload store) from [`vfs`], configures a set of export paths, and runs
//! the TCP listener.
//!
//! ## Main Components
//!
//! - `vfs`: the metadata and payload collaborator traits the engine is
//!   built against, with structured error kinds.
//!
//! - `pseudo`: the synthetic read-only directory tree linking the export
//!   paths into a single namespace rooted at `/`.
//!
//! - `state`: the NFSv4 state manager holding clients, sessions and slot
//!   tables, open-owners and opens, byte-range locks, delegations, leases
//!   and the boot-time grace period.
//!
//! - `protocol`: the COMPOUND engine, per-operation handlers, XDR codec,
//!   RPC framing and the portmap and NSM services.
//!
//! - `tcp`: the TCP listener tying it all together.
//!
//! ## Standards
//!
//! - RFC 7530: NFS version 4 protocol
//! - RFC 8881: NFS version 4.1 protocol (sessions, exactly-once semantics)
//! - RFC 5531: ONC RPC version 2
//! - RFC 4506: XDR external data representation
//! - XNFS, Version 3W: the Network Status Monitor sidecar

pub mod protocol;
mod write_counter;

pub mod pseudo;
pub mod state;
pub mod tcp;
pub mod vfs;

pub use protocol::xdr;
