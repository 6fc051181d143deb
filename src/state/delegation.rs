//! Delegation tracking: one grant per (client, file), with read grants
//! coexisting across clients and at most one write grant per file
//! server-wide.

use std::time::Instant;

use crate::protocol::xdr::nfs4::{clientid4, stateid4};

/// The kinds of delegation this server grants.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DelegationType {
    Read,
    Write,
}

/// One granted delegation.
#[derive(Clone, Debug)]
pub struct Delegation {
    pub stateid: stateid4,
    pub clientid: clientid4,
    pub fh: Vec<u8>,
    pub dtype: DelegationType,
    pub granted_at: Instant,
    /// Set when a recall has been dispatched; the grant stays on the books
    /// until DELEGRETURN.
    pub recalled: bool,
}

impl Delegation {
    /// Whether an open by `requester` with the given share-access bits
    /// conflicts with this grant. A write delegation conflicts with any
    /// other client's open; a read delegation only with writes.
    pub fn conflicts_with(&self, requester: clientid4, wants_write: bool) -> bool {
        if self.clientid == requester {
            return false;
        }
        match self.dtype {
            DelegationType::Write => true,
            DelegationType::Read => wants_write,
        }
    }
}
