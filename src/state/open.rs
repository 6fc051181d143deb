//! Open-owners and open state: share reservations scoped to
//! (client, owner, file) triples, with the v4.0 per-owner replay cache.

use crate::protocol::xdr::nfs4::{clientid4, sequenceid4, stateid4};

use super::error::{Result, StateError};

/// Owners are keyed by the client id plus the client-supplied opaque blob.
pub type OwnerKey = (clientid4, Vec<u8>);

/// The cached result of an owner's last mutating operation, replayed when
/// a v4.0 client retransmits the same seqid.
#[derive(Clone, Debug)]
pub struct CachedReply {
    pub seqid: sequenceid4,
    /// The encoded operation result body, status included.
    pub body: Vec<u8>,
}

/// Outcome of an owner seqid check.
#[derive(Debug)]
pub enum SeqidCheck {
    /// The next in-order request.
    InOrder,
    /// An exact retransmission of the owner's last request.
    Replay(Vec<u8>),
}

/// An open-owner: the client-scoped identity opens are charged to.
#[derive(Debug)]
pub struct OpenOwner {
    pub key: OwnerKey,
    /// v4.0 owners are unconfirmed until OPEN_CONFIRM.
    pub confirmed: bool,
    pub seqid: sequenceid4,
    pub last_reply: Option<CachedReply>,
    /// True until the owner's first accepted request fixes the seqid base.
    fresh: bool,
}

impl OpenOwner {
    pub fn new(key: OwnerKey) -> OpenOwner {
        OpenOwner { key, confirmed: false, seqid: 0, last_reply: None, fresh: true }
    }

    /// Applies the v4.0 owner seqid rules: the successor advances, the
    /// last-seen value replays, anything else is NFS4ERR_BAD_SEQID. A fresh
    /// owner accepts whatever seqid the client starts with. Callers inside
    /// a v4.1 COMPOUND skip this entirely (the session slot already
    /// provides exactly-once semantics).
    pub fn check_seqid(&mut self, seqid: sequenceid4) -> Result<SeqidCheck> {
        if self.fresh {
            self.fresh = false;
            self.seqid = seqid;
            return Ok(SeqidCheck::InOrder);
        }
        if seqid == self.seqid.wrapping_add(1) {
            self.seqid = seqid;
            return Ok(SeqidCheck::InOrder);
        }
        if seqid == self.seqid {
            if let Some(cached) = &self.last_reply {
                return Ok(SeqidCheck::Replay(cached.body.clone()));
            }
        }
        Err(StateError::BadSeqid)
    }

    /// Records the reply for the owner's current seqid.
    pub fn record_reply(&mut self, body: Vec<u8>) {
        self.last_reply = Some(CachedReply { seqid: self.seqid, body });
    }
}

/// One open of a file by one open-owner.
#[derive(Clone, Debug)]
pub struct OpenState {
    pub stateid: stateid4,
    pub owner: OwnerKey,
    pub fh: Vec<u8>,
    /// OPEN4_SHARE_ACCESS_* bits.
    pub access: u32,
    /// OPEN4_SHARE_DENY_* bits.
    pub deny: u32,
}

impl OpenState {
    /// Whether a new open with the given bits conflicts with this one.
    /// Symmetric: each side's deny bits are checked against the other
    /// side's access bits.
    pub fn share_conflict(&self, access: u32, deny: u32) -> bool {
        (self.deny & access) != 0 || (deny & self.access) != 0
    }
}
