//! Sessions, slot tables and connection bindings for NFSv4.1.
//!
//! Each channel of a session owns a fixed-size slot table negotiated at
//! CREATE_SESSION time. A slot carries the highest sequence id it has
//! observed, a busy flag serializing in-flight use, and an optional cached
//! reply served verbatim on exact replays.

use std::collections::HashMap;
use std::time::Instant;

use crate::protocol::xdr::nfs4::session::channel_attrs4;
use crate::protocol::xdr::nfs4::{clientid4, sequenceid4, sessionid4, slotid4};

use super::error::{Result, StateError};

/// One slot of a channel's slot table.
#[derive(Debug, Default)]
pub struct Slot {
    /// Highest sequence id accepted on this slot; 0 before first use.
    seqid: sequenceid4,
    /// Reply bytes of the last completed request, when caching was asked.
    cached_reply: Option<Vec<u8>>,
    /// Serializes concurrent use of the slot.
    busy: bool,
    /// Whether the request currently owning the slot asked for caching.
    cache_this: bool,
}

/// Outcome of [`SlotTable::accept`] for a well-formed request.
#[derive(Debug)]
pub enum SlotDisposition {
    /// A new in-order request; the slot is now busy.
    Fresh,
    /// An exact replay; serve these bytes verbatim.
    Replay(Vec<u8>),
}

/// A per-channel slot table.
#[derive(Debug)]
pub struct SlotTable {
    slots: Vec<Slot>,
}

impl SlotTable {
    pub fn new(size: u32) -> SlotTable {
        let mut slots = Vec::with_capacity(size as usize);
        slots.resize_with(size as usize, Slot::default);
        SlotTable { slots }
    }

    pub fn len(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn highest_slotid(&self) -> slotid4 {
        (self.slots.len() as u32).saturating_sub(1)
    }

    /// Applies the sequence rules to an incoming (slot, seqid) pair.
    ///
    /// `seqid == slot.seqid` is an exact replay, served from the cache or
    /// refused with RetryUncachedRep. `seqid == slot.seqid + 1` is the next
    /// in-order request and marks the slot busy. Anything else is
    /// misordered and leaves the slot untouched.
    pub fn accept(
        &mut self,
        slotid: slotid4,
        seqid: sequenceid4,
        cache_this: bool,
    ) -> Result<SlotDisposition> {
        let slot = self.slots.get_mut(slotid as usize).ok_or(StateError::BadSlot)?;
        if slot.busy {
            return Err(StateError::SlotBusy);
        }
        if seqid == slot.seqid {
            return match &slot.cached_reply {
                Some(reply) => Ok(SlotDisposition::Replay(reply.clone())),
                None => Err(StateError::RetryUncachedRep),
            };
        }
        if seqid == slot.seqid.wrapping_add(1) {
            slot.seqid = seqid;
            slot.busy = true;
            slot.cache_this = cache_this;
            slot.cached_reply = None;
            return Ok(SlotDisposition::Fresh);
        }
        Err(StateError::SeqMisordered)
    }

    /// Completes the in-flight request on a slot, storing the reply iff the
    /// accepted request asked for caching. Releases the busy flag.
    pub fn complete(&mut self, slotid: slotid4, reply: &[u8]) {
        if let Some(slot) = self.slots.get_mut(slotid as usize) {
            if slot.cache_this {
                slot.cached_reply = Some(reply.to_vec());
            }
            slot.busy = false;
        }
    }

    /// Releases a slot without caching, for failure paths after acceptance.
    pub fn abort(&mut self, slotid: slotid4) {
        if let Some(slot) = self.slots.get_mut(slotid as usize) {
            slot.busy = false;
        }
    }

    #[cfg(test)]
    pub fn is_busy(&self, slotid: slotid4) -> bool {
        self.slots.get(slotid as usize).map(|s| s.busy).unwrap_or(false)
    }
}

/// Which channels a connection serves for a session.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ChannelDirection {
    Fore,
    Back,
    Both,
}

impl ChannelDirection {
    pub fn serves_fore(&self) -> bool {
        matches!(self, ChannelDirection::Fore | ChannelDirection::Both)
    }
}

/// A session created by CREATE_SESSION.
#[derive(Debug)]
pub struct Session {
    pub id: sessionid4,
    pub clientid: clientid4,
    pub fore: SlotTable,
    pub back: Option<SlotTable>,
    pub fore_attrs: channel_attrs4,
    pub back_attrs: channel_attrs4,
    pub cb_program: u32,
    /// Security flavors acceptable on the back channel.
    pub cb_sec_flavors: Vec<u32>,
    /// Connection id -> direction bindings.
    pub bindings: HashMap<u64, ChannelDirection>,
    pub created_at: Instant,
    pub last_used: Instant,
}

impl Session {
    pub fn new(
        id: sessionid4,
        clientid: clientid4,
        fore_attrs: channel_attrs4,
        back_attrs: channel_attrs4,
        with_back_channel: bool,
        cb_program: u32,
        cb_sec_flavors: Vec<u32>,
    ) -> Session {
        let now = Instant::now();
        Session {
            id,
            clientid,
            fore: SlotTable::new(fore_attrs.ca_maxrequests),
            back: with_back_channel.then(|| SlotTable::new(back_attrs.ca_maxrequests)),
            fore_attrs,
            back_attrs,
            cb_program,
            cb_sec_flavors,
            bindings: HashMap::new(),
            created_at: now,
            last_used: now,
        }
    }

    /// True when at least one binding can carry fore-channel traffic.
    pub fn has_fore_connection(&self) -> bool {
        self.bindings.values().any(|dir| dir.serves_fore())
    }

    /// Whether the session can issue callbacks.
    pub fn callback_path_up(&self) -> bool {
        self.back.is_some()
            && self.bindings.values().any(|dir| {
                matches!(dir, ChannelDirection::Back | ChannelDirection::Both)
            })
    }
}
