//! RPC-level transaction tracking, keyed by (xid, client address).
//!
//! TCP clients retransmit whole RPC calls when replies are slow; processing
//! a non-idempotent call twice would corrupt state, so the first sighting
//! of an (xid, client) pair claims it and later sightings are dropped.
//! Completed entries age out after the retention period; in-progress
//! entries are kept regardless of age.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

/// Tracks RPC transactions to detect and suppress retransmissions.
pub struct TransactionTracker {
    retention_period: Duration,
    transactions: Mutex<HashMap<(u32, String), TransactionState>>,
}

enum TransactionState {
    InProgress,
    Completed(SystemTime),
}

impl TransactionTracker {
    pub fn new(retention_period: Duration) -> Self {
        Self { retention_period, transactions: Mutex::new(HashMap::new()) }
    }

    /// Returns true when the (xid, client) pair has been seen before; a
    /// fresh pair is claimed as in-progress.
    pub fn is_retransmission(&self, xid: u32, client_addr: &str) -> bool {
        let key = (xid, client_addr.to_string());
        let mut transactions =
            self.transactions.lock().expect("unable to lock transactions mutex");
        housekeeping(&mut transactions, self.retention_period);
        if let std::collections::hash_map::Entry::Vacant(entry) = transactions.entry(key) {
            entry.insert(TransactionState::InProgress);
            false
        } else {
            true
        }
    }

    /// Moves a transaction from in-progress to completed, starting its
    /// retention clock.
    pub fn mark_processed(&self, xid: u32, client_addr: &str) {
        let key = (xid, client_addr.to_string());
        let mut transactions =
            self.transactions.lock().expect("unable to lock transactions mutex");
        if let Some(state) = transactions.get_mut(&key) {
            *state = TransactionState::Completed(SystemTime::now());
        }
    }
}

fn housekeeping(
    transactions: &mut HashMap<(u32, String), TransactionState>,
    max_age: Duration,
) {
    let cutoff = SystemTime::now() - max_age;
    transactions.retain(|_, state| match state {
        TransactionState::InProgress => true,
        TransactionState::Completed(at) => *at >= cutoff,
    });
}
