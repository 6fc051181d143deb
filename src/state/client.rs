//! Client records: the per-client identity, lease and confirmation
//! lifecycle shared by the v4.0 (SETCLIENTID) and v4.1 (EXCHANGE_ID)
//! registration paths.

use std::collections::HashSet;
use std::time::Instant;

use crate::protocol::xdr::nfs4::{clientid4, sessionid4, verifier4};

/// One registered client.
#[derive(Debug)]
pub struct ClientRecord {
    pub clientid: clientid4,
    /// The client-supplied opaque owner identifier (co_ownerid / id).
    pub owner: Vec<u8>,
    /// The client's boot verifier; a changed verifier on re-registration
    /// means the client rebooted.
    pub verifier: verifier4,
    /// Server-minted confirmation verifier (v4.0 SETCLIENTID_CONFIRM).
    pub confirm_verifier: verifier4,
    /// CREATE_SESSION / confirmation sequence.
    pub sequence: u32,
    pub confirmed: bool,
    pub created_at: Instant,
    pub last_renewed: Instant,
    /// v4.0 callback program; zero when unusable.
    pub callback_program: u32,
    /// Minor version the client registered under.
    pub minor_version: u32,
    pub sessions: HashSet<sessionid4>,
    /// Cached CREATE_SESSION reply for the sequence-replay case.
    pub last_session_reply: Option<(u32, Vec<u8>)>,
    /// Set once the client finished reclaiming after a restart.
    pub reclaim_complete: bool,
}

impl ClientRecord {
    pub fn new(
        clientid: clientid4,
        owner: Vec<u8>,
        verifier: verifier4,
        confirm_verifier: verifier4,
        minor_version: u32,
    ) -> ClientRecord {
        let now = Instant::now();
        ClientRecord {
            clientid,
            owner,
            verifier,
            confirm_verifier,
            sequence: 0,
            confirmed: false,
            created_at: now,
            last_renewed: now,
            callback_program: 0,
            minor_version,
            sessions: HashSet::new(),
            last_session_reply: None,
            reclaim_complete: false,
        }
    }

    /// Whether the lease has run out, measured against `lease_duration`.
    pub fn lease_expired(&self, lease_duration: std::time::Duration) -> bool {
        self.last_renewed.elapsed() > lease_duration
    }

    pub fn renew(&mut self) {
        self.last_renewed = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn fresh_record_is_unconfirmed_with_live_lease() {
        let rec = ClientRecord::new(7, b"owner".to_vec(), [1; 8], [2; 8], 1);
        assert!(!rec.confirmed);
        assert!(!rec.lease_expired(Duration::from_secs(60)));
    }

    #[test]
    fn zero_duration_lease_expires() {
        let rec = ClientRecord::new(7, b"owner".to_vec(), [1; 8], [2; 8], 0);
        std::thread::sleep(Duration::from_millis(2));
        assert!(rec.lease_expired(Duration::from_millis(1)));
    }
}
