//! The NFSv4 state manager: client identity lifecycle, sessions and slot
//! tables, open-owners and opens, byte-range locks, delegations, lease
//! renewal, stateid minting/validation and the server grace period.
//!
//! State is split into two reader-writer domains: the client domain
//! (clients, sessions, connection bindings) and the file domain (opens,
//! locks, delegations, keyed by filehandle). Mutations on one client or one
//! file are linearizable under the owning domain lock; the pseudo-fs and
//! wire layers never touch these maps directly.
//!
//! Identifier scheme: client ids and stateids embed the server boot epoch
//! so references from an earlier server instance are detected as stale
//! rather than misdirected.

pub mod client;
pub mod delegation;
pub mod error;
pub mod lock;
pub mod open;
pub mod session;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use crate::protocol::xdr::nfs4::file::{OPEN4_SHARE_ACCESS_WRITE, OPEN4_SHARE_DENY_NONE};
use crate::protocol::xdr::nfs4::lock::{nfs_lock_type4, lock_owner4, LOCK4denied};
use crate::protocol::xdr::nfs4::session::{channel_attrs4, CREATE_SESSION4resok};
use crate::protocol::xdr::nfs4::{
    clientid4, sequenceid4, sessionid4, slotid4, stateid4, verifier4, NFS4_OTHER_SIZE,
};

use client::ClientRecord;
use delegation::{Delegation, DelegationType};
use error::{Result, StateError};
use lock::{LockOwner, LockRange, LockState};
use open::{OpenOwner, OpenState, OwnerKey, SeqidCheck};
use session::{ChannelDirection, Session, SlotDisposition};

/// Tunables for the state manager. The defaults fit a small deployment;
/// the TCP listener builder exposes the interesting ones.
#[derive(Clone, Debug)]
pub struct StateConfig {
    pub lease_duration: Duration,
    /// Upper bound on negotiated slot-table sizes.
    pub max_session_slots: u32,
    /// Upper bound on negotiated response sizes.
    pub max_response_size: u32,
    /// Upper bound on negotiated cached-response sizes.
    pub max_cached_response_size: u32,
    /// Upper bound on operations per COMPOUND a channel may carry.
    pub max_ops_per_compound: u32,
    /// Per-session connection-binding budget.
    pub max_connections_per_session: usize,
}

impl Default for StateConfig {
    fn default() -> StateConfig {
        StateConfig {
            lease_duration: Duration::from_secs(90),
            max_session_slots: 64,
            max_response_size: 1024 * 1024,
            max_cached_response_size: 64 * 1024,
            max_ops_per_compound: 128,
            max_connections_per_session: 16,
        }
    }
}

/// Outcome of an OPEN processed by the state manager.
#[derive(Debug)]
pub enum OpenOutcome {
    /// A granted open: the stateid to return and whether the owner was
    /// created by this call (v4.0 clients must then OPEN_CONFIRM).
    Granted { stateid: stateid4, new_owner: bool },
    /// A v4.0 retransmission; serve these bytes as the op result.
    Replay(Vec<u8>),
}

/// Outcome of CREATE_SESSION's multi-case algorithm.
#[derive(Debug)]
pub enum CreateSessionOutcome {
    Fresh(CREATE_SESSION4resok),
    /// Sequence replay: the cached result body, to be emitted verbatim.
    Replay(Vec<u8>),
}

/// What SEQUENCE acceptance tells the COMPOUND engine.
#[derive(Debug)]
pub struct SequenceAccept {
    pub disposition: SlotDisposition,
    pub highest_slotid: slotid4,
    pub target_highest_slotid: slotid4,
    pub status_flags: u32,
}

struct ClientDomain {
    clients: HashMap<clientid4, ClientRecord>,
    by_owner: HashMap<Vec<u8>, clientid4>,
    sessions: HashMap<sessionid4, Session>,
    /// Each connection belongs to at most one session.
    conn_sessions: HashMap<u64, sessionid4>,
}

struct FileDomain {
    open_owners: HashMap<OwnerKey, OpenOwner>,
    opens: HashMap<[u8; NFS4_OTHER_SIZE], OpenState>,
    opens_by_file: HashMap<Vec<u8>, Vec<[u8; NFS4_OTHER_SIZE]>>,
    lock_owners: HashMap<OwnerKey, LockOwner>,
    lock_states: HashMap<[u8; NFS4_OTHER_SIZE], LockState>,
    lock_state_index: HashMap<(OwnerKey, Vec<u8>), [u8; NFS4_OTHER_SIZE]>,
    locks_by_file: HashMap<Vec<u8>, Vec<LockRange>>,
    delegations: HashMap<[u8; NFS4_OTHER_SIZE], Delegation>,
}

struct Grace {
    active: bool,
    started: Instant,
    /// Owner identifiers from the previous boot that have not yet sent
    /// RECLAIM_COMPLETE.
    pending: HashSet<Vec<u8>>,
}

/// The state manager. One instance per server; shared by every connection.
pub struct StateManager {
    config: StateConfig,
    /// 8 bytes derived from wall-clock at startup; returned in WRITE and
    /// COMMIT responses so clients detect restart.
    boot_verifier: verifier4,
    /// Boot epoch embedded in client ids and stateids.
    epoch: u32,
    next_clientid: AtomicU64,
    next_stateid: AtomicU64,
    next_sessionid: AtomicU64,
    clients: RwLock<ClientDomain>,
    files: RwLock<FileDomain>,
    grace: Mutex<Grace>,
}

impl StateManager {
    pub fn new(config: StateConfig) -> StateManager {
        let boot_unix =
            SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO).as_secs();
        let mut boot_verifier = [0u8; 8];
        boot_verifier.copy_from_slice(&boot_unix.to_be_bytes());
        StateManager {
            config,
            boot_verifier,
            epoch: boot_unix as u32,
            next_clientid: AtomicU64::new(1),
            next_stateid: AtomicU64::new(1),
            next_sessionid: AtomicU64::new(1),
            clients: RwLock::new(ClientDomain {
                clients: HashMap::new(),
                by_owner: HashMap::new(),
                sessions: HashMap::new(),
                conn_sessions: HashMap::new(),
            }),
            files: RwLock::new(FileDomain {
                open_owners: HashMap::new(),
                opens: HashMap::new(),
                opens_by_file: HashMap::new(),
                lock_owners: HashMap::new(),
                lock_states: HashMap::new(),
                lock_state_index: HashMap::new(),
                locks_by_file: HashMap::new(),
                delegations: HashMap::new(),
            }),
            grace: Mutex::new(Grace {
                active: false,
                started: Instant::now(),
                pending: HashSet::new(),
            }),
        }
    }

    pub fn config(&self) -> &StateConfig {
        &self.config
    }

    pub fn boot_verifier(&self) -> verifier4 {
        self.boot_verifier
    }

    pub fn lease_seconds(&self) -> u32 {
        self.config.lease_duration.as_secs() as u32
    }

    fn mint_clientid(&self) -> clientid4 {
        let seq = self.next_clientid.fetch_add(1, Ordering::Relaxed);
        ((self.epoch as u64) << 32) | (seq & 0xffff_ffff)
    }

    fn clientid_epoch(clientid: clientid4) -> u32 {
        (clientid >> 32) as u32
    }

    fn mint_other(&self) -> [u8; NFS4_OTHER_SIZE] {
        let seq = self.next_stateid.fetch_add(1, Ordering::Relaxed);
        let mut other = [0u8; NFS4_OTHER_SIZE];
        other[..4].copy_from_slice(&self.epoch.to_be_bytes());
        other[4..].copy_from_slice(&seq.to_be_bytes());
        other
    }

    fn other_epoch(other: &[u8; NFS4_OTHER_SIZE]) -> u32 {
        u32::from_be_bytes(other[..4].try_into().unwrap())
    }

    fn mint_sessionid(&self, clientid: clientid4) -> sessionid4 {
        let seq = self.next_sessionid.fetch_add(1, Ordering::Relaxed) as u32;
        let mut id = [0u8; 16];
        id[..8].copy_from_slice(&clientid.to_be_bytes());
        id[8..12].copy_from_slice(&seq.to_be_bytes());
        id[12..].copy_from_slice(&self.epoch.to_be_bytes());
        id
    }

    fn confirm_verifier_for(&self, clientid: clientid4) -> verifier4 {
        let mut v = [0u8; 8];
        v[..4].copy_from_slice(&self.epoch.to_be_bytes());
        v[4..].copy_from_slice(&(clientid as u32).to_be_bytes());
        v
    }

    // ------------------------------------------------------------------
    // Client registration
    // ------------------------------------------------------------------

    /// EXCHANGE_ID: creates or rebinds a client record. A matching owner
    /// with a new boot verifier supersedes the old record and invalidates
    /// its state ("client reboot"). Returns the client id, the sequence the
    /// client must use in CREATE_SESSION, and whether the record was
    /// already confirmed.
    pub fn exchange_id(
        &self,
        owner: &[u8],
        verifier: verifier4,
    ) -> Result<(clientid4, sequenceid4, bool)> {
        let mut domain = self.clients.write().unwrap();
        if let Some(&existing_id) = domain.by_owner.get(owner) {
            let existing = domain.clients.get(&existing_id).expect("owner index out of sync");
            if existing.verifier == verifier {
                let seq = existing.sequence.wrapping_add(1).max(1);
                let confirmed = existing.confirmed;
                return Ok((existing_id, seq, confirmed));
            }
            // New boot verifier: the client restarted. Quarantine the old
            // incarnation's state and start over.
            info!(clientid = existing_id, "client re-registered with new verifier, purging state");
            let stale = existing_id;
            self.purge_client_locked(&mut domain, stale);
        }
        let clientid = self.mint_clientid();
        let record = ClientRecord::new(
            clientid,
            owner.to_vec(),
            verifier,
            self.confirm_verifier_for(clientid),
            1,
        );
        domain.by_owner.insert(owner.to_vec(), clientid);
        domain.clients.insert(clientid, record);
        debug!(clientid, "registered v4.1 client");
        Ok((clientid, 1, false))
    }

    /// SETCLIENTID (v4.0): like EXCHANGE_ID but returning the confirmation
    /// verifier the client must echo in SETCLIENTID_CONFIRM.
    pub fn setclientid(
        &self,
        owner: &[u8],
        verifier: verifier4,
        callback_program: u32,
    ) -> Result<(clientid4, verifier4)> {
        let mut domain = self.clients.write().unwrap();
        if let Some(&existing_id) = domain.by_owner.get(owner) {
            let existing = domain.clients.get(&existing_id).expect("owner index out of sync");
            if existing.verifier != verifier {
                info!(clientid = existing_id, "v4.0 client rebooted, purging state");
                self.purge_client_locked(&mut domain, existing_id);
            } else {
                let confirm = existing.confirm_verifier;
                return Ok((existing_id, confirm));
            }
        }
        let clientid = self.mint_clientid();
        let mut record = ClientRecord::new(
            clientid,
            owner.to_vec(),
            verifier,
            self.confirm_verifier_for(clientid),
            0,
        );
        record.callback_program = callback_program;
        let confirm = record.confirm_verifier;
        domain.by_owner.insert(owner.to_vec(), clientid);
        domain.clients.insert(clientid, record);
        debug!(clientid, "registered v4.0 client");
        Ok((clientid, confirm))
    }

    /// SETCLIENTID_CONFIRM (v4.0).
    pub fn setclientid_confirm(&self, clientid: clientid4, confirm: verifier4) -> Result<()> {
        self.check_clientid_epoch(clientid)?;
        let mut domain = self.clients.write().unwrap();
        let record = domain.clients.get_mut(&clientid).ok_or(StateError::StaleClientId)?;
        if record.confirm_verifier != confirm {
            return Err(StateError::StaleClientId);
        }
        record.confirmed = true;
        record.renew();
        Ok(())
    }

    /// RENEW (v4.0) and the implicit renewal every validated stateid buys.
    pub fn renew_lease(&self, clientid: clientid4) -> Result<()> {
        self.check_clientid_epoch(clientid)?;
        let mut domain = self.clients.write().unwrap();
        let record = domain.clients.get_mut(&clientid).ok_or(StateError::ExpiredState)?;
        record.renew();
        Ok(())
    }

    /// DESTROY_CLIENTID (v4.1): only permitted once the client holds no
    /// sessions and no file state.
    pub fn destroy_clientid(&self, clientid: clientid4) -> Result<()> {
        self.check_clientid_epoch(clientid)?;
        let mut domain = self.clients.write().unwrap();
        let record = domain.clients.get(&clientid).ok_or(StateError::StaleClientId)?;
        if !record.sessions.is_empty() {
            return Err(StateError::ClientidBusy);
        }
        let has_file_state = {
            let files = self.files.read().unwrap();
            files.opens.values().any(|o| o.owner.0 == clientid)
                || files.lock_states.values().any(|l| l.owner.0 == clientid)
                || files.delegations.values().any(|d| d.clientid == clientid)
        };
        if has_file_state {
            return Err(StateError::ClientidBusy);
        }
        let owner = record.owner.clone();
        domain.clients.remove(&clientid);
        domain.by_owner.remove(&owner);
        Ok(())
    }

    fn check_clientid_epoch(&self, clientid: clientid4) -> Result<()> {
        if Self::clientid_epoch(clientid) != self.epoch {
            return Err(StateError::StaleClientId);
        }
        Ok(())
    }

    /// Removes a client record and everything it owns. Caller holds the
    /// client-domain write lock.
    fn purge_client_locked(&self, domain: &mut ClientDomain, clientid: clientid4) {
        if let Some(record) = domain.clients.remove(&clientid) {
            domain.by_owner.remove(&record.owner);
            for sessionid in record.sessions {
                domain.sessions.remove(&sessionid);
                domain.conn_sessions.retain(|_, bound| *bound != sessionid);
            }
        }
        let mut files = self.files.write().unwrap();
        Self::purge_client_file_state(&mut files, clientid);
    }

    fn purge_client_file_state(files: &mut FileDomain, clientid: clientid4) {
        let open_ids: Vec<[u8; NFS4_OTHER_SIZE]> = files
            .opens
            .iter()
            .filter(|(_, open)| open.owner.0 == clientid)
            .map(|(id, _)| *id)
            .collect();
        for id in open_ids {
            Self::drop_open_locked(files, id);
        }
        files.open_owners.retain(|key, _| key.0 != clientid);
        files.lock_owners.retain(|key, _| key.0 != clientid);
        files.delegations.retain(|_, d| d.clientid != clientid);
        for ranges in files.locks_by_file.values_mut() {
            ranges.retain(|r| r.owner.0 != clientid);
        }
        files.locks_by_file.retain(|_, ranges| !ranges.is_empty());
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    /// CREATE_SESSION, following the RFC 8881 sequence cases: the
    /// successor sequence creates, the current sequence replays the cached
    /// result, anything else is misordered. Channel attributes are bounded
    /// by the server maxima before the session is built.
    pub fn create_session(
        &self,
        clientid: clientid4,
        sequence: sequenceid4,
        want_back_channel: bool,
        fore_attrs: &channel_attrs4,
        back_attrs: &channel_attrs4,
        cb_program: u32,
        cb_sec_flavors: Vec<u32>,
        conn_id: u64,
    ) -> Result<CreateSessionOutcome> {
        self.check_clientid_epoch(clientid)?;
        let mut domain = self.clients.write().unwrap();
        let record = domain.clients.get_mut(&clientid).ok_or(StateError::StaleClientId)?;
        if sequence == record.sequence {
            if let Some((_, cached)) = &record.last_session_reply {
                return Ok(CreateSessionOutcome::Replay(cached.clone()));
            }
            return Err(StateError::SeqMisordered);
        }
        if sequence != record.sequence.wrapping_add(1) {
            return Err(StateError::SeqMisordered);
        }
        record.sequence = sequence;
        record.confirmed = true;
        record.renew();

        let fore = self.bound_channel_attrs(fore_attrs);
        let back = self.bound_channel_attrs(back_attrs);
        let sessionid = self.mint_sessionid(clientid);
        let mut session = Session::new(
            sessionid,
            clientid,
            fore.clone(),
            back.clone(),
            want_back_channel,
            cb_program,
            cb_sec_flavors,
        );
        // The creating connection is fore-bound automatically; with a
        // back channel requested it serves both directions.
        let dir =
            if want_back_channel { ChannelDirection::Both } else { ChannelDirection::Fore };
        session.bindings.insert(conn_id, dir);
        if let Some(previous) = domain.conn_sessions.insert(conn_id, sessionid) {
            if let Some(old) = domain.sessions.get_mut(&previous) {
                old.bindings.remove(&conn_id);
            }
        }

        let record = domain.clients.get_mut(&clientid).expect("record vanished");
        record.sessions.insert(sessionid);
        let resok = CREATE_SESSION4resok {
            csr_sessionid: sessionid,
            csr_sequence: sequence,
            csr_flags: if want_back_channel {
                crate::protocol::xdr::nfs4::session::CREATE_SESSION4_FLAG_CONN_BACK_CHAN
            } else {
                0
            },
            csr_fore_chan_attrs: fore,
            csr_back_chan_attrs: back,
        };
        domain.sessions.insert(sessionid, session);
        info!(clientid, sessionid = ?sessionid, "session created");
        Ok(CreateSessionOutcome::Fresh(resok))
    }

    /// Stores the encoded CREATE_SESSION result for sequence replays.
    pub fn record_session_reply(&self, clientid: clientid4, body: Vec<u8>) {
        let mut domain = self.clients.write().unwrap();
        if let Some(record) = domain.clients.get_mut(&clientid) {
            let sequence = record.sequence;
            record.last_session_reply = Some((sequence, body));
        }
    }

    fn bound_channel_attrs(&self, requested: &channel_attrs4) -> channel_attrs4 {
        channel_attrs4 {
            ca_headerpadsize: 0,
            ca_maxrequestsize: requested.ca_maxrequestsize.min(self.config.max_response_size),
            ca_maxresponsesize: requested.ca_maxresponsesize.min(self.config.max_response_size),
            ca_maxresponsesize_cached: requested
                .ca_maxresponsesize_cached
                .min(self.config.max_cached_response_size),
            ca_maxoperations: requested.ca_maxoperations.min(self.config.max_ops_per_compound),
            ca_maxrequests: requested.ca_maxrequests.clamp(1, self.config.max_session_slots),
            ca_rdma_ird: Vec::new(),
        }
    }

    /// DESTROY_SESSION: releases slot tables and connection bindings but
    /// not the client's opens or locks.
    pub fn destroy_session(&self, sessionid: sessionid4) -> Result<()> {
        let mut domain = self.clients.write().unwrap();
        let session = domain.sessions.remove(&sessionid).ok_or(StateError::BadSession)?;
        domain.conn_sessions.retain(|_, bound| *bound != sessionid);
        if let Some(record) = domain.clients.get_mut(&session.clientid) {
            record.sessions.remove(&sessionid);
            record.renew();
        }
        info!(sessionid = ?sessionid, "session destroyed");
        Ok(())
    }

    /// BIND_CONN_TO_SESSION. Rebinding to a new session silently unbinds
    /// from the old; a full binding table is a resource error.
    pub fn bind_connection(
        &self,
        conn_id: u64,
        sessionid: sessionid4,
        direction: ChannelDirection,
    ) -> Result<ChannelDirection> {
        let mut domain = self.clients.write().unwrap();
        if let Some(previous) = domain.conn_sessions.get(&conn_id).copied() {
            if previous != sessionid {
                if let Some(old) = domain.sessions.get_mut(&previous) {
                    old.bindings.remove(&conn_id);
                }
                domain.conn_sessions.remove(&conn_id);
            }
        }
        let max = self.config.max_connections_per_session;
        let session = domain.sessions.get_mut(&sessionid).ok_or(StateError::BadSession)?;
        if !session.bindings.contains_key(&conn_id) && session.bindings.len() >= max {
            return Err(StateError::ResourceExhausted);
        }
        let granted = match (direction, session.back.is_some()) {
            (ChannelDirection::Back | ChannelDirection::Both, false) => ChannelDirection::Fore,
            (dir, _) => dir,
        };
        session.bindings.insert(conn_id, granted);
        domain.conn_sessions.insert(conn_id, sessionid);
        Ok(granted)
    }

    /// Drops every binding a disconnected connection held.
    pub fn connection_closed(&self, conn_id: u64) {
        let mut domain = self.clients.write().unwrap();
        if let Some(sessionid) = domain.conn_sessions.remove(&conn_id) {
            if let Some(session) = domain.sessions.get_mut(&sessionid) {
                session.bindings.remove(&conn_id);
            }
        }
    }

    /// SEQUENCE acceptance: validates the session, applies the slot rules,
    /// auto-binds an unbound connection to the fore channel and renews the
    /// client lease.
    pub fn sequence_accept(
        &self,
        sessionid: sessionid4,
        slotid: slotid4,
        seqid: sequenceid4,
        cache_this: bool,
        conn_id: u64,
    ) -> Result<SequenceAccept> {
        let mut domain = self.clients.write().unwrap();
        let max_conns = self.config.max_connections_per_session;
        let session = domain.sessions.get_mut(&sessionid).ok_or(StateError::BadSession)?;
        if !session.bindings.contains_key(&conn_id) && session.bindings.len() < max_conns {
            session.bindings.insert(conn_id, ChannelDirection::Fore);
        }
        session.last_used = Instant::now();
        let disposition = session.fore.accept(slotid, seqid, cache_this)?;
        let highest = session.fore.highest_slotid();
        let clientid = session.clientid;
        domain.conn_sessions.entry(conn_id).or_insert(sessionid);
        if let Some(record) = domain.clients.get_mut(&clientid) {
            record.renew();
        }
        Ok(SequenceAccept {
            disposition,
            highest_slotid: highest,
            target_highest_slotid: highest,
            status_flags: 0,
        })
    }

    /// Completes the slot after the COMPOUND finishes, caching the reply
    /// iff the accepted request asked for it.
    pub fn sequence_complete(&self, sessionid: sessionid4, slotid: slotid4, reply: &[u8]) {
        let mut domain = self.clients.write().unwrap();
        if let Some(session) = domain.sessions.get_mut(&sessionid) {
            session.fore.complete(slotid, reply);
        }
    }

    /// Releases the slot busy flag on failure paths past acceptance.
    pub fn sequence_abort(&self, sessionid: sessionid4, slotid: slotid4) {
        let mut domain = self.clients.write().unwrap();
        if let Some(session) = domain.sessions.get_mut(&sessionid) {
            session.fore.abort(slotid);
        }
    }

    /// The clientid behind a session, for handlers running inside one.
    pub fn session_client(&self, sessionid: sessionid4) -> Result<clientid4> {
        let domain = self.clients.read().unwrap();
        domain.sessions.get(&sessionid).map(|s| s.clientid).ok_or(StateError::BadSession)
    }

    /// Whether the client can receive callbacks (delegation grants key off
    /// this): a v4.1 session with a bound back channel, or a v4.0 callback
    /// program.
    pub fn callback_path_up(&self, clientid: clientid4) -> bool {
        let domain = self.clients.read().unwrap();
        if let Some(record) = domain.clients.get(&clientid) {
            if record.minor_version == 0 {
                return record.callback_program != 0;
            }
            return record
                .sessions
                .iter()
                .filter_map(|sid| domain.sessions.get(sid))
                .any(|s| s.callback_path_up());
        }
        false
    }

    // ------------------------------------------------------------------
    // Grace period and reclaim
    // ------------------------------------------------------------------

    /// Starts the boot-time grace period protecting the listed previous
    /// client owners. With no previous clients there is nothing to
    /// reclaim and no grace window at all.
    pub fn start_grace_period(&self, previous_owners: Vec<Vec<u8>>) {
        let mut grace = self.grace.lock().unwrap();
        grace.pending = previous_owners.into_iter().collect();
        grace.active = !grace.pending.is_empty();
        grace.started = Instant::now();
        if grace.active {
            info!(clients = grace.pending.len(), "grace period started");
        }
    }

    /// Whether the grace window is still open.
    pub fn grace_active(&self) -> bool {
        let mut grace = self.grace.lock().unwrap();
        if grace.active
            && (grace.pending.is_empty()
                || grace.started.elapsed() > self.config.lease_duration)
        {
            info!("grace period ended");
            grace.active = false;
        }
        grace.active
    }

    /// Applies the grace gate: reclaims outside grace fail NO_GRACE, new
    /// state during grace fails GRACE.
    pub fn check_grace(&self, reclaim: bool) -> Result<()> {
        let active = self.grace_active();
        match (active, reclaim) {
            (true, false) => Err(StateError::GraceActive),
            (false, true) => Err(StateError::NoGrace),
            _ => Ok(()),
        }
    }

    /// RECLAIM_COMPLETE: the client is done reclaiming; once every listed
    /// client reports in, grace ends early.
    pub fn reclaim_complete(&self, clientid: clientid4) -> Result<()> {
        self.check_clientid_epoch(clientid)?;
        let owner = {
            let mut domain = self.clients.write().unwrap();
            let record = domain.clients.get_mut(&clientid).ok_or(StateError::StaleClientId)?;
            if record.reclaim_complete {
                return Err(StateError::CompleteAlready);
            }
            record.reclaim_complete = true;
            record.renew();
            record.owner.clone()
        };
        let mut grace = self.grace.lock().unwrap();
        grace.pending.remove(&owner);
        Ok(())
    }

    /// Whether a reclaim from this owner is consistent with the
    /// previous-boot client list.
    fn reclaim_allowed(&self, owner: &[u8]) -> bool {
        let grace = self.grace.lock().unwrap();
        grace.pending.contains(owner)
    }

    // ------------------------------------------------------------------
    // Opens
    // ------------------------------------------------------------------

    /// OPEN: share-reservation admission, owner seqid discipline (v4.0),
    /// stateid minting and the grace gate for reclaims.
    #[allow(clippy::too_many_arguments)]
    pub fn open_file(
        &self,
        clientid: clientid4,
        owner: &[u8],
        seqid: sequenceid4,
        skip_owner_seqid: bool,
        fh: &[u8],
        access: u32,
        deny: u32,
        reclaim: bool,
    ) -> Result<OpenOutcome> {
        if access == 0 {
            return Err(StateError::Inval);
        }
        self.check_clientid_epoch(clientid)?;
        self.require_confirmed_client(clientid, skip_owner_seqid)?;
        self.check_grace(reclaim)?;
        if reclaim {
            let client_owner = {
                let domain = self.clients.read().unwrap();
                domain.clients.get(&clientid).map(|r| r.owner.clone())
            };
            match client_owner {
                Some(client_owner) if self.reclaim_allowed(&client_owner) => {}
                _ => return Err(StateError::ReclaimBad),
            }
        }
        self.renew_lease(clientid)?;

        let key: OwnerKey = (clientid, owner.to_vec());
        let mut files = self.files.write().unwrap();

        let mut new_owner = false;
        if !files.open_owners.contains_key(&key) {
            files.open_owners.insert(key.clone(), OpenOwner::new(key.clone()));
            new_owner = true;
        }
        if !skip_owner_seqid {
            let open_owner = files.open_owners.get_mut(&key).expect("owner just ensured");
            match open_owner.check_seqid(seqid)? {
                SeqidCheck::InOrder => {}
                SeqidCheck::Replay(body) => return Ok(OpenOutcome::Replay(body)),
            }
        }

        // Share-deny admission precedes stateid allocation.
        let conflicting = files
            .opens_by_file
            .get(fh)
            .into_iter()
            .flatten()
            .filter_map(|id| files.opens.get(id))
            .any(|open| open.owner != key && open.share_conflict(access, deny));
        if conflicting {
            return Err(StateError::ShareDenied);
        }

        // An existing open by this owner is upgraded in place; its stateid
        // seqid advances on the mutation.
        let existing = files
            .opens_by_file
            .get(fh)
            .into_iter()
            .flatten()
            .filter_map(|id| files.opens.get(id))
            .find(|open| open.owner == key)
            .map(|open| open.stateid.other);
        let stateid = match existing {
            Some(other) => {
                let open = files.opens.get_mut(&other).expect("index out of sync");
                open.access |= access;
                open.deny |= deny;
                open.stateid.seqid = open.stateid.seqid.wrapping_add(1).max(1);
                open.stateid
            }
            None => {
                let other = self.mint_other();
                let stateid = stateid4 { seqid: 1, other };
                files.opens.insert(
                    other,
                    OpenState { stateid, owner: key.clone(), fh: fh.to_vec(), access, deny },
                );
                files.opens_by_file.entry(fh.to_vec()).or_default().push(other);
                stateid
            }
        };
        Ok(OpenOutcome::Granted { stateid, new_owner })
    }

    /// Caches the encoded OPEN result body for v4.0 owner replays.
    pub fn record_open_reply(&self, clientid: clientid4, owner: &[u8], body: Vec<u8>) {
        let key: OwnerKey = (clientid, owner.to_vec());
        let mut files = self.files.write().unwrap();
        if let Some(open_owner) = files.open_owners.get_mut(&key) {
            open_owner.record_reply(body);
        }
    }

    /// OPEN_CONFIRM (v4.0): confirms a freshly created open-owner.
    pub fn open_confirm(&self, stateid: &stateid4, seqid: sequenceid4) -> Result<stateid4> {
        let mut files = self.files.write().unwrap();
        let open = files.opens.get_mut(&stateid.other).ok_or(StateError::BadStateid)?;
        Self::check_stateid_seq(stateid, open.stateid.seqid)?;
        let key = open.owner.clone();
        open.stateid.seqid = open.stateid.seqid.wrapping_add(1).max(1);
        let confirmed_id = open.stateid;
        let owner = files.open_owners.get_mut(&key).ok_or(StateError::BadStateid)?;
        match owner.check_seqid(seqid)? {
            SeqidCheck::InOrder => {}
            SeqidCheck::Replay(_) => return Err(StateError::BadSeqid),
        }
        owner.confirmed = true;
        drop(files);
        self.renew_lease(key.0)?;
        Ok(confirmed_id)
    }

    /// OPEN_DOWNGRADE: the new bits must be a subset of the current bits.
    pub fn downgrade_open(
        &self,
        stateid: &stateid4,
        seqid: sequenceid4,
        skip_owner_seqid: bool,
        access: u32,
        deny: u32,
    ) -> Result<stateid4> {
        let mut files = self.files.write().unwrap();
        let open = files.opens.get_mut(&stateid.other).ok_or(StateError::BadStateid)?;
        Self::check_stateid_seq(stateid, open.stateid.seqid)?;
        if access & !open.access != 0 || deny & !open.deny != 0 || access == 0 {
            return Err(StateError::Inval);
        }
        let key = open.owner.clone();
        open.access = access;
        open.deny = deny;
        open.stateid.seqid = open.stateid.seqid.wrapping_add(1).max(1);
        let downgraded = open.stateid;
        if !skip_owner_seqid {
            let owner = files.open_owners.get_mut(&key).ok_or(StateError::BadStateid)?;
            match owner.check_seqid(seqid)? {
                SeqidCheck::InOrder => {}
                SeqidCheck::Replay(_) => return Err(StateError::BadSeqid),
            }
        }
        drop(files);
        self.renew_lease(key.0)?;
        Ok(downgraded)
    }

    /// CLOSE: removes the open state and every lock its derived lock
    /// owners held on the file. Returns the zeroed stateid.
    pub fn close_file(
        &self,
        stateid: &stateid4,
        seqid: sequenceid4,
        skip_owner_seqid: bool,
    ) -> Result<stateid4> {
        let mut files = self.files.write().unwrap();
        let open = files.opens.get(&stateid.other).ok_or(StateError::BadStateid)?;
        Self::check_stateid_seq(stateid, open.stateid.seqid)?;
        let key = open.owner.clone();
        if !skip_owner_seqid {
            let owner = files.open_owners.get_mut(&key).ok_or(StateError::BadStateid)?;
            match owner.check_seqid(seqid)? {
                SeqidCheck::InOrder => {}
                SeqidCheck::Replay(_) => return Err(StateError::BadSeqid),
            }
        }
        Self::drop_open_locked(&mut files, stateid.other);
        drop(files);
        self.renew_lease(key.0)?;
        Ok(stateid4::anonymous())
    }

    /// Removes one open and the lock state derived from it. Caller holds
    /// the file-domain write lock.
    fn drop_open_locked(files: &mut FileDomain, open_other: [u8; NFS4_OTHER_SIZE]) {
        let Some(open) = files.opens.remove(&open_other) else { return };
        if let Some(ids) = files.opens_by_file.get_mut(&open.fh) {
            ids.retain(|id| *id != open_other);
            if ids.is_empty() {
                files.opens_by_file.remove(&open.fh);
            }
        }
        // Locks ride on the open: drop the lock states derived from it and
        // their held ranges.
        let derived: Vec<[u8; NFS4_OTHER_SIZE]> = files
            .lock_states
            .iter()
            .filter(|(_, ls)| ls.open_other == open_other)
            .map(|(id, _)| *id)
            .collect();
        for id in derived {
            if let Some(ls) = files.lock_states.remove(&id) {
                files.lock_state_index.remove(&(ls.owner.clone(), ls.fh.clone()));
                if let Some(ranges) = files.locks_by_file.get_mut(&ls.fh) {
                    ranges.retain(|r| r.owner != ls.owner);
                    if ranges.is_empty() {
                        files.locks_by_file.remove(&ls.fh);
                    }
                }
            }
        }
    }

    fn require_confirmed_client(&self, clientid: clientid4, sessioned: bool) -> Result<()> {
        let domain = self.clients.read().unwrap();
        let record = domain.clients.get(&clientid).ok_or(StateError::StaleClientId)?;
        // v4.1 clients are confirmed by CREATE_SESSION, which a sessioned
        // request has necessarily passed through.
        if !record.confirmed && !sessioned {
            return Err(StateError::StaleClientId);
        }
        Ok(())
    }

    /// The stateid presented must not be newer than the server's, and an
    /// older one is reported as such. Zero means "use current".
    fn check_stateid_seq(presented: &stateid4, current: sequenceid4) -> Result<()> {
        if presented.seqid == 0 || presented.seqid == current {
            return Ok(());
        }
        if presented.seqid < current {
            return Err(StateError::OldStateid);
        }
        Err(StateError::BadStateid)
    }

    // ------------------------------------------------------------------
    // Stateid validation
    // ------------------------------------------------------------------

    /// Validates a stateid presented with an I/O or state operation.
    /// Special stateids validate without lookup and return `None`. On
    /// success the owning client's lease is renewed. `required_access`
    /// carries OPEN4_SHARE_ACCESS_* bits enforced against the backing open.
    pub fn validate_stateid(
        &self,
        stateid: &stateid4,
        fh: &[u8],
        required_access: Option<u32>,
    ) -> Result<Option<OpenState>> {
        if stateid.is_special() {
            return Ok(None);
        }
        if Self::other_epoch(&stateid.other) != self.epoch {
            return Err(StateError::StaleStateid);
        }
        let files = self.files.read().unwrap();
        let (open, current_seq) = if let Some(open) = files.opens.get(&stateid.other) {
            (open.clone(), open.stateid.seqid)
        } else if let Some(ls) = files.lock_states.get(&stateid.other) {
            let open =
                files.opens.get(&ls.open_other).cloned().ok_or(StateError::BadStateid)?;
            (open, ls.stateid.seqid)
        } else if let Some(deleg) = files.delegations.get(&stateid.other) {
            let open = OpenState {
                stateid: deleg.stateid,
                owner: (deleg.clientid, Vec::new()),
                fh: deleg.fh.clone(),
                access: match deleg.dtype {
                    DelegationType::Read => 1,
                    DelegationType::Write => 3,
                },
                deny: OPEN4_SHARE_DENY_NONE,
            };
            (open, deleg.stateid.seqid)
        } else {
            return Err(StateError::BadStateid);
        };
        if open.fh != fh {
            return Err(StateError::BadStateid);
        }
        Self::check_stateid_seq(stateid, current_seq)?;
        if let Some(required) = required_access {
            if required & open.access != required {
                return Err(StateError::OpenMode);
            }
        }
        let clientid = open.owner.0;
        drop(files);
        self.renew_lease(clientid)?;
        Ok(Some(open))
    }

    // ------------------------------------------------------------------
    // Byte-range locks
    // ------------------------------------------------------------------

    /// LOCK with the open-to-lock-owner form: atomically creates the lock
    /// owner (if needed) and its first range, derived from an open
    /// stateid.
    #[allow(clippy::too_many_arguments)]
    pub fn lock_new(
        &self,
        open_stateid: &stateid4,
        _open_seqid: sequenceid4,
        lock_seqid: sequenceid4,
        owner: &lock_owner4,
        locktype: nfs_lock_type4,
        offset: u64,
        length: u64,
        reclaim: bool,
        skip_owner_seqid: bool,
    ) -> Result<stateid4> {
        self.check_grace(reclaim)?;
        let (start, end) = lock::normalize_range(offset, length)?;
        let key: OwnerKey = (owner.clientid, owner.owner.clone());
        let mut files = self.files.write().unwrap();
        let open = files.opens.get(&open_stateid.other).ok_or(StateError::BadStateid)?;
        Self::check_stateid_seq(open_stateid, open.stateid.seqid)?;
        if locktype.is_write() && open.access & OPEN4_SHARE_ACCESS_WRITE == 0 {
            return Err(StateError::OpenMode);
        }
        let fh = open.fh.clone();
        let open_other = open_stateid.other;

        if !files.lock_owners.contains_key(&key) {
            files.lock_owners.insert(key.clone(), LockOwner::new(key.clone()));
        }
        if !skip_owner_seqid {
            let lock_owner = files.lock_owners.get_mut(&key).expect("owner just ensured");
            match lock_owner.check_seqid(lock_seqid)? {
                SeqidCheck::InOrder => {}
                SeqidCheck::Replay(_) => return Err(StateError::BadSeqid),
            }
        }
        let clientid = key.0;
        let result = self.acquire_range_locked(&mut files, key, fh, open_other, locktype, start, end);
        drop(files);
        if result.is_ok() {
            self.renew_lease(clientid).ok();
        }
        result
    }

    /// LOCK with an existing lock-owner stateid.
    pub fn lock_existing(
        &self,
        lock_stateid: &stateid4,
        lock_seqid: sequenceid4,
        locktype: nfs_lock_type4,
        offset: u64,
        length: u64,
        reclaim: bool,
        skip_owner_seqid: bool,
    ) -> Result<stateid4> {
        self.check_grace(reclaim)?;
        let (start, end) = lock::normalize_range(offset, length)?;
        let mut files = self.files.write().unwrap();
        let ls = files.lock_states.get(&lock_stateid.other).ok_or(StateError::BadStateid)?;
        Self::check_stateid_seq(lock_stateid, ls.stateid.seqid)?;
        let key = ls.owner.clone();
        let fh = ls.fh.clone();
        let open_other = ls.open_other;
        if !skip_owner_seqid {
            let lock_owner = files.lock_owners.get_mut(&key).ok_or(StateError::BadStateid)?;
            match lock_owner.check_seqid(lock_seqid)? {
                SeqidCheck::InOrder => {}
                SeqidCheck::Replay(_) => return Err(StateError::BadSeqid),
            }
        }
        let clientid = key.0;
        let result = self.acquire_range_locked(&mut files, key, fh, open_other, locktype, start, end);
        drop(files);
        if result.is_ok() {
            self.renew_lease(clientid).ok();
        }
        result
    }

    fn acquire_range_locked(
        &self,
        files: &mut FileDomain,
        key: OwnerKey,
        fh: Vec<u8>,
        open_other: [u8; NFS4_OTHER_SIZE],
        locktype: nfs_lock_type4,
        start: u64,
        end: Option<u64>,
    ) -> Result<stateid4> {
        let ranges = files.locks_by_file.entry(fh.clone()).or_default();
        if let Some(holder) = lock::find_conflict(ranges, &key, locktype.is_write(), start, end) {
            let denied = LOCK4denied {
                offset: holder.start,
                length: match holder.end {
                    Some(e) => e - holder.start,
                    None => u64::MAX,
                },
                locktype: if holder.write {
                    nfs_lock_type4::WRITE_LT
                } else {
                    nfs_lock_type4::READ_LT
                },
                owner: lock_owner4 { clientid: holder.owner.0, owner: holder.owner.1.clone() },
            };
            return Err(StateError::Denied(Box::new(denied)));
        }
        lock::add_range(
            ranges,
            LockRange { owner: key.clone(), write: locktype.is_write(), start, end },
        );
        let index_key = (key.clone(), fh.clone());
        let stateid = match files.lock_state_index.get(&index_key) {
            Some(other) => {
                let ls = files.lock_states.get_mut(other).expect("index out of sync");
                ls.stateid.seqid = ls.stateid.seqid.wrapping_add(1).max(1);
                ls.stateid
            }
            None => {
                let other = self.mint_other();
                let stateid = stateid4 { seqid: 1, other };
                files
                    .lock_states
                    .insert(other, LockState { stateid, owner: key.clone(), fh, open_other });
                files.lock_state_index.insert(index_key, other);
                stateid
            }
        };
        Ok(stateid)
    }

    /// LOCKT: tests whether the proposed range could be granted on a file,
    /// reporting the conflicting holder when it could not.
    pub fn test_lock_on_file(
        &self,
        fh: &[u8],
        owner: &lock_owner4,
        locktype: nfs_lock_type4,
        offset: u64,
        length: u64,
    ) -> Result<()> {
        let (start, end) = lock::normalize_range(offset, length)?;
        let key: OwnerKey = (owner.clientid, owner.owner.clone());
        let files = self.files.read().unwrap();
        if let Some(ranges) = files.locks_by_file.get(fh) {
            if let Some(holder) = lock::find_conflict(ranges, &key, locktype.is_write(), start, end)
            {
                let denied = LOCK4denied {
                    offset: holder.start,
                    length: match holder.end {
                        Some(e) => e - holder.start,
                        None => u64::MAX,
                    },
                    locktype: if holder.write {
                        nfs_lock_type4::WRITE_LT
                    } else {
                        nfs_lock_type4::READ_LT
                    },
                    owner: lock_owner4 {
                        clientid: holder.owner.0,
                        owner: holder.owner.1.clone(),
                    },
                };
                return Err(StateError::Denied(Box::new(denied)));
            }
        }
        Ok(())
    }

    /// LOCKU: releases a range, splitting partially covered holdings.
    pub fn unlock_file(
        &self,
        lock_stateid: &stateid4,
        seqid: sequenceid4,
        offset: u64,
        length: u64,
        skip_owner_seqid: bool,
    ) -> Result<stateid4> {
        let (start, end) = lock::normalize_range(offset, length)?;
        let mut files = self.files.write().unwrap();
        let ls = files.lock_states.get(&lock_stateid.other).ok_or(StateError::BadStateid)?;
        Self::check_stateid_seq(lock_stateid, ls.stateid.seqid)?;
        let key = ls.owner.clone();
        let fh = ls.fh.clone();
        if !skip_owner_seqid {
            let lock_owner = files.lock_owners.get_mut(&key).ok_or(StateError::BadStateid)?;
            match lock_owner.check_seqid(seqid)? {
                SeqidCheck::InOrder => {}
                SeqidCheck::Replay(_) => return Err(StateError::BadSeqid),
            }
        }
        if let Some(ranges) = files.locks_by_file.get_mut(&fh) {
            lock::remove_range(ranges, &key, start, end);
            if ranges.is_empty() {
                files.locks_by_file.remove(&fh);
            }
        }
        let ls = files.lock_states.get_mut(&lock_stateid.other).expect("checked above");
        ls.stateid.seqid = ls.stateid.seqid.wrapping_add(1).max(1);
        let bumped = ls.stateid;
        drop(files);
        self.renew_lease(key.0).ok();
        Ok(bumped)
    }

    /// RELEASE_LOCKOWNER (v4.0): forgets a lock owner, refused while it
    /// still holds ranges.
    pub fn release_lockowner(&self, owner: &lock_owner4) -> Result<()> {
        let key: OwnerKey = (owner.clientid, owner.owner.clone());
        let mut files = self.files.write().unwrap();
        let still_held = files
            .locks_by_file
            .values()
            .any(|ranges| ranges.iter().any(|range| range.owner == key));
        if still_held {
            return Err(StateError::LocksHeld);
        }
        files.lock_owners.remove(&key);
        let stale: Vec<[u8; NFS4_OTHER_SIZE]> = files
            .lock_states
            .iter()
            .filter(|(_, ls)| ls.owner == key)
            .map(|(id, _)| *id)
            .collect();
        for id in stale {
            if let Some(ls) = files.lock_states.remove(&id) {
                files.lock_state_index.remove(&(ls.owner, ls.fh));
            }
        }
        Ok(())
    }

    /// Releases every lock whose owner blob starts with `prefix`: the NSM
    /// crash hook for NLM-originated owners (`nlm:<hostname>:`).
    pub fn release_lock_owners_with_prefix(&self, prefix: &[u8]) -> usize {
        let mut files = self.files.write().unwrap();
        let victims: Vec<OwnerKey> = files
            .lock_owners
            .keys()
            .filter(|(_, blob)| blob.starts_with(prefix))
            .cloned()
            .collect();
        for key in &victims {
            files.lock_owners.remove(key);
            for ranges in files.locks_by_file.values_mut() {
                ranges.retain(|range| range.owner != *key);
            }
            let stale: Vec<[u8; NFS4_OTHER_SIZE]> = files
                .lock_states
                .iter()
                .filter(|(_, ls)| ls.owner == *key)
                .map(|(id, _)| *id)
                .collect();
            for id in stale {
                if let Some(ls) = files.lock_states.remove(&id) {
                    files.lock_state_index.remove(&(ls.owner, ls.fh));
                }
            }
        }
        files.locks_by_file.retain(|_, ranges| !ranges.is_empty());
        if !victims.is_empty() {
            warn!(owners = victims.len(), "released locks after client crash");
        }
        victims.len()
    }

    // ------------------------------------------------------------------
    // Delegations
    // ------------------------------------------------------------------

    /// Checks whether an open conflicts with outstanding delegations,
    /// dispatching a recall on first conflict. Returns
    /// (conflict, recall_dispatched).
    pub fn check_delegation_conflict(
        &self,
        fh: &[u8],
        requester: clientid4,
        wants_write: bool,
    ) -> (bool, bool) {
        let mut files = self.files.write().unwrap();
        let mut conflict = false;
        let mut dispatched = false;
        for deleg in files.delegations.values_mut().filter(|d| d.fh == fh) {
            if deleg.conflicts_with(requester, wants_write) {
                conflict = true;
                if !deleg.recalled {
                    deleg.recalled = true;
                    dispatched = true;
                    debug!(clientid = deleg.clientid, "delegation recall dispatched");
                }
            }
        }
        (conflict, dispatched)
    }

    /// Grants a delegation when policy allows; the caller has already
    /// checked that the open is exclusive and the callback path is up.
    pub fn grant_delegation(
        &self,
        clientid: clientid4,
        fh: &[u8],
        dtype: DelegationType,
    ) -> Option<stateid4> {
        let mut files = self.files.write().unwrap();
        let blocked = files.delegations.values().any(|d| {
            d.fh == fh
                && (d.dtype == DelegationType::Write
                    || dtype == DelegationType::Write
                    || d.clientid == clientid)
        });
        if blocked {
            return None;
        }
        let other = self.mint_other();
        let stateid = stateid4 { seqid: 1, other };
        files.delegations.insert(
            other,
            Delegation {
                stateid,
                clientid,
                fh: fh.to_vec(),
                dtype,
                granted_at: Instant::now(),
                recalled: false,
            },
        );
        Some(stateid)
    }

    /// DELEGRETURN.
    pub fn return_delegation(&self, stateid: &stateid4) -> Result<()> {
        let mut files = self.files.write().unwrap();
        let deleg = files.delegations.remove(&stateid.other).ok_or(StateError::BadStateid)?;
        drop(files);
        self.renew_lease(deleg.clientid).ok();
        Ok(())
    }

    /// Validates a delegation stateid for CLAIM_DELEGATE_CUR.
    pub fn delegation_for(&self, stateid: &stateid4, clientid: clientid4) -> Result<Vec<u8>> {
        let files = self.files.read().unwrap();
        let deleg = files.delegations.get(&stateid.other).ok_or(StateError::BadStateid)?;
        if deleg.clientid != clientid {
            return Err(StateError::WrongCred);
        }
        Ok(deleg.fh.clone())
    }

    /// Recalls (marks) every delegation on a handle; used when directory
    /// attributes change significantly.
    pub fn recall_delegations_on(&self, fh: &[u8]) {
        let mut files = self.files.write().unwrap();
        for deleg in files.delegations.values_mut().filter(|d| d.fh == fh) {
            deleg.recalled = true;
        }
    }

    // ------------------------------------------------------------------
    // Lease sweeper
    // ------------------------------------------------------------------

    /// Revokes the state of every client whose lease has lapsed. Returns
    /// the number of clients expired. Unconfirmed records are swept on the
    /// same schedule.
    pub fn expire_stale_clients(&self) -> usize {
        let lease = self.config.lease_duration;
        let mut domain = self.clients.write().unwrap();
        let expired: Vec<clientid4> = domain
            .clients
            .values()
            .filter(|record| record.lease_expired(lease))
            .map(|record| record.clientid)
            .collect();
        for clientid in &expired {
            warn!(clientid, "lease expired, revoking state");
            self.purge_client_locked(&mut domain, *clientid);
        }
        expired.len()
    }

    /// Spawns the periodic lease sweeper (period = lease / 4).
    pub fn spawn_lease_sweeper(manager: std::sync::Arc<StateManager>) -> tokio::task::JoinHandle<()> {
        let period = manager.config.lease_duration / 4;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period.max(Duration::from_secs(1)));
            loop {
                ticker.tick().await;
                let expired = manager.expire_stale_clients();
                if expired > 0 {
                    debug!(expired, "lease sweep complete");
                }
            }
        })
    }

    /// The owner identifiers of all live confirmed clients, persisted so
    /// the next boot can seed its grace period.
    pub fn live_client_owners(&self) -> Vec<Vec<u8>> {
        let domain = self.clients.read().unwrap();
        domain
            .clients
            .values()
            .filter(|record| record.confirmed)
            .map(|record| record.owner.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> StateManager {
        StateManager::new(StateConfig::default())
    }

    fn registered_client(mgr: &StateManager) -> clientid4 {
        let (clientid, seq, _) = mgr.exchange_id(b"client-a", [1; 8]).unwrap();
        let attrs = channel_attrs4 {
            ca_maxrequests: 8,
            ca_maxrequestsize: 1 << 20,
            ca_maxresponsesize: 1 << 20,
            ..Default::default()
        };
        mgr.create_session(clientid, seq, false, &attrs, &attrs, 0x40000000, vec![1], 1).unwrap();
        clientid
    }

    #[test]
    fn exchange_id_same_verifier_is_idempotent() {
        let mgr = manager();
        let (id1, seq1, confirmed1) = mgr.exchange_id(b"o", [1; 8]).unwrap();
        let (id2, _seq2, _) = mgr.exchange_id(b"o", [1; 8]).unwrap();
        assert_eq!(id1, id2);
        assert_eq!(seq1, 1);
        assert!(!confirmed1);
    }

    #[test]
    fn exchange_id_new_verifier_supersedes() {
        let mgr = manager();
        let old = registered_client(&mgr);
        let (new, _, confirmed) = mgr.exchange_id(b"client-a", [2; 8]).unwrap();
        assert_ne!(old, new);
        assert!(!confirmed);
        // The old client's record is gone.
        assert!(matches!(mgr.renew_lease(old), Err(StateError::ExpiredState)));
    }

    #[test]
    fn create_session_sequence_cases() {
        let mgr = manager();
        let (clientid, seq, _) = mgr.exchange_id(b"o", [1; 8]).unwrap();
        let attrs = channel_attrs4 { ca_maxrequests: 4, ..Default::default() };
        // Misordered: skipping ahead.
        assert!(matches!(
            mgr.create_session(clientid, seq + 5, false, &attrs, &attrs, 0, vec![], 1),
            Err(StateError::SeqMisordered)
        ));
        // In order.
        let outcome =
            mgr.create_session(clientid, seq, false, &attrs, &attrs, 0, vec![], 1).unwrap();
        assert!(matches!(outcome, CreateSessionOutcome::Fresh(_)));
        mgr.record_session_reply(clientid, b"cached-create-session".to_vec());
        // Replay of the same sequence returns the cached bytes.
        match mgr.create_session(clientid, seq, false, &attrs, &attrs, 0, vec![], 1).unwrap() {
            CreateSessionOutcome::Replay(bytes) => {
                assert_eq!(bytes, b"cached-create-session")
            }
            other => panic!("expected replay, got {other:?}"),
        }
    }

    #[test]
    fn channel_attrs_are_bounded() {
        let mgr = manager();
        let (clientid, seq, _) = mgr.exchange_id(b"o", [1; 8]).unwrap();
        let attrs = channel_attrs4 {
            ca_maxrequests: 10_000,
            ca_maxrequestsize: u32::MAX,
            ca_maxresponsesize: u32::MAX,
            ca_maxresponsesize_cached: u32::MAX,
            ca_maxoperations: u32::MAX,
            ..Default::default()
        };
        match mgr.create_session(clientid, seq, false, &attrs, &attrs, 0, vec![], 1).unwrap() {
            CreateSessionOutcome::Fresh(resok) => {
                assert_eq!(resok.csr_fore_chan_attrs.ca_maxrequests, 64);
                assert_eq!(resok.csr_fore_chan_attrs.ca_maxoperations, 128);
                assert_eq!(resok.csr_fore_chan_attrs.ca_maxresponsesize, 1024 * 1024);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn share_deny_conflict_is_symmetric() {
        let mgr = manager();
        let a = registered_client(&mgr);
        let (b, seqb, _) = mgr.exchange_id(b"client-b", [3; 8]).unwrap();
        let attrs = channel_attrs4 { ca_maxrequests: 4, ..Default::default() };
        mgr.create_session(b, seqb, false, &attrs, &attrs, 0, vec![], 2).unwrap();

        // A opens with access WRITE, deny READ.
        let granted = mgr.open_file(a, b"owner-a", 0, true, b"fh1", 2, 1, false).unwrap();
        assert!(matches!(granted, OpenOutcome::Granted { .. }));
        // B opening with access READ trips A's deny.
        assert!(matches!(
            mgr.open_file(b, b"owner-b", 0, true, b"fh1", 1, 0, false),
            Err(StateError::ShareDenied)
        ));
        // B opening a different file is fine.
        assert!(mgr.open_file(b, b"owner-b", 0, true, b"fh2", 1, 0, false).is_ok());
    }

    #[test]
    fn open_stateid_seqid_is_monotonic() {
        let mgr = manager();
        let a = registered_client(&mgr);
        let sid1 = match mgr.open_file(a, b"owner", 0, true, b"fh", 1, 0, false).unwrap() {
            OpenOutcome::Granted { stateid, .. } => stateid,
            other => panic!("unexpected {other:?}"),
        };
        let sid2 = match mgr.open_file(a, b"owner", 0, true, b"fh", 2, 0, false).unwrap() {
            OpenOutcome::Granted { stateid, .. } => stateid,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(sid1.other, sid2.other);
        assert!(sid2.seqid > sid1.seqid);
        let sid3 = mgr.downgrade_open(&sid2, 0, true, 1, 0).unwrap();
        assert!(sid3.seqid > sid2.seqid);
    }

    #[test]
    fn downgrade_requires_subset() {
        let mgr = manager();
        let a = registered_client(&mgr);
        let sid = match mgr.open_file(a, b"owner", 0, true, b"fh", 1, 0, false).unwrap() {
            OpenOutcome::Granted { stateid, .. } => stateid,
            other => panic!("unexpected {other:?}"),
        };
        assert!(matches!(
            mgr.downgrade_open(&sid, 0, true, 3, 0),
            Err(StateError::Inval)
        ));
    }

    #[test]
    fn close_removes_open_and_locks() {
        let mgr = manager();
        let a = registered_client(&mgr);
        let sid = match mgr.open_file(a, b"owner", 0, true, b"fh", 3, 0, false).unwrap() {
            OpenOutcome::Granted { stateid, .. } => stateid,
            other => panic!("unexpected {other:?}"),
        };
        let lo = lock_owner4 { clientid: a, owner: b"lock-owner".to_vec() };
        let lock_sid = mgr
            .lock_new(&sid, 0, 0, &lo, nfs_lock_type4::WRITE_LT, 0, 100, false, true)
            .unwrap();
        assert!(mgr.validate_stateid(&lock_sid, b"fh", None).unwrap().is_some());
        let closed = mgr.close_file(&sid, 0, true).unwrap();
        assert_eq!(closed, stateid4::anonymous());
        assert!(matches!(
            mgr.validate_stateid(&sid, b"fh", None),
            Err(StateError::BadStateid)
        ));
        // The lock held by the derived owner went with the open.
        let other_owner = lock_owner4 { clientid: a, owner: b"other".to_vec() };
        assert!(mgr.test_lock_on_file(b"fh", &other_owner, nfs_lock_type4::WRITE_LT, 0, 100).is_ok());
    }

    #[test]
    fn lock_round_trip_with_conflict_holder() {
        let mgr = manager();
        let a = registered_client(&mgr);
        let sid = match mgr.open_file(a, b"owner", 0, true, b"fh", 3, 0, false).unwrap() {
            OpenOutcome::Granted { stateid, .. } => stateid,
            other => panic!("unexpected {other:?}"),
        };
        let holder = lock_owner4 { clientid: a, owner: b"holder".to_vec() };
        let lock_sid = mgr
            .lock_new(&sid, 0, 0, &holder, nfs_lock_type4::WRITE_LT, 10, 20, false, true)
            .unwrap();

        let probe = lock_owner4 { clientid: a, owner: b"probe".to_vec() };
        match mgr.test_lock_on_file(b"fh", &probe, nfs_lock_type4::WRITE_LT, 15, 5) {
            Err(StateError::Denied(denied)) => {
                assert_eq!(denied.offset, 10);
                assert_eq!(denied.length, 20);
                assert_eq!(denied.owner.owner, b"holder");
            }
            other => panic!("expected denial, got {other:?}"),
        }

        let unlocked = mgr.unlock_file(&lock_sid, 0, 10, 20, true).unwrap();
        assert!(unlocked.seqid > lock_sid.seqid);
        assert!(mgr.test_lock_on_file(b"fh", &probe, nfs_lock_type4::WRITE_LT, 15, 5).is_ok());
    }

    #[test]
    fn stateid_validation_rules() {
        let mgr = manager();
        let a = registered_client(&mgr);
        let sid = match mgr.open_file(a, b"owner", 0, true, b"fh", 1, 0, false).unwrap() {
            OpenOutcome::Granted { stateid, .. } => stateid,
            other => panic!("unexpected {other:?}"),
        };
        // Specials validate without lookup.
        assert!(mgr.validate_stateid(&stateid4::anonymous(), b"fh", None).unwrap().is_none());
        assert!(mgr.validate_stateid(&stateid4::read_bypass(), b"fh", None).unwrap().is_none());
        // Wrong filehandle.
        assert!(matches!(
            mgr.validate_stateid(&sid, b"wrong", None),
            Err(StateError::BadStateid)
        ));
        // Wrong epoch.
        let mut stale = sid;
        stale.other[0] ^= 0xff;
        assert!(matches!(
            mgr.validate_stateid(&stale, b"fh", None),
            Err(StateError::StaleStateid)
        ));
        // Future seqid.
        let mut future = sid;
        future.seqid += 10;
        assert!(matches!(
            mgr.validate_stateid(&future, b"fh", None),
            Err(StateError::BadStateid)
        ));
        // Old seqid after an upgrade.
        let upgraded = match mgr.open_file(a, b"owner", 0, true, b"fh", 1, 1, false).unwrap() {
            OpenOutcome::Granted { stateid, .. } => stateid,
            other => panic!("unexpected {other:?}"),
        };
        assert!(matches!(
            mgr.validate_stateid(&sid, b"fh", None),
            Err(StateError::OldStateid)
        ));
        // Access enforcement.
        assert!(matches!(
            mgr.validate_stateid(&upgraded, b"fh", Some(OPEN4_SHARE_ACCESS_WRITE)),
            Err(StateError::OpenMode)
        ));
    }

    #[test]
    fn grace_gating() {
        let mgr = manager();
        // No previous clients: no grace, reclaims refused.
        assert!(matches!(mgr.check_grace(true), Err(StateError::NoGrace)));
        assert!(mgr.check_grace(false).is_ok());

        mgr.start_grace_period(vec![b"client-a".to_vec()]);
        assert!(matches!(mgr.check_grace(false), Err(StateError::GraceActive)));
        assert!(mgr.check_grace(true).is_ok());

        let a = registered_client(&mgr);
        // Non-reclaim open during grace.
        assert!(matches!(
            mgr.open_file(a, b"owner", 0, true, b"fh", 1, 0, false),
            Err(StateError::GraceActive)
        ));
        // Reclaim open from the listed client passes.
        assert!(mgr.open_file(a, b"owner", 0, true, b"fh", 1, 0, true).is_ok());
        // RECLAIM_COMPLETE from the only listed client ends grace.
        mgr.reclaim_complete(a).unwrap();
        assert!(!mgr.grace_active());
        assert!(matches!(
            mgr.open_file(a, b"owner2", 0, true, b"fh2", 1, 0, true),
            Err(StateError::NoGrace)
        ));
    }

    #[test]
    fn reclaim_complete_twice_is_an_error() {
        let mgr = manager();
        mgr.start_grace_period(vec![b"client-a".to_vec()]);
        let a = registered_client(&mgr);
        mgr.reclaim_complete(a).unwrap();
        assert!(matches!(mgr.reclaim_complete(a), Err(StateError::CompleteAlready)));
    }

    #[test]
    fn unlisted_client_cannot_reclaim() {
        let mgr = manager();
        mgr.start_grace_period(vec![b"someone-else".to_vec()]);
        let a = registered_client(&mgr);
        assert!(matches!(
            mgr.open_file(a, b"owner", 0, true, b"fh", 1, 0, true),
            Err(StateError::ReclaimBad)
        ));
    }

    #[test]
    fn write_delegation_is_exclusive() {
        let mgr = manager();
        let a = registered_client(&mgr);
        let (b, _, _) = mgr.exchange_id(b"client-b", [9; 8]).unwrap();
        assert!(mgr.grant_delegation(a, b"fh", DelegationType::Write).is_some());
        assert!(mgr.grant_delegation(b, b"fh", DelegationType::Read).is_none());
        let (conflict, dispatched) = mgr.check_delegation_conflict(b"fh", b, false);
        assert!(conflict);
        assert!(dispatched);
        // Second check: still conflicting, recall already dispatched.
        let (conflict, dispatched) = mgr.check_delegation_conflict(b"fh", b, false);
        assert!(conflict);
        assert!(!dispatched);
    }

    #[test]
    fn read_delegations_coexist() {
        let mgr = manager();
        let a = registered_client(&mgr);
        let (b, _, _) = mgr.exchange_id(b"client-b", [9; 8]).unwrap();
        let sid = mgr.grant_delegation(a, b"fh", DelegationType::Read).unwrap();
        assert!(mgr.grant_delegation(b, b"fh", DelegationType::Read).is_some());
        let (conflict, _) = mgr.check_delegation_conflict(b"fh", b, false);
        assert!(!conflict);
        mgr.return_delegation(&sid).unwrap();
        assert!(matches!(mgr.return_delegation(&sid), Err(StateError::BadStateid)));
    }

    #[test]
    fn slot_table_sequencing_through_manager() {
        let mgr = manager();
        let (clientid, seq, _) = mgr.exchange_id(b"o", [1; 8]).unwrap();
        let attrs = channel_attrs4 { ca_maxrequests: 4, ..Default::default() };
        let sessionid = match mgr
            .create_session(clientid, seq, false, &attrs, &attrs, 0, vec![], 7)
            .unwrap()
        {
            CreateSessionOutcome::Fresh(resok) => resok.csr_sessionid,
            other => panic!("unexpected {other:?}"),
        };
        let accept = mgr.sequence_accept(sessionid, 0, 1, true, 7).unwrap();
        assert!(matches!(accept.disposition, SlotDisposition::Fresh));
        mgr.sequence_complete(sessionid, 0, b"compound-reply");
        match mgr.sequence_accept(sessionid, 0, 1, true, 7).unwrap().disposition {
            SlotDisposition::Replay(bytes) => assert_eq!(bytes, b"compound-reply"),
            other => panic!("expected replay, got {other:?}"),
        }
        assert!(matches!(
            mgr.sequence_accept(sessionid, 0, 9, true, 7),
            Err(StateError::SeqMisordered)
        ));
        assert!(matches!(
            mgr.sequence_accept(sessionid, 99, 1, true, 7),
            Err(StateError::BadSlot)
        ));
        assert!(matches!(
            mgr.sequence_accept([0u8; 16], 0, 1, true, 7),
            Err(StateError::BadSession)
        ));
    }

    #[test]
    fn connection_binding_budget() {
        let mgr = StateManager::new(StateConfig {
            max_connections_per_session: 2,
            ..Default::default()
        });
        let (clientid, seq, _) = mgr.exchange_id(b"o", [1; 8]).unwrap();
        let attrs = channel_attrs4 { ca_maxrequests: 4, ..Default::default() };
        let sessionid = match mgr
            .create_session(clientid, seq, false, &attrs, &attrs, 0, vec![], 1)
            .unwrap()
        {
            CreateSessionOutcome::Fresh(resok) => resok.csr_sessionid,
            other => panic!("unexpected {other:?}"),
        };
        mgr.bind_connection(2, sessionid, ChannelDirection::Fore).unwrap();
        assert!(matches!(
            mgr.bind_connection(3, sessionid, ChannelDirection::Fore),
            Err(StateError::ResourceExhausted)
        ));
        mgr.connection_closed(2);
        assert!(mgr.bind_connection(3, sessionid, ChannelDirection::Fore).is_ok());
    }

    #[test]
    fn destroy_session_keeps_client_state() {
        let mgr = manager();
        let (clientid, seq, _) = mgr.exchange_id(b"o", [1; 8]).unwrap();
        let attrs = channel_attrs4 { ca_maxrequests: 4, ..Default::default() };
        let sessionid = match mgr
            .create_session(clientid, seq, false, &attrs, &attrs, 0, vec![], 1)
            .unwrap()
        {
            CreateSessionOutcome::Fresh(resok) => resok.csr_sessionid,
            other => panic!("unexpected {other:?}"),
        };
        let sid = match mgr.open_file(clientid, b"owner", 0, true, b"fh", 1, 0, false).unwrap() {
            OpenOutcome::Granted { stateid, .. } => stateid,
            other => panic!("unexpected {other:?}"),
        };
        mgr.destroy_session(sessionid).unwrap();
        assert!(matches!(mgr.session_client(sessionid), Err(StateError::BadSession)));
        // The open survives the session.
        assert!(mgr.validate_stateid(&sid, b"fh", None).unwrap().is_some());
    }

    #[test]
    fn destroy_clientid_refused_while_stateful() {
        let mgr = manager();
        let clientid = registered_client(&mgr);
        assert!(matches!(mgr.destroy_clientid(clientid), Err(StateError::ClientidBusy)));
    }

    #[test]
    fn nlm_prefix_crash_release() {
        let mgr = manager();
        let a = registered_client(&mgr);
        let sid = match mgr.open_file(a, b"owner", 0, true, b"fh", 3, 0, false).unwrap() {
            OpenOutcome::Granted { stateid, .. } => stateid,
            other => panic!("unexpected {other:?}"),
        };
        let nlm_owner = lock_owner4 { clientid: a, owner: b"nlm:host-a:1".to_vec() };
        mgr.lock_new(&sid, 0, 0, &nlm_owner, nfs_lock_type4::WRITE_LT, 0, 10, false, true)
            .unwrap();
        let other = lock_owner4 { clientid: a, owner: b"app-owner".to_vec() };
        assert!(mgr.test_lock_on_file(b"fh", &other, nfs_lock_type4::WRITE_LT, 0, 10).is_err());
        assert_eq!(mgr.release_lock_owners_with_prefix(b"nlm:host-a:"), 1);
        assert!(mgr.test_lock_on_file(b"fh", &other, nfs_lock_type4::WRITE_LT, 0, 10).is_ok());
    }

    #[test]
    fn v40_owner_seqid_replay() {
        let mgr = manager();
        let (clientid, confirm) = mgr.setclientid(b"v40-client", [1; 8], 0x40000000).unwrap();
        mgr.setclientid_confirm(clientid, confirm).unwrap();
        // First open fixes the owner's seqid base.
        assert!(matches!(
            mgr.open_file(clientid, b"owner", 7, false, b"fh", 1, 0, false).unwrap(),
            OpenOutcome::Granted { new_owner: true, .. }
        ));
        mgr.record_open_reply(clientid, b"owner", b"open-result".to_vec());
        // Retransmission of seqid 7 replays.
        match mgr.open_file(clientid, b"owner", 7, false, b"fh", 1, 0, false).unwrap() {
            OpenOutcome::Replay(body) => assert_eq!(body, b"open-result"),
            other => panic!("expected replay, got {other:?}"),
        }
        // Successor proceeds.
        assert!(matches!(
            mgr.open_file(clientid, b"owner", 8, false, b"fh", 1, 0, false).unwrap(),
            OpenOutcome::Granted { new_owner: false, .. }
        ));
        // A gap is refused.
        assert!(matches!(
            mgr.open_file(clientid, b"owner", 15, false, b"fh", 1, 0, false),
            Err(StateError::BadSeqid)
        ));
    }

    #[test]
    fn lease_expiry_sweeps_client_state() {
        let mgr = StateManager::new(StateConfig {
            lease_duration: Duration::from_millis(1),
            ..Default::default()
        });
        let (clientid, seq, _) = mgr.exchange_id(b"o", [1; 8]).unwrap();
        let attrs = channel_attrs4 { ca_maxrequests: 4, ..Default::default() };
        mgr.create_session(clientid, seq, false, &attrs, &attrs, 0, vec![], 1).unwrap();
        mgr.open_file(clientid, b"owner", 0, true, b"fh", 1, 0, false).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(mgr.expire_stale_clients(), 1);
        assert!(matches!(mgr.renew_lease(clientid), Err(StateError::ExpiredState)));
    }

    #[test]
    fn stale_clientid_from_previous_epoch() {
        let mgr = manager();
        let bogus = 0x0000_0001_0000_0001u64; // epoch 1, long gone
        assert!(matches!(mgr.renew_lease(bogus), Err(StateError::StaleClientId)));
    }
}
