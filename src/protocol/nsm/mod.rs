//! The Network Status Monitor service (program 100024, version 1), as
//! specified in XNFS, Version 3W (Open Group Technical Standard).
//!
//! The monitor set is the persistent half of crash recovery: a map of
//! monitored clients with their SM_NOTIFY callback coordinates, plus the
//! server state counter (odd while up, advancing by two per restart).
//! When a notification cannot be delivered the target is declared crashed:
//! its registration is dropped and the injected crash hook releases the
//! NLM locks it left behind.

pub mod notify;

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::{Mutex, RwLock};

use num_traits::cast::FromPrimitive;
use tracing::{debug, info, warn};

use crate::protocol::rpc;
use crate::protocol::xdr::{self, deserialize, nsm, Serialize};

/// Callback invoked when a monitored client is observed crashed. The
/// argument is the registered host name.
pub type CrashHook = dyn Fn(&str) + Send + Sync;

struct MonitorInner {
    /// Odd while the server is up; advances by two per restart.
    state: i32,
    /// Registrations keyed by monitored host name.
    entries: HashMap<Vec<u8>, nsm::mon>,
}

/// The NSM registration store. Mutations rewrite the backing file when one
/// is configured.
pub struct MonitorSet {
    inner: Mutex<MonitorInner>,
    path: Option<PathBuf>,
    max_clients: usize,
    crash_hook: RwLock<Option<Box<CrashHook>>>,
}

impl MonitorSet {
    /// An in-memory set starting at state 1.
    pub fn new(max_clients: usize) -> MonitorSet {
        MonitorSet {
            inner: Mutex::new(MonitorInner { state: 1, entries: HashMap::new() }),
            path: None,
            max_clients,
            crash_hook: RwLock::new(None),
        }
    }

    /// Loads the persisted set, advancing the state counter for this boot.
    /// A missing file is a first boot.
    pub fn load(path: PathBuf, max_clients: usize) -> std::io::Result<MonitorSet> {
        let mut inner = match std::fs::read(&path) {
            Ok(bytes) => Self::decode(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                MonitorInner { state: -1, entries: HashMap::new() }
            }
            Err(e) => return Err(e),
        };
        // Odd means up; a restart advances by two, and a fresh store
        // starts at one.
        inner.state = if inner.state < 0 { 1 } else { inner.state.wrapping_add(2) | 1 };
        info!(state = inner.state, clients = inner.entries.len(), "NSM store loaded");
        let set = MonitorSet {
            inner: Mutex::new(inner),
            path: Some(path),
            max_clients,
            crash_hook: RwLock::new(None),
        };
        set.save();
        Ok(set)
    }

    fn decode(bytes: &[u8]) -> std::io::Result<MonitorInner> {
        let mut cursor = std::io::Cursor::new(bytes);
        let state: i32 = deserialize(&mut cursor)?;
        let count: u32 = deserialize(&mut cursor)?;
        let mut entries = HashMap::new();
        for _ in 0..count {
            let entry: nsm::mon = deserialize(&mut cursor)?;
            entries.insert(entry.mon_id.mon_name.clone(), entry);
        }
        Ok(MonitorInner { state, entries })
    }

    fn save(&self) {
        let Some(path) = &self.path else { return };
        let inner = self.inner.lock().unwrap();
        let mut bytes = Vec::new();
        let encode = (|| -> std::io::Result<()> {
            inner.state.serialize(&mut bytes)?;
            (inner.entries.len() as u32).serialize(&mut bytes)?;
            for entry in inner.entries.values() {
                entry.serialize(&mut bytes)?;
            }
            Ok(())
        })();
        drop(inner);
        if encode.is_ok() {
            if let Err(e) = std::fs::write(path, &bytes) {
                warn!("failed to persist NSM registrations: {e}");
            }
        }
    }

    /// Installs the hook that releases a crashed client's locks.
    pub fn set_crash_hook(&self, hook: Box<CrashHook>) {
        *self.crash_hook.write().unwrap() = Some(hook);
    }

    /// The current state counter.
    pub fn state(&self) -> i32 {
        self.inner.lock().unwrap().state
    }

    /// SM_MON: adds a registration, bounded by the client budget.
    pub fn mon(&self, args: nsm::mon) -> nsm::sm_stat_res {
        let mut inner = self.inner.lock().unwrap();
        let key = args.mon_id.mon_name.clone();
        if !inner.entries.contains_key(&key) && inner.entries.len() >= self.max_clients {
            warn!("SM_MON refused: monitor set is full ({} clients)", self.max_clients);
            return nsm::sm_stat_res { res_stat: nsm::sm_res::STAT_FAIL, state: inner.state };
        }
        debug!("SM_MON {:?}", args.mon_id);
        inner.entries.insert(key, args);
        let state = inner.state;
        drop(inner);
        self.save();
        nsm::sm_stat_res { res_stat: nsm::sm_res::STAT_SUCC, state }
    }

    /// SM_UNMON: removes one registration.
    pub fn unmon(&self, mon_name: &[u8]) -> i32 {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.remove(mon_name);
        let state = inner.state;
        drop(inner);
        self.save();
        state
    }

    /// SM_UNMON_ALL: removes every registration a watcher placed.
    pub fn unmon_all(&self, my_name: &[u8]) -> i32 {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.retain(|_, entry| entry.mon_id.my_id.my_name != my_name);
        let state = inner.state;
        drop(inner);
        self.save();
        state
    }

    /// SM_SIMU_CRASH: pretend the monitor crashed and restarted.
    pub fn simulate_crash(&self) -> i32 {
        let mut inner = self.inner.lock().unwrap();
        inner.state = inner.state.wrapping_add(2) | 1;
        let state = inner.state;
        drop(inner);
        self.save();
        state
    }

    /// Snapshot of the current registrations.
    pub fn registrations(&self) -> Vec<nsm::mon> {
        self.inner.lock().unwrap().entries.values().cloned().collect()
    }

    /// Declares a monitored client crashed: drops its registration and
    /// fires the crash hook. Failures in the hook are the hook's problem;
    /// this path is best-effort.
    pub fn client_crashed(&self, mon_name: &[u8]) {
        let removed = {
            let mut inner = self.inner.lock().unwrap();
            inner.entries.remove(mon_name)
        };
        if removed.is_some() {
            self.save();
        }
        let host = String::from_utf8_lossy(mon_name).into_owned();
        warn!(host = %host, "client observed crashed, releasing its locks");
        if let Some(hook) = self.crash_hook.read().unwrap().as_ref() {
            hook(&host);
        }
    }
}

/// Main handler for the NSM program.
pub async fn handle_nsm(
    xid: u32,
    call: &xdr::rpc::call_body,
    input: &mut (impl Read + Send),
    output: &mut impl Write,
    context: &rpc::Context,
) -> Result<(), anyhow::Error> {
    if call.vers != nsm::VERSION {
        xdr::rpc::prog_mismatch_reply_message(xid, nsm::VERSION).serialize(output)?;
        return Ok(());
    }
    let proc = nsm::NsmProcedure::from_u32(call.proc).unwrap_or(nsm::NsmProcedure::INVALID);
    match proc {
        nsm::NsmProcedure::SM_NULL => {
            xdr::rpc::make_success_reply(xid).serialize(output)?;
        }
        nsm::NsmProcedure::SM_STAT => {
            let _args = deserialize::<nsm::sm_name, _>(input)?;
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            nsm::sm_stat_res {
                res_stat: nsm::sm_res::STAT_SUCC,
                state: context.monitor.state(),
            }
            .serialize(output)?;
        }
        nsm::NsmProcedure::SM_MON => {
            let args = deserialize::<nsm::mon, _>(input)?;
            let res = context.monitor.mon(args);
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            res.serialize(output)?;
        }
        nsm::NsmProcedure::SM_UNMON => {
            let args = deserialize::<nsm::mon_id, _>(input)?;
            let state = context.monitor.unmon(&args.mon_name);
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            nsm::sm_stat { state }.serialize(output)?;
        }
        nsm::NsmProcedure::SM_UNMON_ALL => {
            let args = deserialize::<nsm::my_id, _>(input)?;
            let state = context.monitor.unmon_all(&args.my_name);
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            nsm::sm_stat { state }.serialize(output)?;
        }
        nsm::NsmProcedure::SM_SIMU_CRASH => {
            context.monitor.simulate_crash();
            xdr::rpc::make_success_reply(xid).serialize(output)?;
        }
        nsm::NsmProcedure::SM_NOTIFY => {
            // A peer's NSM reports that a monitored host restarted: treat
            // that host as crashed and flush what it held.
            let args = deserialize::<nsm::stat_chge, _>(input)?;
            debug!("SM_NOTIFY({:?}, state={})", args.mon_name, args.state);
            context.monitor.client_crashed(&args.mon_name);
            xdr::rpc::make_success_reply(xid).serialize(output)?;
        }
        _ => {
            xdr::rpc::proc_unavail_reply_message(xid).serialize(output)?;
        }
    }
    Ok(())
}
