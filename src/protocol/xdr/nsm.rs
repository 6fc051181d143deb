//! Network Status Monitor (NSM) protocol data structures, as specified in
//! XNFS, Version 3W (Open Group Technical Standard), chapter 11.
//! <https://pubs.opengroup.org/onlinepubs/9629799/chap11.htm>

// Keep original protocol naming conventions for consistency with XNFS
#![allow(non_camel_case_types)]
#![allow(dead_code)]

use std::io::{Read, Write};

use byteorder::{ReadBytesExt, WriteBytesExt};
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::cast::FromPrimitive;

use super::*;

/// NSM RPC program number
pub const PROGRAM: u32 = 100024;
/// NSM RPC version number
pub const VERSION: u32 = 1;

/// Length of the opaque private data carried in SM_MON and SM_NOTIFY.
pub const SM_PRIV_SIZE: usize = 16;
/// Maximum length of host names on the NSM wire.
pub const SM_MAXSTRLEN: usize = 1024;

/// Procedure numbers for the NSM RPC service.
#[allow(clippy::upper_case_acronyms)]
#[derive(Copy, Clone, Debug, FromPrimitive, ToPrimitive)]
pub enum NsmProcedure {
    /// Do nothing (ping)
    SM_NULL = 0,
    /// Test whether a host is monitored
    SM_STAT = 1,
    /// Begin monitoring a host
    SM_MON = 2,
    /// Stop monitoring a host
    SM_UNMON = 3,
    /// Stop monitoring all hosts for a caller
    SM_UNMON_ALL = 4,
    /// Simulate a crash of the local NSM
    SM_SIMU_CRASH = 5,
    /// Notification that a monitored host changed state
    SM_NOTIFY = 6,
    /// Invalid procedure number
    INVALID,
}
SerializeEnum!(NsmProcedure);
DeserializeEnum!(NsmProcedure);

/// Result status for SM_STAT and SM_MON.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum sm_res {
    /// The monitor request was accepted
    #[default]
    STAT_SUCC = 0,
    /// The monitor request was rejected
    STAT_FAIL = 1,
}
SerializeEnum!(sm_res);
DeserializeEnum!(sm_res);

/// The name of a host, as carried on the NSM wire (XDR `sm_name` / `mon_id`
/// name field).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct sm_name {
    pub mon_name: Vec<u8>,
}
DeserializeStruct!(sm_name, mon_name);
SerializeStruct!(sm_name, mon_name);

/// RPC identity of the process asking for monitoring (XDR `my_id`). The
/// callback triple tells the NSM where to deliver SM_NOTIFY.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct my_id {
    /// Host (dial string) where the callback service runs
    pub my_name: Vec<u8>,
    /// RPC program number to call back
    pub my_prog: u32,
    /// RPC version number to call back
    pub my_vers: u32,
    /// RPC procedure number to call back
    pub my_proc: u32,
}
DeserializeStruct!(my_id, my_name, my_prog, my_vers, my_proc);
SerializeStruct!(my_id, my_name, my_prog, my_vers, my_proc);

/// Identifies a (monitored host, watcher) pair (XDR `mon_id`).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct mon_id {
    /// The host to watch
    pub mon_name: Vec<u8>,
    /// The identity of the watcher
    pub my_id: my_id,
}
DeserializeStruct!(mon_id, mon_name, my_id);
SerializeStruct!(mon_id, mon_name, my_id);

/// Arguments to SM_MON: the pair to monitor plus an opaque cookie returned
/// verbatim in SM_NOTIFY.
#[derive(Clone, Debug, Default)]
pub struct mon {
    pub mon_id: mon_id,
    pub private: [u8; SM_PRIV_SIZE],
}
DeserializeStruct!(mon, mon_id, private);
SerializeStruct!(mon, mon_id, private);

/// Result of SM_STAT and SM_MON: acceptance plus the current state counter.
#[derive(Clone, Debug, Default)]
pub struct sm_stat_res {
    pub res_stat: sm_res,
    pub state: i32,
}
DeserializeStruct!(sm_stat_res, res_stat, state);
SerializeStruct!(sm_stat_res, res_stat, state);

/// Result of SM_UNMON and SM_UNMON_ALL: the current state counter.
#[derive(Clone, Debug, Default)]
pub struct sm_stat {
    pub state: i32,
}
DeserializeStruct!(sm_stat, state);
SerializeStruct!(sm_stat, state);

/// The SM_NOTIFY message body: name and new state counter of the host that
/// changed state, plus the cookie supplied at SM_MON time.
#[derive(Clone, Debug, Default)]
pub struct stat_chge {
    pub mon_name: Vec<u8>,
    pub state: i32,
    pub private: [u8; SM_PRIV_SIZE],
}
DeserializeStruct!(stat_chge, mon_name, state, private);
SerializeStruct!(stat_chge, mon_name, state, private);
