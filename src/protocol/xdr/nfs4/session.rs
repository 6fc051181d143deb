//! XDR structures for the NFSv4.1 session-era operations: EXCHANGE_ID,
//! CREATE_SESSION, DESTROY_SESSION, BIND_CONN_TO_SESSION, SEQUENCE,
//! DESTROY_CLIENTID, RECLAIM_COMPLETE and the refused SET_SSV.

// Allow unused code since the full argument surface is implemented
#![allow(dead_code)]
// Preserve original RFC naming conventions for consistency with the specification
#![allow(non_camel_case_types)]

use std::io::{Read, Write};

use super::{bitmap4, clientid4, nfstime4, sequenceid4, sessionid4, slotid4, verifier4};
use crate::protocol::xdr::{deserialize, invalid_data, Deserialize, Serialize};
use crate::{DeserializeStruct, SerializeStruct};

// EXCHANGE_ID flag bits (RFC 8881 section 18.35).
pub const EXCHGID4_FLAG_SUPP_MOVED_REFER: u32 = 0x00000001;
pub const EXCHGID4_FLAG_SUPP_MOVED_MIGR: u32 = 0x00000002;
pub const EXCHGID4_FLAG_BIND_PRINC_STATEID: u32 = 0x00000100;
pub const EXCHGID4_FLAG_USE_NON_PNFS: u32 = 0x00010000;
pub const EXCHGID4_FLAG_USE_PNFS_MDS: u32 = 0x00020000;
pub const EXCHGID4_FLAG_USE_PNFS_DS: u32 = 0x00040000;
pub const EXCHGID4_FLAG_MASK_PNFS: u32 = 0x00070000;
pub const EXCHGID4_FLAG_UPD_CONFIRMED_REC_A: u32 = 0x40000000;
pub const EXCHGID4_FLAG_CONFIRMED_R: u32 = 0x80000000;

// State protection modes (RFC 8881 section 18.35). Only SP4_NONE is served.
pub const SP4_NONE: u32 = 0;
pub const SP4_MACH_CRED: u32 = 1;
pub const SP4_SSV: u32 = 2;

// CREATE_SESSION flag bits (RFC 8881 section 18.36).
pub const CREATE_SESSION4_FLAG_PERSIST: u32 = 0x1;
pub const CREATE_SESSION4_FLAG_CONN_BACK_CHAN: u32 = 0x2;
pub const CREATE_SESSION4_FLAG_CONN_RDMA: u32 = 0x4;

// SEQUENCE status flags (RFC 8881 section 18.46).
pub const SEQ4_STATUS_CB_PATH_DOWN: u32 = 0x00000001;
pub const SEQ4_STATUS_LEASE_MOVED: u32 = 0x00000008;
pub const SEQ4_STATUS_RESTART_RECLAIM_NEEDED: u32 = 0x00000080;

// BIND_CONN_TO_SESSION channel direction, client request side.
pub const CDFC4_FORE: u32 = 0x1;
pub const CDFC4_BACK: u32 = 0x2;
pub const CDFC4_FORE_OR_BOTH: u32 = 0x3;
pub const CDFC4_BACK_OR_BOTH: u32 = 0x7;

// BIND_CONN_TO_SESSION channel direction, server reply side.
pub const CDFS4_FORE: u32 = 0x1;
pub const CDFS4_BACK: u32 = 0x2;
pub const CDFS4_BOTH: u32 = 0x3;

/// The long-form client identity presented by EXCHANGE_ID: a boot verifier
/// plus an opaque, stable owner string.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct client_owner4 {
    pub co_verifier: verifier4,
    pub co_ownerid: Vec<u8>,
}
DeserializeStruct!(client_owner4, co_verifier, co_ownerid);
SerializeStruct!(client_owner4, co_verifier, co_ownerid);

/// The server identity returned by EXCHANGE_ID.
#[derive(Clone, Debug, Default)]
pub struct server_owner4 {
    pub so_minor_id: u64,
    pub so_major_id: Vec<u8>,
}
DeserializeStruct!(server_owner4, so_minor_id, so_major_id);
SerializeStruct!(server_owner4, so_minor_id, so_major_id);

/// Optional implementation identity, sent both ways in EXCHANGE_ID.
#[derive(Clone, Debug, Default)]
pub struct nfs_impl_id4 {
    pub nii_domain: super::utf8str_cis,
    pub nii_name: super::utf8str_cs,
    pub nii_date: nfstime4,
}
DeserializeStruct!(nfs_impl_id4, nii_domain, nii_name, nii_date);
SerializeStruct!(nfs_impl_id4, nii_domain, nii_name, nii_date);

/// State-protection operation sets for SP4_MACH_CRED; decoded for wire
/// compatibility, then refused.
#[derive(Clone, Debug, Default)]
pub struct state_protect_ops4 {
    pub spo_must_enforce: bitmap4,
    pub spo_must_allow: bitmap4,
}
DeserializeStruct!(state_protect_ops4, spo_must_enforce, spo_must_allow);
SerializeStruct!(state_protect_ops4, spo_must_enforce, spo_must_allow);

/// SSV negotiation parameters; decoded for wire compatibility, then refused.
#[derive(Clone, Debug, Default)]
pub struct ssv_sp_parms4 {
    pub ssp_ops: state_protect_ops4,
    pub ssp_hash_algs: Vec<Vec<u8>>,
    pub ssp_encr_algs: Vec<Vec<u8>>,
    pub ssp_window: u32,
    pub ssp_num_gss_handles: u32,
}

impl Serialize for ssv_sp_parms4 {
    fn serialize<R: Write>(&self, dest: &mut R) -> std::io::Result<()> {
        self.ssp_ops.serialize(dest)?;
        serialize_opaque_array(&self.ssp_hash_algs, dest)?;
        serialize_opaque_array(&self.ssp_encr_algs, dest)?;
        self.ssp_window.serialize(dest)?;
        self.ssp_num_gss_handles.serialize(dest)
    }
}

impl Deserialize for ssv_sp_parms4 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        self.ssp_ops.deserialize(src)?;
        self.ssp_hash_algs = deserialize_opaque_array(src)?;
        self.ssp_encr_algs = deserialize_opaque_array(src)?;
        self.ssp_window.deserialize(src)?;
        self.ssp_num_gss_handles.deserialize(src)
    }
}

fn serialize_opaque_array<R: Write>(items: &[Vec<u8>], dest: &mut R) -> std::io::Result<()> {
    (items.len() as u32).serialize(dest)?;
    for item in items {
        item.serialize(dest)?;
    }
    Ok(())
}

fn deserialize_opaque_array<R: Read>(src: &mut R) -> std::io::Result<Vec<Vec<u8>>> {
    let count: u32 = deserialize(src)?;
    let mut items = Vec::with_capacity(count.min(64) as usize);
    for _ in 0..count {
        items.push(deserialize(src)?);
    }
    Ok(items)
}

/// The state-protection request union in EXCHANGE_ID arguments.
#[derive(Clone, Debug, Default)]
pub enum state_protect4_a {
    #[default]
    None,
    MachCred(state_protect_ops4),
    Ssv(ssv_sp_parms4),
}

impl state_protect4_a {
    pub fn how(&self) -> u32 {
        match self {
            state_protect4_a::None => SP4_NONE,
            state_protect4_a::MachCred(_) => SP4_MACH_CRED,
            state_protect4_a::Ssv(_) => SP4_SSV,
        }
    }
}

impl Serialize for state_protect4_a {
    fn serialize<R: Write>(&self, dest: &mut R) -> std::io::Result<()> {
        self.how().serialize(dest)?;
        match self {
            state_protect4_a::None => Ok(()),
            state_protect4_a::MachCred(ops) => ops.serialize(dest),
            state_protect4_a::Ssv(parms) => parms.serialize(dest),
        }
    }
}

impl Deserialize for state_protect4_a {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        match deserialize::<u32, _>(src)? {
            SP4_NONE => *self = state_protect4_a::None,
            SP4_MACH_CRED => *self = state_protect4_a::MachCred(deserialize(src)?),
            SP4_SSV => *self = state_protect4_a::Ssv(deserialize(src)?),
            how => return Err(invalid_data(format!("invalid state_protect_how4: {how}"))),
        }
        Ok(())
    }
}

/// Arguments for EXCHANGE_ID.
#[derive(Clone, Debug, Default)]
pub struct EXCHANGE_ID4args {
    pub eia_clientowner: client_owner4,
    pub eia_flags: u32,
    pub eia_state_protect: state_protect4_a,
    pub eia_client_impl_id: Vec<nfs_impl_id4>,
}

impl Serialize for EXCHANGE_ID4args {
    fn serialize<R: Write>(&self, dest: &mut R) -> std::io::Result<()> {
        self.eia_clientowner.serialize(dest)?;
        self.eia_flags.serialize(dest)?;
        self.eia_state_protect.serialize(dest)?;
        (self.eia_client_impl_id.len() as u32).serialize(dest)?;
        for impl_id in &self.eia_client_impl_id {
            impl_id.serialize(dest)?;
        }
        Ok(())
    }
}

impl Deserialize for EXCHANGE_ID4args {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        self.eia_clientowner.deserialize(src)?;
        self.eia_flags.deserialize(src)?;
        self.eia_state_protect.deserialize(src)?;
        let count: u32 = deserialize(src)?;
        if count > 1 {
            return Err(invalid_data("eia_client_impl_id carries at most one element"));
        }
        self.eia_client_impl_id.clear();
        for _ in 0..count {
            self.eia_client_impl_id.push(deserialize(src)?);
        }
        Ok(())
    }
}

/// Negotiated channel attributes, bounded by server maxima at
/// CREATE_SESSION time.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct channel_attrs4 {
    pub ca_headerpadsize: u32,
    pub ca_maxrequestsize: u32,
    pub ca_maxresponsesize: u32,
    pub ca_maxresponsesize_cached: u32,
    pub ca_maxoperations: u32,
    pub ca_maxrequests: u32,
    pub ca_rdma_ird: Vec<u32>,
}
DeserializeStruct!(
    channel_attrs4,
    ca_headerpadsize,
    ca_maxrequestsize,
    ca_maxresponsesize,
    ca_maxresponsesize_cached,
    ca_maxoperations,
    ca_maxrequests,
    ca_rdma_ird
);
SerializeStruct!(
    channel_attrs4,
    ca_headerpadsize,
    ca_maxrequestsize,
    ca_maxresponsesize,
    ca_maxresponsesize_cached,
    ca_maxoperations,
    ca_maxrequests,
    ca_rdma_ird
);

/// Callback security parameters offered by CREATE_SESSION. AUTH_NONE and
/// AUTH_SYS bodies are decoded fully; RPCSEC_GSS handles are decoded
/// structurally and recorded as unusable.
#[derive(Clone, Debug, Default)]
pub enum callback_sec_parms4 {
    #[default]
    AuthNone,
    AuthSys(super::super::rpc::auth_unix),
    RpcSecGss {
        service: u32,
        handle_from_server: Vec<u8>,
        handle_from_client: Vec<u8>,
    },
}

impl callback_sec_parms4 {
    pub fn flavor(&self) -> u32 {
        match self {
            callback_sec_parms4::AuthNone => 0,
            callback_sec_parms4::AuthSys(_) => 1,
            callback_sec_parms4::RpcSecGss { .. } => 6,
        }
    }
}

impl Serialize for callback_sec_parms4 {
    fn serialize<R: Write>(&self, dest: &mut R) -> std::io::Result<()> {
        self.flavor().serialize(dest)?;
        match self {
            callback_sec_parms4::AuthNone => Ok(()),
            callback_sec_parms4::AuthSys(auth) => auth.serialize(dest),
            callback_sec_parms4::RpcSecGss { service, handle_from_server, handle_from_client } => {
                service.serialize(dest)?;
                handle_from_server.serialize(dest)?;
                handle_from_client.serialize(dest)
            }
        }
    }
}

impl Deserialize for callback_sec_parms4 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        match deserialize::<u32, _>(src)? {
            0 => *self = callback_sec_parms4::AuthNone,
            1 => *self = callback_sec_parms4::AuthSys(deserialize(src)?),
            6 => {
                *self = callback_sec_parms4::RpcSecGss {
                    service: deserialize(src)?,
                    handle_from_server: deserialize(src)?,
                    handle_from_client: deserialize(src)?,
                }
            }
            flavor => {
                return Err(invalid_data(format!("invalid callback security flavor: {flavor}")))
            }
        }
        Ok(())
    }
}

/// Arguments for CREATE_SESSION.
#[derive(Clone, Debug, Default)]
pub struct CREATE_SESSION4args {
    pub csa_clientid: clientid4,
    pub csa_sequence: sequenceid4,
    pub csa_flags: u32,
    pub csa_fore_chan_attrs: channel_attrs4,
    pub csa_back_chan_attrs: channel_attrs4,
    pub csa_cb_program: u32,
    pub csa_sec_parms: Vec<callback_sec_parms4>,
}

impl Serialize for CREATE_SESSION4args {
    fn serialize<R: Write>(&self, dest: &mut R) -> std::io::Result<()> {
        self.csa_clientid.serialize(dest)?;
        self.csa_sequence.serialize(dest)?;
        self.csa_flags.serialize(dest)?;
        self.csa_fore_chan_attrs.serialize(dest)?;
        self.csa_back_chan_attrs.serialize(dest)?;
        self.csa_cb_program.serialize(dest)?;
        (self.csa_sec_parms.len() as u32).serialize(dest)?;
        for parms in &self.csa_sec_parms {
            parms.serialize(dest)?;
        }
        Ok(())
    }
}

impl Deserialize for CREATE_SESSION4args {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        self.csa_clientid.deserialize(src)?;
        self.csa_sequence.deserialize(src)?;
        self.csa_flags.deserialize(src)?;
        self.csa_fore_chan_attrs.deserialize(src)?;
        self.csa_back_chan_attrs.deserialize(src)?;
        self.csa_cb_program.deserialize(src)?;
        let count: u32 = deserialize(src)?;
        if count > 16 {
            return Err(invalid_data("too many callback security parms"));
        }
        self.csa_sec_parms.clear();
        for _ in 0..count {
            self.csa_sec_parms.push(deserialize(src)?);
        }
        Ok(())
    }
}

/// The CREATE_SESSION result body cached for replay detection.
#[derive(Clone, Debug, Default)]
pub struct CREATE_SESSION4resok {
    pub csr_sessionid: sessionid4,
    pub csr_sequence: sequenceid4,
    pub csr_flags: u32,
    pub csr_fore_chan_attrs: channel_attrs4,
    pub csr_back_chan_attrs: channel_attrs4,
}
DeserializeStruct!(
    CREATE_SESSION4resok,
    csr_sessionid,
    csr_sequence,
    csr_flags,
    csr_fore_chan_attrs,
    csr_back_chan_attrs
);
SerializeStruct!(
    CREATE_SESSION4resok,
    csr_sessionid,
    csr_sequence,
    csr_flags,
    csr_fore_chan_attrs,
    csr_back_chan_attrs
);

/// Arguments for SEQUENCE.
#[derive(Clone, Debug, Default)]
pub struct SEQUENCE4args {
    pub sa_sessionid: sessionid4,
    pub sa_sequenceid: sequenceid4,
    pub sa_slotid: slotid4,
    pub sa_highest_slotid: slotid4,
    pub sa_cachethis: bool,
}
DeserializeStruct!(
    SEQUENCE4args,
    sa_sessionid,
    sa_sequenceid,
    sa_slotid,
    sa_highest_slotid,
    sa_cachethis
);
SerializeStruct!(
    SEQUENCE4args,
    sa_sessionid,
    sa_sequenceid,
    sa_slotid,
    sa_highest_slotid,
    sa_cachethis
);

/// The SEQUENCE success body.
#[derive(Clone, Debug, Default)]
pub struct SEQUENCE4resok {
    pub sr_sessionid: sessionid4,
    pub sr_sequenceid: sequenceid4,
    pub sr_slotid: slotid4,
    pub sr_highest_slotid: slotid4,
    pub sr_target_highest_slotid: slotid4,
    pub sr_status_flags: u32,
}
DeserializeStruct!(
    SEQUENCE4resok,
    sr_sessionid,
    sr_sequenceid,
    sr_slotid,
    sr_highest_slotid,
    sr_target_highest_slotid,
    sr_status_flags
);
SerializeStruct!(
    SEQUENCE4resok,
    sr_sessionid,
    sr_sequenceid,
    sr_slotid,
    sr_highest_slotid,
    sr_target_highest_slotid,
    sr_status_flags
);

/// Arguments for BIND_CONN_TO_SESSION.
#[derive(Clone, Debug, Default)]
pub struct BIND_CONN_TO_SESSION4args {
    pub bctsa_sessid: sessionid4,
    pub bctsa_dir: u32,
    pub bctsa_use_conn_in_rdma_mode: bool,
}
DeserializeStruct!(
    BIND_CONN_TO_SESSION4args,
    bctsa_sessid,
    bctsa_dir,
    bctsa_use_conn_in_rdma_mode
);
SerializeStruct!(
    BIND_CONN_TO_SESSION4args,
    bctsa_sessid,
    bctsa_dir,
    bctsa_use_conn_in_rdma_mode
);

/// Arguments for DESTROY_SESSION.
#[derive(Clone, Debug, Default)]
pub struct DESTROY_SESSION4args {
    pub dsa_sessionid: sessionid4,
}
DeserializeStruct!(DESTROY_SESSION4args, dsa_sessionid);
SerializeStruct!(DESTROY_SESSION4args, dsa_sessionid);

/// Arguments for DESTROY_CLIENTID.
#[derive(Clone, Debug, Default)]
pub struct DESTROY_CLIENTID4args {
    pub dca_clientid: clientid4,
}
DeserializeStruct!(DESTROY_CLIENTID4args, dca_clientid);
SerializeStruct!(DESTROY_CLIENTID4args, dca_clientid);

/// Arguments for RECLAIM_COMPLETE.
#[derive(Clone, Debug, Default)]
pub struct RECLAIM_COMPLETE4args {
    pub rca_one_fs: bool,
}
DeserializeStruct!(RECLAIM_COMPLETE4args, rca_one_fs);
SerializeStruct!(RECLAIM_COMPLETE4args, rca_one_fs);

/// Arguments for SET_SSV, decoded for wire compatibility and refused.
#[derive(Clone, Debug, Default)]
pub struct SET_SSV4args {
    pub ssa_ssv: Vec<u8>,
    pub ssa_digest: Vec<u8>,
}
DeserializeStruct!(SET_SSV4args, ssa_ssv, ssa_digest);
SerializeStruct!(SET_SSV4args, ssa_ssv, ssa_digest);

/// Arguments for SETCLIENTID (v4.0): short-form identity plus callback
/// contact information.
#[derive(Clone, Debug, Default)]
pub struct nfs_client_id4 {
    pub verifier: verifier4,
    pub id: Vec<u8>,
}
DeserializeStruct!(nfs_client_id4, verifier, id);
SerializeStruct!(nfs_client_id4, verifier, id);

/// The v4.0 callback contact: a netid/address pair.
#[derive(Clone, Debug, Default)]
pub struct clientaddr4 {
    pub na_r_netid: Vec<u8>,
    pub na_r_addr: Vec<u8>,
}
DeserializeStruct!(clientaddr4, na_r_netid, na_r_addr);
SerializeStruct!(clientaddr4, na_r_netid, na_r_addr);

/// The v4.0 callback program/location pair.
#[derive(Clone, Debug, Default)]
pub struct cb_client4 {
    pub cb_program: u32,
    pub cb_location: clientaddr4,
}
DeserializeStruct!(cb_client4, cb_program, cb_location);
SerializeStruct!(cb_client4, cb_program, cb_location);

/// Arguments for SETCLIENTID (v4.0 only).
#[derive(Clone, Debug, Default)]
pub struct SETCLIENTID4args {
    pub client: nfs_client_id4,
    pub callback: cb_client4,
    pub callback_ident: u32,
}
DeserializeStruct!(SETCLIENTID4args, client, callback, callback_ident);
SerializeStruct!(SETCLIENTID4args, client, callback, callback_ident);

/// Arguments for SETCLIENTID_CONFIRM (v4.0 only).
#[derive(Clone, Debug, Default)]
pub struct SETCLIENTID_CONFIRM4args {
    pub clientid: clientid4,
    pub setclientid_confirm: verifier4,
}
DeserializeStruct!(SETCLIENTID_CONFIRM4args, clientid, setclientid_confirm);
SerializeStruct!(SETCLIENTID_CONFIRM4args, clientid, setclientid_confirm);

/// Arguments for RENEW (v4.0 only).
#[derive(Clone, Debug, Default)]
pub struct RENEW4args {
    pub clientid: clientid4,
}
DeserializeStruct!(RENEW4args, clientid);
SerializeStruct!(RENEW4args, clientid);
