//! The v4.1 session-era operations: EXCHANGE_ID, CREATE_SESSION,
//! DESTROY_SESSION, BIND_CONN_TO_SESSION, DESTROY_CLIENTID and
//! RECLAIM_COMPLETE, plus the refused SET_SSV. SEQUENCE itself is handled
//! by the COMPOUND engine; only its argument decoding lives here.

use std::io::Read;

use tracing::debug;

use crate::protocol::xdr::deserialize;
use crate::protocol::xdr::nfs4::nfsstat4;
use crate::protocol::xdr::nfs4::session::{
    state_protect4_a, BIND_CONN_TO_SESSION4args, CDFC4_BACK, CDFC4_BACK_OR_BOTH, CDFC4_FORE,
    CDFC4_FORE_OR_BOTH, CDFS4_BACK, CDFS4_BOTH, CDFS4_FORE, CREATE_SESSION4args,
    CREATE_SESSION4_FLAG_CONN_BACK_CHAN, DESTROY_CLIENTID4args, DESTROY_SESSION4args,
    EXCHANGE_ID4args, EXCHGID4_FLAG_CONFIRMED_R, EXCHGID4_FLAG_USE_NON_PNFS,
    RECLAIM_COMPLETE4args, SEQUENCE4args, SET_SSV4args, server_owner4,
};
use crate::protocol::xdr::Serialize;
use crate::state::session::ChannelDirection;
use crate::state::CreateSessionOutcome;

use super::super::CompoundContext;
use super::openops::replay_status;
use super::status_only;

/// The server identity advertised in EXCHANGE_ID results.
const SERVER_SCOPE: &[u8] = b"nfs-sable";

/// Decodes SEQUENCE arguments on behalf of the COMPOUND engine.
pub fn op_sequence_args(input: &mut (impl Read + Send)) -> anyhow::Result<SEQUENCE4args> {
    Ok(deserialize(input)?)
}

pub fn op_exchange_id(
    ctx: &mut CompoundContext<'_>,
    input: &mut (impl Read + Send),
    body: &mut Vec<u8>,
) -> anyhow::Result<nfsstat4> {
    let args: EXCHANGE_ID4args = deserialize(input)?;
    debug!("op_exchange_id({:?})", args.eia_clientowner.co_ownerid);
    // SSV and machine-credential state protection are out of scope.
    if !matches!(args.eia_state_protect, state_protect4_a::None) {
        return status_only(body, nfsstat4::NFS4ERR_NOTSUPP);
    }
    let (clientid, sequenceid, confirmed) = match ctx
        .rpc
        .state
        .exchange_id(&args.eia_clientowner.co_ownerid, args.eia_clientowner.co_verifier)
    {
        Ok(result) => result,
        Err(e) => return status_only(body, e.nfsstat()),
    };

    let mut flags = EXCHGID4_FLAG_USE_NON_PNFS;
    if confirmed {
        flags |= EXCHGID4_FLAG_CONFIRMED_R;
    }
    nfsstat4::NFS4_OK.serialize(body)?;
    clientid.serialize(body)?;
    sequenceid.serialize(body)?;
    flags.serialize(body)?;
    // state protection: SP4_NONE
    0u32.serialize(body)?;
    server_owner4 { so_minor_id: 0, so_major_id: SERVER_SCOPE.to_vec() }.serialize(body)?;
    SERVER_SCOPE.to_vec().serialize(body)?;
    // no server implementation id
    0u32.serialize(body)?;
    Ok(nfsstat4::NFS4_OK)
}

pub fn op_create_session(
    ctx: &mut CompoundContext<'_>,
    input: &mut (impl Read + Send),
    body: &mut Vec<u8>,
) -> anyhow::Result<nfsstat4> {
    let args: CREATE_SESSION4args = deserialize(input)?;
    debug!("op_create_session(clientid={:#x}, seq={})", args.csa_clientid, args.csa_sequence);
    let want_back_channel = args.csa_flags & CREATE_SESSION4_FLAG_CONN_BACK_CHAN != 0;
    let cb_sec_flavors = args.csa_sec_parms.iter().map(|p| p.flavor()).collect();
    let outcome = match ctx.rpc.state.create_session(
        args.csa_clientid,
        args.csa_sequence,
        want_back_channel,
        &args.csa_fore_chan_attrs,
        &args.csa_back_chan_attrs,
        args.csa_cb_program,
        cb_sec_flavors,
        ctx.rpc.conn_id,
    ) {
        Ok(outcome) => outcome,
        Err(e) => return status_only(body, e.nfsstat()),
    };
    match outcome {
        CreateSessionOutcome::Fresh(resok) => {
            let mut result = Vec::new();
            nfsstat4::NFS4_OK.serialize(&mut result)?;
            resok.serialize(&mut result)?;
            ctx.rpc.state.record_session_reply(args.csa_clientid, result.clone());
            body.extend_from_slice(&result);
            Ok(nfsstat4::NFS4_OK)
        }
        CreateSessionOutcome::Replay(cached) => {
            body.extend_from_slice(&cached);
            Ok(replay_status(&cached))
        }
    }
}

pub fn op_destroy_session(
    ctx: &mut CompoundContext<'_>,
    input: &mut (impl Read + Send),
    body: &mut Vec<u8>,
) -> anyhow::Result<nfsstat4> {
    let args: DESTROY_SESSION4args = deserialize(input)?;
    match ctx.rpc.state.destroy_session(args.dsa_sessionid) {
        Ok(()) => status_only(body, nfsstat4::NFS4_OK),
        Err(e) => status_only(body, e.nfsstat()),
    }
}

pub fn op_bind_conn_to_session(
    ctx: &mut CompoundContext<'_>,
    input: &mut (impl Read + Send),
    body: &mut Vec<u8>,
) -> anyhow::Result<nfsstat4> {
    let args: BIND_CONN_TO_SESSION4args = deserialize(input)?;
    let requested = match args.bctsa_dir {
        CDFC4_FORE => ChannelDirection::Fore,
        CDFC4_BACK => ChannelDirection::Back,
        CDFC4_FORE_OR_BOTH | CDFC4_BACK_OR_BOTH => ChannelDirection::Both,
        _ => return status_only(body, nfsstat4::NFS4ERR_INVAL),
    };
    match ctx.rpc.state.bind_connection(ctx.rpc.conn_id, args.bctsa_sessid, requested) {
        Ok(granted) => {
            nfsstat4::NFS4_OK.serialize(body)?;
            args.bctsa_sessid.serialize(body)?;
            let dir = match granted {
                ChannelDirection::Fore => CDFS4_FORE,
                ChannelDirection::Back => CDFS4_BACK,
                ChannelDirection::Both => CDFS4_BOTH,
            };
            dir.serialize(body)?;
            false.serialize(body)?; // no RDMA mode
            Ok(nfsstat4::NFS4_OK)
        }
        Err(e) => status_only(body, e.nfsstat()),
    }
}

pub fn op_destroy_clientid(
    ctx: &mut CompoundContext<'_>,
    input: &mut (impl Read + Send),
    body: &mut Vec<u8>,
) -> anyhow::Result<nfsstat4> {
    let args: DESTROY_CLIENTID4args = deserialize(input)?;
    match ctx.rpc.state.destroy_clientid(args.dca_clientid) {
        Ok(()) => status_only(body, nfsstat4::NFS4_OK),
        Err(e) => status_only(body, e.nfsstat()),
    }
}

pub fn op_reclaim_complete(
    ctx: &mut CompoundContext<'_>,
    input: &mut (impl Read + Send),
    body: &mut Vec<u8>,
) -> anyhow::Result<nfsstat4> {
    let args: RECLAIM_COMPLETE4args = deserialize(input)?;
    let Some(clientid) = ctx.session_client else {
        return status_only(body, nfsstat4::NFS4ERR_OP_NOT_IN_SESSION);
    };
    debug!("op_reclaim_complete(one_fs={})", args.rca_one_fs);
    match ctx.rpc.state.reclaim_complete(clientid) {
        Ok(()) => status_only(body, nfsstat4::NFS4_OK),
        Err(e) => status_only(body, e.nfsstat()),
    }
}

/// SET_SSV is decoded for wire compatibility and refused: SSV state
/// protection is never negotiated by EXCHANGE_ID here.
pub fn op_set_ssv(
    _ctx: &mut CompoundContext<'_>,
    input: &mut (impl Read + Send),
    body: &mut Vec<u8>,
) -> anyhow::Result<nfsstat4> {
    let _args: SET_SSV4args = deserialize(input)?;
    status_only(body, nfsstat4::NFS4ERR_NOTSUPP)
}
