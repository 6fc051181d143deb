//! The v4.0 client-identity operations: SETCLIENTID, SETCLIENTID_CONFIRM
//! and RENEW. Inside a v4.1 COMPOUND the engine answers these
//! NFS4ERR_NOTSUPP before dispatch ever reaches here.

use std::io::Read;

use tracing::debug;

use crate::protocol::xdr::deserialize;
use crate::protocol::xdr::nfs4::nfsstat4;
use crate::protocol::xdr::nfs4::session::{
    RENEW4args, SETCLIENTID4args, SETCLIENTID_CONFIRM4args,
};
use crate::protocol::xdr::Serialize;

use super::super::CompoundContext;
use super::status_only;

pub fn op_setclientid(
    ctx: &mut CompoundContext<'_>,
    input: &mut (impl Read + Send),
    body: &mut Vec<u8>,
) -> anyhow::Result<nfsstat4> {
    let args: SETCLIENTID4args = deserialize(input)?;
    debug!("op_setclientid({:?})", args.client.id);
    match ctx.rpc.state.setclientid(
        &args.client.id,
        args.client.verifier,
        args.callback.cb_program,
    ) {
        Ok((clientid, confirm)) => {
            nfsstat4::NFS4_OK.serialize(body)?;
            clientid.serialize(body)?;
            confirm.serialize(body)?;
            Ok(nfsstat4::NFS4_OK)
        }
        Err(e) => status_only(body, e.nfsstat()),
    }
}

pub fn op_setclientid_confirm(
    ctx: &mut CompoundContext<'_>,
    input: &mut (impl Read + Send),
    body: &mut Vec<u8>,
) -> anyhow::Result<nfsstat4> {
    let args: SETCLIENTID_CONFIRM4args = deserialize(input)?;
    match ctx.rpc.state.setclientid_confirm(args.clientid, args.setclientid_confirm) {
        Ok(()) => status_only(body, nfsstat4::NFS4_OK),
        Err(e) => status_only(body, e.nfsstat()),
    }
}

pub fn op_renew(
    ctx: &mut CompoundContext<'_>,
    input: &mut (impl Read + Send),
    body: &mut Vec<u8>,
) -> anyhow::Result<nfsstat4> {
    let args: RENEW4args = deserialize(input)?;
    match ctx.rpc.state.renew_lease(args.clientid) {
        Ok(()) => status_only(body, nfsstat4::NFS4_OK),
        Err(e) => status_only(body, e.nfsstat()),
    }
}
