//! DELEGRETURN: a client hands back a delegation, unblocking any opener
//! that was parked on NFS4ERR_DELAY.

use std::io::Read;

use tracing::debug;

use crate::protocol::xdr::deserialize;
use crate::protocol::xdr::nfs4::file::DELEGRETURN4args;
use crate::protocol::xdr::nfs4::nfsstat4;

use super::super::CompoundContext;
use super::status_only;

pub async fn op_delegreturn(
    ctx: &mut CompoundContext<'_>,
    input: &mut (impl Read + Send),
    body: &mut Vec<u8>,
) -> anyhow::Result<nfsstat4> {
    let args: DELEGRETURN4args = deserialize(input)?;
    if ctx.require_current_fh().is_err() {
        return status_only(body, nfsstat4::NFS4ERR_NOFILEHANDLE);
    }
    debug!("op_delegreturn({:?})", args.deleg_stateid);
    match ctx.rpc.state.return_delegation(&args.deleg_stateid) {
        Ok(()) => status_only(body, nfsstat4::NFS4_OK),
        Err(e) => status_only(body, e.nfsstat()),
    }
}
