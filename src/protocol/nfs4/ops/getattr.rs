//! GETATTR plus the comparison operations VERIFY and NVERIFY, all built on
//! the bitmap-directed attribute codec.

use std::io::Read;

use tracing::debug;

use crate::protocol::xdr::deserialize;
use crate::protocol::xdr::nfs4::attr::encode_attrs;
use crate::protocol::xdr::nfs4::{bitmap4, fattr4, nfsstat4};
use crate::protocol::xdr::Serialize;

use super::super::CompoundContext;
use super::{attr_source_for, status_only};

pub async fn op_getattr(
    ctx: &mut CompoundContext<'_>,
    input: &mut (impl Read + Send),
    body: &mut Vec<u8>,
) -> anyhow::Result<nfsstat4> {
    let requested: bitmap4 = deserialize(input)?;
    let Ok(fh) = ctx.require_current_fh() else {
        return status_only(body, nfsstat4::NFS4ERR_NOFILEHANDLE);
    };
    debug!("op_getattr({:?})", requested);
    let source = match attr_source_for(ctx, &fh).await {
        Ok(source) => source,
        Err(status) => return status_only(body, status),
    };
    let encoded = encode_attrs(&requested, &source)?;
    nfsstat4::NFS4_OK.serialize(body)?;
    encoded.serialize(body)?;
    Ok(nfsstat4::NFS4_OK)
}

/// Encodes our view of the presented attribute mask and compares it with
/// the client's bytes. VERIFY succeeds on equality, NVERIFY on inequality.
async fn compare_attrs(
    ctx: &mut CompoundContext<'_>,
    presented: &fattr4,
) -> Result<bool, nfsstat4> {
    let fh = ctx.require_current_fh()?;
    let source = attr_source_for(ctx, &fh).await?;
    let ours = encode_attrs(&presented.attrmask, &source)
        .map_err(|_| nfsstat4::NFS4ERR_SERVERFAULT)?;
    // Bits we cannot supply cannot be compared.
    if ours.attrmask != presented.attrmask {
        return Err(nfsstat4::NFS4ERR_ATTRNOTSUPP);
    }
    Ok(ours.attr_vals == presented.attr_vals)
}

pub async fn op_verify(
    ctx: &mut CompoundContext<'_>,
    input: &mut (impl Read + Send),
    body: &mut Vec<u8>,
) -> anyhow::Result<nfsstat4> {
    let presented: fattr4 = deserialize(input)?;
    match compare_attrs(ctx, &presented).await {
        Ok(true) => status_only(body, nfsstat4::NFS4_OK),
        Ok(false) => status_only(body, nfsstat4::NFS4ERR_NOT_SAME),
        Err(status) => status_only(body, status),
    }
}

pub async fn op_nverify(
    ctx: &mut CompoundContext<'_>,
    input: &mut (impl Read + Send),
    body: &mut Vec<u8>,
) -> anyhow::Result<nfsstat4> {
    let presented: fattr4 = deserialize(input)?;
    match compare_attrs(ctx, &presented).await {
        Ok(true) => status_only(body, nfsstat4::NFS4ERR_SAME),
        Ok(false) => status_only(body, nfsstat4::NFS4_OK),
        Err(status) => status_only(body, status),
    }
}
