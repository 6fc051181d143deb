//! Wire-facing modules: XDR codec, RPC transport, and the NFSv4, portmap
//! and NSM services.

pub mod nfs4;
pub mod nsm;
pub mod portmap;
pub mod rpc;
pub mod xdr;
