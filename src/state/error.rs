//! Typed error kinds surfaced by the state manager, with the fixed
//! translation table onto NFS status codes.

use thiserror::Error;

use crate::protocol::xdr::nfs4::lock::LOCK4denied;
use crate::protocol::xdr::nfs4::nfsstat4;

/// Result of state-manager operations.
pub type Result<T> = std::result::Result<T, StateError>;

/// Error kinds raised by the state manager. Handlers never interpret these
/// beyond mapping them through [`StateError::nfsstat`], except DENIED which
/// carries the conflicting holder for the LOCK4denied reply body.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("client id is from an earlier server instance")]
    StaleClientId,
    #[error("client record not found or not confirmed")]
    BadClientId,
    #[error("session id is not recognized")]
    BadSession,
    #[error("lease has expired")]
    ExpiredState,
    #[error("stateid failed consistency checks")]
    BadStateid,
    #[error("stateid designates an older revision of the state")]
    OldStateid,
    #[error("stateid is from an earlier server instance")]
    StaleStateid,
    #[error("owner sequence id is out of order")]
    BadSeqid,
    #[error("I/O range conflicts with a byte-range lock")]
    Locked,
    #[error("lock request conflicts with a held lock")]
    Denied(Box<LOCK4denied>),
    #[error("share reservation conflict")]
    ShareDenied,
    #[error("server is in its grace period")]
    GraceActive,
    #[error("reclaim attempted outside the grace period")]
    NoGrace,
    #[error("reclaim does not match pre-restart state")]
    ReclaimBad,
    #[error("operation not supported")]
    NotSupp,
    #[error("invalid argument")]
    Inval,
    #[error("a server resource limit was reached")]
    ResourceExhausted,
    #[error("a conflicting delegation is being recalled")]
    DelegationConflict,
    #[error("slot sequence id is neither replay nor successor")]
    SeqMisordered,
    #[error("slot id exceeds the negotiated table size")]
    BadSlot,
    #[error("slot is busy with an in-flight request")]
    SlotBusy,
    #[error("replay of a request whose reply was not cached")]
    RetryUncachedRep,
    #[error("credential does not match the state's creating credential")]
    WrongCred,
    #[error("lock owner still holds locks")]
    LocksHeld,
    #[error("clientid still has sessions or state")]
    ClientidBusy,
    #[error("reclaim already completed for this client")]
    CompleteAlready,
    #[error("open mode does not permit the attempted I/O")]
    OpenMode,
}

impl StateError {
    /// The fixed translation onto NFS status codes.
    pub fn nfsstat(&self) -> nfsstat4 {
        match self {
            StateError::StaleClientId => nfsstat4::NFS4ERR_STALE_CLIENTID,
            StateError::BadClientId => nfsstat4::NFS4ERR_STALE_CLIENTID,
            StateError::BadSession => nfsstat4::NFS4ERR_BADSESSION,
            StateError::ExpiredState => nfsstat4::NFS4ERR_EXPIRED,
            StateError::BadStateid => nfsstat4::NFS4ERR_BAD_STATEID,
            StateError::OldStateid => nfsstat4::NFS4ERR_OLD_STATEID,
            StateError::StaleStateid => nfsstat4::NFS4ERR_STALE_STATEID,
            StateError::BadSeqid => nfsstat4::NFS4ERR_BAD_SEQID,
            StateError::Locked => nfsstat4::NFS4ERR_LOCKED,
            StateError::Denied(_) => nfsstat4::NFS4ERR_DENIED,
            StateError::ShareDenied => nfsstat4::NFS4ERR_SHARE_DENIED,
            StateError::GraceActive => nfsstat4::NFS4ERR_GRACE,
            StateError::NoGrace => nfsstat4::NFS4ERR_NO_GRACE,
            StateError::ReclaimBad => nfsstat4::NFS4ERR_RECLAIM_BAD,
            StateError::NotSupp => nfsstat4::NFS4ERR_NOTSUPP,
            StateError::Inval => nfsstat4::NFS4ERR_INVAL,
            StateError::ResourceExhausted => nfsstat4::NFS4ERR_RESOURCE,
            StateError::DelegationConflict => nfsstat4::NFS4ERR_DELAY,
            StateError::SeqMisordered => nfsstat4::NFS4ERR_SEQ_MISORDERED,
            StateError::BadSlot => nfsstat4::NFS4ERR_BADSLOT,
            StateError::SlotBusy => nfsstat4::NFS4ERR_DELAY,
            StateError::RetryUncachedRep => nfsstat4::NFS4ERR_RETRY_UNCACHED_REP,
            StateError::WrongCred => nfsstat4::NFS4ERR_WRONG_CRED,
            StateError::LocksHeld => nfsstat4::NFS4ERR_LOCKS_HELD,
            StateError::ClientidBusy => nfsstat4::NFS4ERR_CLIENTID_BUSY,
            StateError::CompleteAlready => nfsstat4::NFS4ERR_COMPLETE_ALREADY,
            StateError::OpenMode => nfsstat4::NFS4ERR_OPENMODE,
        }
    }
}
