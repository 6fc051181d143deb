//! XDR data types and constants shared by NFS version 4 minor versions 0
//! and 1, as defined in RFC 7530 and RFC 8881.
//!
//! NFSv4 folds the MOUNT, lock and status protocols of earlier versions
//! into a single COMPOUND-structured protocol. This module defines the
//! constants, basic data types, status codes and operation numbers;
//! operation argument and result structures live in the sibling modules,
//! split by concern the same way the protocol text groups them.

// Allow unused code since we implement the full protocol constant set
#![allow(dead_code)]
// Preserve original RFC naming conventions for consistency with the specification
#![allow(non_camel_case_types)]

use std::fmt;
use std::io::{Read, Write};

use byteorder::{ReadBytesExt, WriteBytesExt};
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::cast::FromPrimitive;

use super::{Deserialize, Serialize};
use crate::{DeserializeStruct, SerializeStruct};

pub mod attr;
pub mod dir;
pub mod file;
pub mod lock;
pub mod session;

/// The RPC program number for the NFS service.
pub const PROGRAM: u32 = 100003;
/// The program version number for NFS version 4.
pub const VERSION: u32 = 4;

/// The maximum size in bytes of an opaque filehandle.
pub const NFS4_FHSIZE: usize = 128;
/// The size in bytes of a verifier.
pub const NFS4_VERIFIER_SIZE: usize = 8;
/// The size in bytes of a session identifier.
pub const NFS4_SESSIONID_SIZE: usize = 16;
/// The size in bytes of the non-seqid portion of a stateid.
pub const NFS4_OTHER_SIZE: usize = 12;
/// The maximum size of client-supplied opaque owner identifiers.
pub const NFS4_OPAQUE_LIMIT: usize = 1024;
/// The maximum number of operations accepted in a single COMPOUND.
pub const MAX_COMPOUND_OPS: u32 = 128;

/// An 8-byte verifier (boot instance, write stability, create atomicity).
pub type verifier4 = [u8; NFS4_VERIFIER_SIZE];
/// A 16-byte session identifier.
pub type sessionid4 = [u8; NFS4_SESSIONID_SIZE];
/// A 64-bit shorthand identity for a client record.
pub type clientid4 = u64;
/// A per-slot or per-owner sequence number.
pub type sequenceid4 = u32;
/// A session slot index.
pub type slotid4 = u32;
/// Byte counts on the wire.
pub type count4 = u32;
/// Byte offsets within files.
pub type offset4 = u64;
/// Byte-range lengths; `u64::MAX` is the "to end of file" sentinel.
pub type length4 = u64;
/// A change attribute value.
pub type changeid4 = u64;
/// Lease duration in seconds.
pub type nfs_lease4 = u32;
/// READDIR position cookie.
pub type nfs_cookie4 = u64;
/// A quality-of-protection value inside an RPCSEC_GSS SECINFO entry.
pub type qop4 = u32;

/// A byte-string type used on the NFSv4 wire for names, owner strings and
/// link texts. UTF-8 validity is checked where the protocol requires it,
/// not at decode time.
#[derive(Default, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct nfsstring(pub Vec<u8>);

impl nfsstring {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for nfsstring {
    fn from(value: Vec<u8>) -> Self {
        Self(value)
    }
}

impl From<&[u8]> for nfsstring {
    fn from(value: &[u8]) -> Self {
        Self(value.into())
    }
}

impl From<&str> for nfsstring {
    fn from(value: &str) -> Self {
        Self(value.as_bytes().into())
    }
}

impl AsRef<[u8]> for nfsstring {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl std::ops::Deref for nfsstring {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Debug for nfsstring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Display for nfsstring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl Serialize for nfsstring {
    fn serialize<R: Write>(&self, dest: &mut R) -> std::io::Result<()> {
        self.0.serialize(dest)
    }
}

impl Deserialize for nfsstring {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        self.0.deserialize(src)
    }
}

/// A pathname component.
pub type component4 = nfsstring;
/// Symbolic link contents.
pub type linktext4 = nfsstring;
/// Case-sensitive UTF-8 string.
pub type utf8str_cs = nfsstring;
/// Case-insensitive UTF-8 string.
pub type utf8str_cis = nfsstring;
/// A GSS mechanism object identifier in DER form.
pub type sec_oid4 = Vec<u8>;

/// The NFS version 4 filehandle: an opaque byte string of at most
/// [`NFS4_FHSIZE`] bytes whose internal format is the server's business.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct nfs_fh4 {
    pub data: Vec<u8>,
}

impl fmt::Debug for nfs_fh4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.data {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl From<Vec<u8>> for nfs_fh4 {
    fn from(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl From<&[u8]> for nfs_fh4 {
    fn from(data: &[u8]) -> Self {
        Self { data: data.to_vec() }
    }
}

impl Serialize for nfs_fh4 {
    fn serialize<R: Write>(&self, dest: &mut R) -> std::io::Result<()> {
        self.data.serialize(dest)
    }
}

impl Deserialize for nfs_fh4 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        self.data = super::deserialize_opaque_max(src, NFS4_FHSIZE)?;
        Ok(())
    }
}

/// A 16-byte server-minted handle identifying an open, a lock set or a
/// delegation: a 4-byte sequence number followed by 12 opaque bytes.
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct stateid4 {
    pub seqid: u32,
    pub other: [u8; NFS4_OTHER_SIZE],
}
DeserializeStruct!(stateid4, seqid, other);
SerializeStruct!(stateid4, seqid, other);

impl stateid4 {
    /// The all-zero "anonymous" stateid.
    pub const fn anonymous() -> stateid4 {
        stateid4 { seqid: 0, other: [0; NFS4_OTHER_SIZE] }
    }

    /// The all-ones "READ bypass" stateid.
    pub const fn read_bypass() -> stateid4 {
        stateid4 { seqid: u32::MAX, other: [0xff; NFS4_OTHER_SIZE] }
    }

    /// True for the two special stateids that validate without state lookup.
    pub fn is_special(&self) -> bool {
        *self == stateid4::anonymous() || *self == stateid4::read_bypass()
    }
}

impl fmt::Debug for stateid4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stateid4({}:", self.seqid)?;
        for b in &self.other {
            write!(f, "{b:02x}")?;
        }
        write!(f, ")")
    }
}

/// NFS version 4 time structure. Seconds are signed to represent times
/// before the epoch.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct nfstime4 {
    pub seconds: i64,
    pub nseconds: u32,
}
DeserializeStruct!(nfstime4, seconds, nseconds);
SerializeStruct!(nfstime4, seconds, nseconds);

/// Filesystem identity reported through the fattr4 FSID attribute.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct fsid4 {
    pub major: u64,
    pub minor: u64,
}
DeserializeStruct!(fsid4, major, minor);
SerializeStruct!(fsid4, major, minor);

/// Major/minor device numbers for block and character specials.
#[derive(Copy, Clone, Debug, Default)]
pub struct specdata4 {
    pub specdata1: u32,
    pub specdata2: u32,
}
DeserializeStruct!(specdata4, specdata1, specdata2);
SerializeStruct!(specdata4, specdata1, specdata2);

/// Directory change information returned by operations that mutate a
/// directory. `atomic` is true when before/after were captured atomically
/// with the operation.
#[derive(Copy, Clone, Debug, Default)]
pub struct change_info4 {
    pub atomic: bool,
    pub before: changeid4,
    pub after: changeid4,
}
DeserializeStruct!(change_info4, atomic, before, after);
SerializeStruct!(change_info4, atomic, before, after);

/// An attribute bitmap: a counted array of 32-bit words, attribute bit N
/// living at bit `N % 32` of word `N / 32`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct bitmap4(pub Vec<u32>);

impl bitmap4 {
    /// Returns an empty bitmap.
    pub fn new() -> bitmap4 {
        bitmap4(Vec::new())
    }

    /// Builds a bitmap from a list of attribute numbers.
    pub fn of(bits: &[u32]) -> bitmap4 {
        let mut map = bitmap4::new();
        for &bit in bits {
            map.set(bit);
        }
        map
    }

    pub fn is_set(&self, bit: u32) -> bool {
        let word = (bit / 32) as usize;
        self.0.get(word).is_some_and(|w| w & (1 << (bit % 32)) != 0)
    }

    pub fn set(&mut self, bit: u32) {
        let word = (bit / 32) as usize;
        if self.0.len() <= word {
            self.0.resize(word + 1, 0);
        }
        self.0[word] |= 1 << (bit % 32);
    }

    /// Iterates set bits in ascending numeric order.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.iter().enumerate().flat_map(|(word, &w)| {
            (0..32).filter(move |bit| w & (1 << bit) != 0).map(move |bit| word as u32 * 32 + bit)
        })
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|&w| w == 0)
    }
}

impl Serialize for bitmap4 {
    fn serialize<R: Write>(&self, dest: &mut R) -> std::io::Result<()> {
        self.0.serialize(dest)
    }
}

impl Deserialize for bitmap4 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        self.0.deserialize(src)
    }
}

/// File attribute container: the attribute set present, and their packed
/// representations concatenated in ascending bit order.
#[derive(Clone, Debug, Default)]
pub struct fattr4 {
    pub attrmask: bitmap4,
    pub attr_vals: Vec<u8>,
}
DeserializeStruct!(fattr4, attrmask, attr_vals);
SerializeStruct!(fattr4, attrmask, attr_vals);

/// File type enumeration.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum nfs_ftype4 {
    /// Regular file
    #[default]
    NF4REG = 1,
    /// Directory
    NF4DIR = 2,
    /// Block special device
    NF4BLK = 3,
    /// Character special device
    NF4CHR = 4,
    /// Symbolic link
    NF4LNK = 5,
    /// Socket
    NF4SOCK = 6,
    /// Named pipe
    NF4FIFO = 7,
    /// Named attribute directory (unsupported here)
    NF4ATTRDIR = 8,
    /// Named attribute (unsupported here)
    NF4NAMEDATTR = 9,
}
crate::SerializeEnum!(nfs_ftype4);
crate::DeserializeEnum!(nfs_ftype4);

/// Status codes returned by NFS version 4 operations, covering both minor
/// versions served here.
#[allow(clippy::upper_case_acronyms)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum nfsstat4 {
    /// The operation completed successfully.
    #[default]
    NFS4_OK = 0,
    /// Caller is not the owner or a privileged user.
    NFS4ERR_PERM = 1,
    /// No such file or directory.
    NFS4ERR_NOENT = 2,
    /// A hard I/O error occurred while processing the operation.
    NFS4ERR_IO = 5,
    /// No such device or address.
    NFS4ERR_NXIO = 6,
    /// Permission denied.
    NFS4ERR_ACCESS = 13,
    /// The file already exists.
    NFS4ERR_EXIST = 17,
    /// Attempted cross-device hard link.
    NFS4ERR_XDEV = 18,
    /// A non-directory was supplied to a directory operation.
    NFS4ERR_NOTDIR = 20,
    /// A directory was supplied to a non-directory operation.
    NFS4ERR_ISDIR = 21,
    /// Invalid or unsupported argument.
    NFS4ERR_INVAL = 22,
    /// The operation would grow a file beyond the server's limit.
    NFS4ERR_FBIG = 27,
    /// No space left on the backing store.
    NFS4ERR_NOSPC = 28,
    /// Modifying operation on a read-only filesystem or pseudo-fs node.
    NFS4ERR_ROFS = 30,
    /// Too many hard links.
    NFS4ERR_MLINK = 31,
    /// The filename was too long.
    NFS4ERR_NAMETOOLONG = 63,
    /// The directory was not empty.
    NFS4ERR_NOTEMPTY = 66,
    /// Quota hard limit exceeded.
    NFS4ERR_DQUOT = 69,
    /// The filehandle no longer refers to an existing object.
    NFS4ERR_STALE = 70,
    /// Illegal NFS filehandle.
    NFS4ERR_BADHANDLE = 10001,
    /// READDIR cookie is stale.
    NFS4ERR_BAD_COOKIE = 10003,
    /// The operation is not supported.
    NFS4ERR_NOTSUPP = 10004,
    /// The response would exceed the size limit requested by the client.
    NFS4ERR_TOOSMALL = 10005,
    /// An internal server error that maps to no protocol error.
    NFS4ERR_SERVERFAULT = 10006,
    /// An object of that type is not supported.
    NFS4ERR_BADTYPE = 10007,
    /// The server cannot service the request right now; retry later.
    NFS4ERR_DELAY = 10008,
    /// VERIFY: the attributes compared equal where inequality was asserted.
    NFS4ERR_SAME = 10009,
    /// A lock request conflicts with an existing lock.
    NFS4ERR_DENIED = 10010,
    /// The lease has expired.
    NFS4ERR_EXPIRED = 10011,
    /// An I/O range conflicts with a byte-range lock.
    NFS4ERR_LOCKED = 10012,
    /// The server is in its grace period and the request is not a reclaim.
    NFS4ERR_GRACE = 10013,
    /// The filehandle has expired.
    NFS4ERR_FHEXPIRED = 10014,
    /// A share reservation denies the requested access.
    NFS4ERR_SHARE_DENIED = 10015,
    /// Wrong security flavor for this export.
    NFS4ERR_WRONGSEC = 10016,
    /// Clientid in use by another principal.
    NFS4ERR_CLID_INUSE = 10017,
    /// The server has exhausted a resource limit.
    NFS4ERR_RESOURCE = 10018,
    /// The object has been moved to another server.
    NFS4ERR_MOVED = 10019,
    /// No filehandle is set where one is required.
    NFS4ERR_NOFILEHANDLE = 10020,
    /// The requested minor version is not supported.
    NFS4ERR_MINOR_VERS_MISMATCH = 10021,
    /// The clientid is from an earlier server instance.
    NFS4ERR_STALE_CLIENTID = 10022,
    /// The stateid is from an earlier server instance.
    NFS4ERR_STALE_STATEID = 10023,
    /// The stateid designates an older revision of existing state.
    NFS4ERR_OLD_STATEID = 10024,
    /// The stateid failed internal consistency checks.
    NFS4ERR_BAD_STATEID = 10025,
    /// The owner sequence number is out of order.
    NFS4ERR_BAD_SEQID = 10026,
    /// NVERIFY: the attributes compared unequal where equality was asserted.
    NFS4ERR_NOT_SAME = 10027,
    /// The lock range straddles an existing lock in an unsupported way.
    NFS4ERR_LOCK_RANGE = 10028,
    /// A symbolic link was supplied where one is not accepted.
    NFS4ERR_SYMLINK = 10029,
    /// RESTOREFH without a saved filehandle.
    NFS4ERR_RESTOREFH = 10030,
    /// The lease has moved to another server.
    NFS4ERR_LEASE_MOVED = 10031,
    /// An attribute in a SETATTR is not supported or not settable.
    NFS4ERR_ATTRNOTSUPP = 10032,
    /// A reclaim was attempted outside the grace period.
    NFS4ERR_NO_GRACE = 10033,
    /// The reclaim does not match state held before restart.
    NFS4ERR_RECLAIM_BAD = 10034,
    /// A reclaim conflicts with state granted to another client.
    NFS4ERR_RECLAIM_CONFLICT = 10035,
    /// The request was not well-formed XDR.
    NFS4ERR_BADXDR = 10036,
    /// The lock owner still holds locks.
    NFS4ERR_LOCKS_HELD = 10037,
    /// The open mode does not allow the attempted I/O.
    NFS4ERR_OPENMODE = 10038,
    /// An owner/group string could not be translated.
    NFS4ERR_BADOWNER = 10039,
    /// A string contained an illegal character sequence.
    NFS4ERR_BADCHAR = 10040,
    /// A name contained a component the server refuses.
    NFS4ERR_BADNAME = 10041,
    /// A LOCK/LOCKU range is not supported.
    NFS4ERR_BAD_RANGE = 10042,
    /// Blocking lock semantics are not supported.
    NFS4ERR_LOCK_NOTSUPP = 10043,
    /// The opcode is not a legal NFSv4 operation.
    NFS4ERR_OP_ILLEGAL = 10044,
    /// Granting the lock would create a deadlock.
    NFS4ERR_DEADLOCK = 10045,
    /// The file is open and the operation requires it closed.
    NFS4ERR_FILE_OPEN = 10046,
    /// The state has been revoked by an administrator.
    NFS4ERR_ADMIN_REVOKED = 10047,
    /// The callback path is down.
    NFS4ERR_CB_PATH_DOWN = 10048,
    /// The session id is not recognized.
    NFS4ERR_BADSESSION = 10052,
    /// The slot id exceeds the negotiated table size.
    NFS4ERR_BADSLOT = 10053,
    /// RECLAIM_COMPLETE was already done for this client.
    NFS4ERR_COMPLETE_ALREADY = 10054,
    /// The connection is not bound to the session.
    NFS4ERR_CONN_NOT_BOUND_TO_SESSION = 10055,
    /// The request exceeds the negotiated maximum request size.
    NFS4ERR_REQ_TOO_BIG = 10065,
    /// The reply would exceed the negotiated maximum response size.
    NFS4ERR_REP_TOO_BIG = 10066,
    /// The reply would exceed the cached-response maximum.
    NFS4ERR_REP_TOO_BIG_TO_CACHE = 10067,
    /// A replay arrived for a request whose reply was not cached.
    NFS4ERR_RETRY_UNCACHED_REP = 10068,
    /// The COMPOUND mixes non-idempotent ops unsafely.
    NFS4ERR_UNSAFE_COMPOUND = 10069,
    /// The COMPOUND holds more operations than the channel allows.
    NFS4ERR_TOO_MANY_OPS = 10070,
    /// A sessioned operation arrived outside a session.
    NFS4ERR_OP_NOT_IN_SESSION = 10071,
    /// The sequence id is neither a replay nor the successor.
    NFS4ERR_SEQ_MISORDERED = 10063,
    /// SEQUENCE appeared at a position other than the first.
    NFS4ERR_SEQUENCE_POS = 10064,
    /// The hash algorithm is not supported (SSV).
    NFS4ERR_HASH_ALG_UNSUPP = 10072,
    /// The clientid is busy with other state.
    NFS4ERR_CLIENTID_BUSY = 10074,
    /// A false retry was detected on the slot.
    NFS4ERR_SEQ_FALSE_RETRY = 10076,
    /// The highest-slot argument is invalid.
    NFS4ERR_BAD_HIGH_SLOT = 10077,
    /// The session is dead and cannot accept new requests.
    NFS4ERR_DEADSESSION = 10078,
    /// The encryption algorithm is not supported (SSV).
    NFS4ERR_ENCR_ALG_UNSUPP = 10079,
    /// The operation must be the only one in its COMPOUND.
    NFS4ERR_NOT_ONLY_OP = 10081,
    /// The credential does not match the state's creating credential.
    NFS4ERR_WRONG_CRED = 10082,
    /// The object is of the wrong type for the operation.
    NFS4ERR_WRONG_TYPE = 10083,
    /// Directory delegations are unavailable.
    NFS4ERR_DIRDELEG_UNAVAIL = 10084,
    /// The delegation offer is rejected.
    NFS4ERR_REJECT_DELEG = 10085,
    /// A DELEGRETURN conflicts with an outstanding recall.
    NFS4ERR_RETURNCONFLICT = 10086,
    /// The delegation has been revoked.
    NFS4ERR_DELEG_REVOKED = 10087,
}
crate::SerializeEnum!(nfsstat4);
crate::DeserializeEnum!(nfsstat4);

/// Operation numbers carried in COMPOUND argument and result arrays.
#[allow(clippy::upper_case_acronyms)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum nfs_opnum4 {
    OP_ACCESS = 3,
    OP_CLOSE = 4,
    OP_COMMIT = 5,
    OP_CREATE = 6,
    OP_DELEGPURGE = 7,
    OP_DELEGRETURN = 8,
    OP_GETATTR = 9,
    OP_GETFH = 10,
    OP_LINK = 11,
    OP_LOCK = 12,
    OP_LOCKT = 13,
    OP_LOCKU = 14,
    OP_LOOKUP = 15,
    OP_LOOKUPP = 16,
    OP_NVERIFY = 17,
    OP_OPEN = 18,
    OP_OPENATTR = 19,
    OP_OPEN_CONFIRM = 20,
    OP_OPEN_DOWNGRADE = 21,
    OP_PUTFH = 22,
    OP_PUTPUBFH = 23,
    OP_PUTROOTFH = 24,
    OP_READ = 25,
    OP_READDIR = 26,
    OP_READLINK = 27,
    OP_REMOVE = 28,
    OP_RENAME = 29,
    OP_RENEW = 30,
    OP_RESTOREFH = 31,
    OP_SAVEFH = 32,
    OP_SECINFO = 33,
    OP_SETATTR = 34,
    OP_SETCLIENTID = 35,
    OP_SETCLIENTID_CONFIRM = 36,
    OP_VERIFY = 37,
    OP_WRITE = 38,
    OP_RELEASE_LOCKOWNER = 39,
    OP_BACKCHANNEL_CTL = 40,
    OP_BIND_CONN_TO_SESSION = 41,
    OP_EXCHANGE_ID = 42,
    OP_CREATE_SESSION = 43,
    OP_DESTROY_SESSION = 44,
    OP_FREE_STATEID = 45,
    OP_GET_DIR_DELEGATION = 46,
    OP_GETDEVICEINFO = 47,
    OP_GETDEVICELIST = 48,
    OP_LAYOUTCOMMIT = 49,
    OP_LAYOUTGET = 50,
    OP_LAYOUTRETURN = 51,
    OP_SECINFO_NO_NAME = 52,
    OP_SEQUENCE = 53,
    OP_SET_SSV = 54,
    OP_TEST_STATEID = 55,
    OP_WANT_DELEGATION = 56,
    OP_DESTROY_CLIENTID = 57,
    OP_RECLAIM_COMPLETE = 58,
    #[default]
    OP_ILLEGAL = 10044,
}
crate::SerializeEnum!(nfs_opnum4);
crate::DeserializeEnum!(nfs_opnum4);

impl nfs_opnum4 {
    /// True for the operations new in minor version 1.
    pub fn is_minor_one_only(&self) -> bool {
        (*self as u32) >= nfs_opnum4::OP_BACKCHANNEL_CTL as u32
            && (*self as u32) <= nfs_opnum4::OP_RECLAIM_COMPLETE as u32
    }

    /// True for v4.0-era operations that minor version 1 removed; inside a
    /// v4.1 COMPOUND they are answered NFS4ERR_NOTSUPP.
    pub fn is_removed_in_minor_one(&self) -> bool {
        matches!(
            self,
            nfs_opnum4::OP_SETCLIENTID
                | nfs_opnum4::OP_SETCLIENTID_CONFIRM
                | nfs_opnum4::OP_RENEW
                | nfs_opnum4::OP_OPEN_CONFIRM
                | nfs_opnum4::OP_RELEASE_LOCKOWNER
        )
    }

    /// True for the v4.1 operations allowed to start a COMPOUND without a
    /// preceding SEQUENCE.
    pub fn is_session_exempt(&self) -> bool {
        matches!(
            self,
            nfs_opnum4::OP_EXCHANGE_ID
                | nfs_opnum4::OP_CREATE_SESSION
                | nfs_opnum4::OP_DESTROY_SESSION
                | nfs_opnum4::OP_BIND_CONN_TO_SESSION
        )
    }
}
