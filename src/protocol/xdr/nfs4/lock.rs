//! XDR structures for the byte-range locking operations LOCK, LOCKT and
//! LOCKU, plus RELEASE_LOCKOWNER.

// Allow unused code since the full argument surface is implemented
#![allow(dead_code)]
// Preserve original RFC naming conventions for consistency with the specification
#![allow(non_camel_case_types)]

use std::io::{Read, Write};

use byteorder::{ReadBytesExt, WriteBytesExt};
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::cast::FromPrimitive;

use super::{clientid4, length4, offset4, sequenceid4, stateid4};
use crate::protocol::xdr::{deserialize, Deserialize, Serialize};
use crate::{DeserializeEnum, DeserializeStruct, SerializeEnum, SerializeStruct};

/// The "to end of file" sentinel for lock lengths.
pub const NFS4_LENGTH_EOF: length4 = u64::MAX;

/// Byte-range lock types. The W variants request blocking behavior, which
/// this server expresses as NFS4ERR_DENIED like their non-blocking peers.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum nfs_lock_type4 {
    #[default]
    READ_LT = 1,
    WRITE_LT = 2,
    READW_LT = 3,
    WRITEW_LT = 4,
}
SerializeEnum!(nfs_lock_type4);
DeserializeEnum!(nfs_lock_type4);

impl nfs_lock_type4 {
    /// True for the write-exclusive variants.
    pub fn is_write(&self) -> bool {
        matches!(self, nfs_lock_type4::WRITE_LT | nfs_lock_type4::WRITEW_LT)
    }
}

/// The client-scoped identity a lock set is charged to.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct lock_owner4 {
    pub clientid: clientid4,
    pub owner: Vec<u8>,
}
DeserializeStruct!(lock_owner4, clientid, owner);
SerializeStruct!(lock_owner4, clientid, owner);

/// The "open-to-lock-owner" transition: the first lock by a new lock-owner
/// rides on an open stateid.
#[derive(Clone, Debug, Default)]
pub struct open_to_lock_owner4 {
    pub open_seqid: sequenceid4,
    pub open_stateid: stateid4,
    pub lock_seqid: sequenceid4,
    pub lock_owner: lock_owner4,
}
DeserializeStruct!(open_to_lock_owner4, open_seqid, open_stateid, lock_seqid, lock_owner);
SerializeStruct!(open_to_lock_owner4, open_seqid, open_stateid, lock_seqid, lock_owner);

/// Subsequent locks by an existing lock-owner reference its lock stateid.
#[derive(Clone, Debug, Default)]
pub struct exist_lock_owner4 {
    pub lock_stateid: stateid4,
    pub lock_seqid: sequenceid4,
}
DeserializeStruct!(exist_lock_owner4, lock_stateid, lock_seqid);
SerializeStruct!(exist_lock_owner4, lock_stateid, lock_seqid);

/// The locker union: discriminated by `new_lock_owner`.
#[derive(Clone, Debug)]
pub enum locker4 {
    /// TRUE arm: create the lock-owner from an open stateid.
    New(open_to_lock_owner4),
    /// FALSE arm: an existing lock-owner adds a range.
    Existing(exist_lock_owner4),
}

impl Default for locker4 {
    fn default() -> locker4 {
        locker4::Existing(exist_lock_owner4::default())
    }
}

impl Serialize for locker4 {
    fn serialize<R: Write>(&self, dest: &mut R) -> std::io::Result<()> {
        match self {
            locker4::New(body) => {
                true.serialize(dest)?;
                body.serialize(dest)
            }
            locker4::Existing(body) => {
                false.serialize(dest)?;
                body.serialize(dest)
            }
        }
    }
}

impl Deserialize for locker4 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        let mut new_lock_owner = false;
        new_lock_owner.deserialize(src)?;
        if new_lock_owner {
            *self = locker4::New(deserialize(src)?);
        } else {
            *self = locker4::Existing(deserialize(src)?);
        }
        Ok(())
    }
}

/// Arguments for LOCK.
#[derive(Clone, Debug, Default)]
pub struct LOCK4args {
    pub locktype: nfs_lock_type4,
    pub reclaim: bool,
    pub offset: offset4,
    pub length: length4,
    pub locker: locker4,
}
DeserializeStruct!(LOCK4args, locktype, reclaim, offset, length, locker);
SerializeStruct!(LOCK4args, locktype, reclaim, offset, length, locker);

/// Arguments for LOCKT.
#[derive(Clone, Debug, Default)]
pub struct LOCKT4args {
    pub locktype: nfs_lock_type4,
    pub owner: lock_owner4,
    pub offset: offset4,
    pub length: length4,
}
DeserializeStruct!(LOCKT4args, locktype, owner, offset, length);
SerializeStruct!(LOCKT4args, locktype, owner, offset, length);

/// Arguments for LOCKU.
#[derive(Clone, Debug, Default)]
pub struct LOCKU4args {
    pub locktype: nfs_lock_type4,
    pub seqid: sequenceid4,
    pub lock_stateid: stateid4,
    pub offset: offset4,
    pub length: length4,
}
DeserializeStruct!(LOCKU4args, locktype, seqid, lock_stateid, offset, length);
SerializeStruct!(LOCKU4args, locktype, seqid, lock_stateid, offset, length);

/// The conflicting-lock description returned with NFS4ERR_DENIED.
#[derive(Clone, Debug, Default)]
pub struct LOCK4denied {
    pub offset: offset4,
    pub length: length4,
    pub locktype: nfs_lock_type4,
    pub owner: lock_owner4,
}
DeserializeStruct!(LOCK4denied, offset, length, locktype, owner);
SerializeStruct!(LOCK4denied, offset, length, locktype, owner);

/// Arguments for RELEASE_LOCKOWNER (v4.0 only).
#[derive(Clone, Debug, Default)]
pub struct RELEASE_LOCKOWNER4args {
    pub lock_owner: lock_owner4,
}
DeserializeStruct!(RELEASE_LOCKOWNER4args, lock_owner);
SerializeStruct!(RELEASE_LOCKOWNER4args, lock_owner);

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn lock_args_new_owner_round_trip() {
        let args = LOCK4args {
            locktype: nfs_lock_type4::WRITE_LT,
            reclaim: false,
            offset: 100,
            length: NFS4_LENGTH_EOF,
            locker: locker4::New(open_to_lock_owner4 {
                open_seqid: 1,
                open_stateid: stateid4::anonymous(),
                lock_seqid: 0,
                lock_owner: lock_owner4 { clientid: 5, owner: b"lo".to_vec() },
            }),
        };
        let mut buf = Vec::new();
        args.serialize(&mut buf).unwrap();
        let back: LOCK4args = deserialize(&mut Cursor::new(&buf)).unwrap();
        assert!(back.locktype.is_write());
        assert_eq!(back.length, NFS4_LENGTH_EOF);
        assert!(matches!(back.locker, locker4::New(ref b) if b.lock_owner.owner == b"lo"));
    }
}
