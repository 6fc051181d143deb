//! XDR structures for file-directed NFSv4 operations: OPEN and its
//! companions, READ/WRITE/COMMIT, SETATTR, ACCESS and DELEGRETURN.
//!
//! Result encoding is done field-by-field by the operation handlers; the
//! argument side is fully typed here so decode consumes exactly the declared
//! bytes.

// Allow unused code since the full argument surface is implemented
#![allow(dead_code)]
// Preserve original RFC naming conventions for consistency with the specification
#![allow(non_camel_case_types)]

use std::io::{Read, Write};

use byteorder::{ReadBytesExt, WriteBytesExt};
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::cast::FromPrimitive;

use super::{clientid4, component4, count4, fattr4, offset4, sequenceid4, stateid4, verifier4};
use crate::protocol::xdr::{deserialize, invalid_data, Deserialize, Serialize};
use crate::{DeserializeEnum, DeserializeStruct, SerializeEnum, SerializeStruct};

/// Access permission to read file data or list a directory.
pub const ACCESS4_READ: u32 = 0x0001;
/// Access permission to look up names in a directory.
pub const ACCESS4_LOOKUP: u32 = 0x0002;
/// Access permission to modify an existing file.
pub const ACCESS4_MODIFY: u32 = 0x0004;
/// Access permission to grow a file or add directory entries.
pub const ACCESS4_EXTEND: u32 = 0x0008;
/// Access permission to delete a file or directory entry.
pub const ACCESS4_DELETE: u32 = 0x0010;
/// Access permission to execute a file or traverse a directory.
pub const ACCESS4_EXECUTE: u32 = 0x0020;

/// Share access bit: the open permits reads.
pub const OPEN4_SHARE_ACCESS_READ: u32 = 0x1;
/// Share access bit: the open permits writes.
pub const OPEN4_SHARE_ACCESS_WRITE: u32 = 0x2;
/// Both access bits.
pub const OPEN4_SHARE_ACCESS_BOTH: u32 = 0x3;
/// Share deny: deny nothing.
pub const OPEN4_SHARE_DENY_NONE: u32 = 0x0;
/// Share deny: deny reads from other owners.
pub const OPEN4_SHARE_DENY_READ: u32 = 0x1;
/// Share deny: deny writes from other owners.
pub const OPEN4_SHARE_DENY_WRITE: u32 = 0x2;
/// Share deny: deny both.
pub const OPEN4_SHARE_DENY_BOTH: u32 = 0x3;

/// OPEN result flag: the client must send OPEN_CONFIRM.
pub const OPEN4_RESULT_CONFIRM: u32 = 0x2;
/// OPEN result flag: the server enforces POSIX lock semantics.
pub const OPEN4_RESULT_LOCKTYPE_POSIX: u32 = 0x4;

/// Write stability levels.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum stable_how4 {
    /// The server may cache the write and reply before it is durable.
    #[default]
    UNSTABLE4 = 0,
    /// Data must be durable before the reply.
    DATA_SYNC4 = 1,
    /// Data and metadata must be durable before the reply.
    FILE_SYNC4 = 2,
}
SerializeEnum!(stable_how4);
DeserializeEnum!(stable_how4);

/// Delegation types carried in OPEN results and CLAIM_PREVIOUS arguments.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum open_delegation_type4 {
    #[default]
    OPEN_DELEGATE_NONE = 0,
    OPEN_DELEGATE_READ = 1,
    OPEN_DELEGATE_WRITE = 2,
}
SerializeEnum!(open_delegation_type4);
DeserializeEnum!(open_delegation_type4);

/// The client-scoped identity an open is charged to.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct open_owner4 {
    pub clientid: clientid4,
    pub owner: Vec<u8>,
}
DeserializeStruct!(open_owner4, clientid, owner);
SerializeStruct!(open_owner4, clientid, owner);

/// How OPEN should create the file, when it creates at all.
#[derive(Clone, Debug)]
pub enum createhow4 {
    /// Create unless it exists; an existing file is opened as-is.
    Unchecked(fattr4),
    /// Fail with NFS4ERR_EXIST when the file exists.
    Guarded(fattr4),
    /// Verifier-based exclusive create (v4.0 style).
    Exclusive(verifier4),
    /// Verifier-based exclusive create with attributes (v4.1 style).
    Exclusive41(verifier4, fattr4),
}

impl Default for createhow4 {
    fn default() -> createhow4 {
        createhow4::Unchecked(fattr4::default())
    }
}

impl Serialize for createhow4 {
    fn serialize<R: Write>(&self, dest: &mut R) -> std::io::Result<()> {
        match self {
            createhow4::Unchecked(attrs) => {
                0u32.serialize(dest)?;
                attrs.serialize(dest)?;
            }
            createhow4::Guarded(attrs) => {
                1u32.serialize(dest)?;
                attrs.serialize(dest)?;
            }
            createhow4::Exclusive(verf) => {
                2u32.serialize(dest)?;
                verf.serialize(dest)?;
            }
            createhow4::Exclusive41(verf, attrs) => {
                3u32.serialize(dest)?;
                verf.serialize(dest)?;
                attrs.serialize(dest)?;
            }
        }
        Ok(())
    }
}

impl Deserialize for createhow4 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        match deserialize::<u32, _>(src)? {
            0 => *self = createhow4::Unchecked(deserialize(src)?),
            1 => *self = createhow4::Guarded(deserialize(src)?),
            2 => {
                let mut verf = verifier4::default();
                verf.deserialize(src)?;
                *self = createhow4::Exclusive(verf);
            }
            3 => {
                let mut verf = verifier4::default();
                verf.deserialize(src)?;
                *self = createhow4::Exclusive41(verf, deserialize(src)?);
            }
            mode => return Err(invalid_data(format!("invalid createmode4: {mode}"))),
        }
        Ok(())
    }
}

/// Whether OPEN may create the target.
#[derive(Clone, Debug, Default)]
pub enum openflag4 {
    #[default]
    NoCreate,
    Create(createhow4),
}

impl Serialize for openflag4 {
    fn serialize<R: Write>(&self, dest: &mut R) -> std::io::Result<()> {
        match self {
            openflag4::NoCreate => 0u32.serialize(dest),
            openflag4::Create(how) => {
                1u32.serialize(dest)?;
                how.serialize(dest)
            }
        }
    }
}

impl Deserialize for openflag4 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        match deserialize::<u32, _>(src)? {
            0 => *self = openflag4::NoCreate,
            1 => *self = openflag4::Create(deserialize(src)?),
            opentype => return Err(invalid_data(format!("invalid opentype4: {opentype}"))),
        }
        Ok(())
    }
}

/// CLAIM_DELEGATE_CUR body: the delegation being converted to an open.
#[derive(Clone, Debug, Default)]
pub struct open_claim_delegate_cur4 {
    pub delegate_stateid: stateid4,
    pub file: component4,
}
DeserializeStruct!(open_claim_delegate_cur4, delegate_stateid, file);
SerializeStruct!(open_claim_delegate_cur4, delegate_stateid, file);

/// The claim union dispatched on by OPEN.
#[derive(Clone, Debug)]
pub enum open_claim4 {
    /// Open (or create) by name under the current filehandle.
    NullNamed(component4),
    /// Reclaim of an open held before server restart; the current
    /// filehandle is the file.
    Previous(open_delegation_type4),
    /// Open by name under a delegation the client already holds.
    DelegateCur(open_claim_delegate_cur4),
    /// Reclaim of a pre-restart delegation. Permanently refused here.
    DelegatePrev(component4),
    /// v4.1: open of the current filehandle without a name.
    Fh,
    /// v4.1: delegation-to-open conversion on the current filehandle.
    DelegCurFh(stateid4),
    /// v4.1: pre-restart delegation reclaim on the current filehandle.
    DelegPrevFh,
}

impl Default for open_claim4 {
    fn default() -> open_claim4 {
        open_claim4::NullNamed(component4::default())
    }
}

impl Serialize for open_claim4 {
    fn serialize<R: Write>(&self, dest: &mut R) -> std::io::Result<()> {
        match self {
            open_claim4::NullNamed(name) => {
                0u32.serialize(dest)?;
                name.serialize(dest)
            }
            open_claim4::Previous(dtype) => {
                1u32.serialize(dest)?;
                dtype.serialize(dest)
            }
            open_claim4::DelegateCur(body) => {
                2u32.serialize(dest)?;
                body.serialize(dest)
            }
            open_claim4::DelegatePrev(name) => {
                3u32.serialize(dest)?;
                name.serialize(dest)
            }
            open_claim4::Fh => 4u32.serialize(dest),
            open_claim4::DelegCurFh(stateid) => {
                5u32.serialize(dest)?;
                stateid.serialize(dest)
            }
            open_claim4::DelegPrevFh => 6u32.serialize(dest),
        }
    }
}

impl Deserialize for open_claim4 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        match deserialize::<u32, _>(src)? {
            0 => *self = open_claim4::NullNamed(deserialize(src)?),
            1 => *self = open_claim4::Previous(deserialize(src)?),
            2 => *self = open_claim4::DelegateCur(deserialize(src)?),
            3 => *self = open_claim4::DelegatePrev(deserialize(src)?),
            4 => *self = open_claim4::Fh,
            5 => *self = open_claim4::DelegCurFh(deserialize(src)?),
            6 => *self = open_claim4::DelegPrevFh,
            claim => return Err(invalid_data(format!("invalid open_claim_type4: {claim}"))),
        }
        Ok(())
    }
}

/// Arguments for the OPEN operation.
#[derive(Clone, Debug, Default)]
pub struct OPEN4args {
    pub seqid: sequenceid4,
    pub share_access: u32,
    pub share_deny: u32,
    pub owner: open_owner4,
    pub openhow: openflag4,
    pub claim: open_claim4,
}
DeserializeStruct!(OPEN4args, seqid, share_access, share_deny, owner, openhow, claim);
SerializeStruct!(OPEN4args, seqid, share_access, share_deny, owner, openhow, claim);

/// Arguments for OPEN_CONFIRM (v4.0 only).
#[derive(Clone, Debug, Default)]
pub struct OPEN_CONFIRM4args {
    pub open_stateid: stateid4,
    pub seqid: sequenceid4,
}
DeserializeStruct!(OPEN_CONFIRM4args, open_stateid, seqid);
SerializeStruct!(OPEN_CONFIRM4args, open_stateid, seqid);

/// Arguments for OPEN_DOWNGRADE.
#[derive(Clone, Debug, Default)]
pub struct OPEN_DOWNGRADE4args {
    pub open_stateid: stateid4,
    pub seqid: sequenceid4,
    pub share_access: u32,
    pub share_deny: u32,
}
DeserializeStruct!(OPEN_DOWNGRADE4args, open_stateid, seqid, share_access, share_deny);
SerializeStruct!(OPEN_DOWNGRADE4args, open_stateid, seqid, share_access, share_deny);

/// Arguments for CLOSE.
#[derive(Clone, Debug, Default)]
pub struct CLOSE4args {
    pub seqid: sequenceid4,
    pub open_stateid: stateid4,
}
DeserializeStruct!(CLOSE4args, seqid, open_stateid);
SerializeStruct!(CLOSE4args, seqid, open_stateid);

/// Arguments for READ.
#[derive(Clone, Debug, Default)]
pub struct READ4args {
    pub stateid: stateid4,
    pub offset: offset4,
    pub count: count4,
}
DeserializeStruct!(READ4args, stateid, offset, count);
SerializeStruct!(READ4args, stateid, offset, count);

/// Arguments for WRITE.
#[derive(Clone, Debug, Default)]
pub struct WRITE4args {
    pub stateid: stateid4,
    pub offset: offset4,
    pub stable: stable_how4,
    pub data: Vec<u8>,
}
DeserializeStruct!(WRITE4args, stateid, offset, stable, data);
SerializeStruct!(WRITE4args, stateid, offset, stable, data);

/// Arguments for COMMIT.
#[derive(Clone, Debug, Default)]
pub struct COMMIT4args {
    pub offset: offset4,
    pub count: count4,
}
DeserializeStruct!(COMMIT4args, offset, count);
SerializeStruct!(COMMIT4args, offset, count);

/// Arguments for SETATTR.
#[derive(Clone, Debug, Default)]
pub struct SETATTR4args {
    pub stateid: stateid4,
    pub obj_attributes: fattr4,
}
DeserializeStruct!(SETATTR4args, stateid, obj_attributes);
SerializeStruct!(SETATTR4args, stateid, obj_attributes);

/// Arguments for ACCESS.
#[derive(Clone, Debug, Default)]
pub struct ACCESS4args {
    pub access: u32,
}
DeserializeStruct!(ACCESS4args, access);
SerializeStruct!(ACCESS4args, access);

/// Arguments for DELEGRETURN.
#[derive(Clone, Debug, Default)]
pub struct DELEGRETURN4args {
    pub deleg_stateid: stateid4,
}
DeserializeStruct!(DELEGRETURN4args, deleg_stateid);
SerializeStruct!(DELEGRETURN4args, deleg_stateid);

/// A minimal access-control entry, used in delegation grants.
#[derive(Clone, Debug, Default)]
pub struct nfsace4 {
    pub acetype: u32,
    pub aceflag: u32,
    pub accessmask: u32,
    pub who: super::utf8str_cs,
}
DeserializeStruct!(nfsace4, acetype, aceflag, accessmask, who);
SerializeStruct!(nfsace4, acetype, aceflag, accessmask, who);

/// Space limit attached to write delegations.
#[derive(Clone, Debug, Default)]
pub struct nfs_space_limit4 {
    pub limitby: u32,
    pub filesize: u64,
}
DeserializeStruct!(nfs_space_limit4, limitby, filesize);
SerializeStruct!(nfs_space_limit4, limitby, filesize);

/// nfs_space_limit4 discriminant: limit expressed as a file size.
pub const NFS_LIMIT_SIZE: u32 = 1;
