//! XDR structures for namespace-directed NFSv4 operations: LOOKUP, CREATE,
//! REMOVE, RENAME, LINK, READDIR and SECINFO.

// Allow unused code since the full argument surface is implemented
#![allow(dead_code)]
// Preserve original RFC naming conventions for consistency with the specification
#![allow(non_camel_case_types)]

use std::io::{Read, Write};

use super::{bitmap4, component4, count4, fattr4, linktext4, nfs_cookie4, specdata4, verifier4};
use crate::protocol::xdr::{deserialize, invalid_data, Deserialize, Serialize};
use crate::{DeserializeStruct, SerializeStruct};

/// Arguments for LOOKUP.
#[derive(Clone, Debug, Default)]
pub struct LOOKUP4args {
    pub objname: component4,
}
DeserializeStruct!(LOOKUP4args, objname);
SerializeStruct!(LOOKUP4args, objname);

/// The object kinds CREATE can make. Regular files are refused (OPEN
/// creates those); block and character specials are decoded but answered
/// NFS4ERR_NOTSUPP.
#[derive(Clone, Debug)]
pub enum createtype4 {
    Directory,
    Link(linktext4),
    Block(specdata4),
    Char(specdata4),
    Socket,
    Fifo,
    /// A type CREATE refuses outright (regular file, named attribute).
    Refused(u32),
}

impl Default for createtype4 {
    fn default() -> createtype4 {
        createtype4::Directory
    }
}

impl Serialize for createtype4 {
    fn serialize<R: Write>(&self, dest: &mut R) -> std::io::Result<()> {
        match self {
            createtype4::Directory => 2u32.serialize(dest),
            createtype4::Link(target) => {
                5u32.serialize(dest)?;
                target.serialize(dest)
            }
            createtype4::Block(dev) => {
                3u32.serialize(dest)?;
                dev.serialize(dest)
            }
            createtype4::Char(dev) => {
                4u32.serialize(dest)?;
                dev.serialize(dest)
            }
            createtype4::Socket => 6u32.serialize(dest),
            createtype4::Fifo => 7u32.serialize(dest),
            createtype4::Refused(raw) => raw.serialize(dest),
        }
    }
}

impl Deserialize for createtype4 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        match deserialize::<u32, _>(src)? {
            2 => *self = createtype4::Directory,
            5 => *self = createtype4::Link(deserialize(src)?),
            3 => *self = createtype4::Block(deserialize(src)?),
            4 => *self = createtype4::Char(deserialize(src)?),
            6 => *self = createtype4::Socket,
            7 => *self = createtype4::Fifo,
            raw @ (1 | 8 | 9) => *self = createtype4::Refused(raw),
            ftype => return Err(invalid_data(format!("invalid createtype4: {ftype}"))),
        }
        Ok(())
    }
}

/// Arguments for CREATE.
#[derive(Clone, Debug, Default)]
pub struct CREATE4args {
    pub objtype: createtype4,
    pub objname: component4,
    pub createattrs: fattr4,
}
DeserializeStruct!(CREATE4args, objtype, objname, createattrs);
SerializeStruct!(CREATE4args, objtype, objname, createattrs);

/// Arguments for REMOVE.
#[derive(Clone, Debug, Default)]
pub struct REMOVE4args {
    pub target: component4,
}
DeserializeStruct!(REMOVE4args, target);
SerializeStruct!(REMOVE4args, target);

/// Arguments for RENAME: the saved filehandle is the source directory, the
/// current filehandle the destination directory.
#[derive(Clone, Debug, Default)]
pub struct RENAME4args {
    pub oldname: component4,
    pub newname: component4,
}
DeserializeStruct!(RENAME4args, oldname, newname);
SerializeStruct!(RENAME4args, oldname, newname);

/// Arguments for LINK: the saved filehandle is the source object, the
/// current filehandle the target directory.
#[derive(Clone, Debug, Default)]
pub struct LINK4args {
    pub newname: component4,
}
DeserializeStruct!(LINK4args, newname);
SerializeStruct!(LINK4args, newname);

/// Arguments for READDIR.
#[derive(Clone, Debug, Default)]
pub struct READDIR4args {
    pub cookie: nfs_cookie4,
    pub cookieverf: verifier4,
    pub dircount: count4,
    pub maxcount: count4,
    pub attr_request: bitmap4,
}
DeserializeStruct!(READDIR4args, cookie, cookieverf, dircount, maxcount, attr_request);
SerializeStruct!(READDIR4args, cookie, cookieverf, dircount, maxcount, attr_request);

/// Arguments for SECINFO.
#[derive(Clone, Debug, Default)]
pub struct SECINFO4args {
    pub name: component4,
}
DeserializeStruct!(SECINFO4args, name);
SerializeStruct!(SECINFO4args, name);

/// secinfo_style4: resolve on the current filehandle.
pub const SECINFO_STYLE4_CURRENT_FH: u32 = 0;
/// secinfo_style4: resolve on the parent of the current filehandle.
pub const SECINFO_STYLE4_PARENT: u32 = 1;

/// Arguments for SECINFO_NO_NAME (v4.1).
#[derive(Clone, Debug, Default)]
pub struct SECINFO_NO_NAME4args {
    pub style: u32,
}
DeserializeStruct!(SECINFO_NO_NAME4args, style);
SerializeStruct!(SECINFO_NO_NAME4args, style);
