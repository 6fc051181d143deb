//! The XDR (External Data Representation) module defines data structures and
//! methods for serializing/deserializing data according to RFC 4506.
//!
//! XDR provides a machine-independent data representation format, which is
//! critical for network protocols like NFS. All data structures that cross
//! the wire implement the [`Serialize`] and [`Deserialize`] traits below.

use std::io::{Read, Write};

use byteorder::BigEndian;
use byteorder::{ReadBytesExt, WriteBytesExt};

pub mod nfs4;
pub mod nsm;
pub mod portmap;
pub mod rpc;

/// Type alias for the standard endianness used in XDR serialization (Big Endian).
pub type XDREndian = BigEndian;

/// The XDR alignment in bytes. Variable-length opaques are zero-padded
/// up to this boundary.
pub const ALIGNMENT: usize = 4;

/// Serialization half of the XDR codec.
pub trait Serialize {
    fn serialize<R: Write>(&self, dest: &mut R) -> std::io::Result<()>;
}

/// Deserialization half of the XDR codec.
///
/// Deserialization is in-place so that struct macros can recurse through
/// fields of a `Default`-constructed value.
pub trait Deserialize {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()>;
}

/// Reads a complete value of type `T` from the source.
pub fn deserialize<T: Default + Deserialize, R: Read>(src: &mut R) -> std::io::Result<T> {
    let mut value = T::default();
    value.deserialize(src)?;
    Ok(value)
}

/// Constructs the error used for any malformed XDR input.
pub fn invalid_data(m: impl Into<String>) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, m.into())
}

impl Serialize for bool {
    fn serialize<R: Write>(&self, dest: &mut R) -> std::io::Result<()> {
        dest.write_u32::<XDREndian>(*self as u32)
    }
}

impl Deserialize for bool {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = src.read_u32::<XDREndian>()? > 0;
        Ok(())
    }
}

impl Serialize for i32 {
    fn serialize<R: Write>(&self, dest: &mut R) -> std::io::Result<()> {
        dest.write_i32::<XDREndian>(*self)
    }
}

impl Deserialize for i32 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = src.read_i32::<XDREndian>()?;
        Ok(())
    }
}

impl Serialize for i64 {
    fn serialize<R: Write>(&self, dest: &mut R) -> std::io::Result<()> {
        dest.write_i64::<XDREndian>(*self)
    }
}

impl Deserialize for i64 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = src.read_i64::<XDREndian>()?;
        Ok(())
    }
}

impl Serialize for u32 {
    fn serialize<R: Write>(&self, dest: &mut R) -> std::io::Result<()> {
        dest.write_u32::<XDREndian>(*self)
    }
}

impl Deserialize for u32 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = src.read_u32::<XDREndian>()?;
        Ok(())
    }
}

impl Serialize for u64 {
    fn serialize<R: Write>(&self, dest: &mut R) -> std::io::Result<()> {
        dest.write_u64::<XDREndian>(*self)
    }
}

impl Deserialize for u64 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = src.read_u64::<XDREndian>()?;
        Ok(())
    }
}

/// Fixed-size byte arrays are serialized as raw bytes without a length
/// prefix. All fixed opaque sizes on this wire are multiples of 4, so no
/// padding follows.
impl<const N: usize> Serialize for [u8; N] {
    fn serialize<R: Write>(&self, dest: &mut R) -> std::io::Result<()> {
        dest.write_all(self)
    }
}

impl<const N: usize> Deserialize for [u8; N] {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        src.read_exact(self)
    }
}

/// Variable-length data is serialized with a 4-byte length prefix,
/// followed by the actual bytes, padded to a multiple of 4.
impl Serialize for Vec<u8> {
    fn serialize<R: Write>(&self, dest: &mut R) -> std::io::Result<()> {
        assert!(self.len() < u32::MAX as usize);
        let length = self.len() as u32;
        length.serialize(dest)?;
        dest.write_all(self)?;
        write_padding(self.len(), dest)
    }
}

impl Deserialize for Vec<u8> {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        let mut length: u32 = 0;
        length.deserialize(src)?;
        self.clear();
        self.resize(length as usize, 0);
        src.read_exact(self)?;
        read_padding(length as usize, src)
    }
}

/// Counted arrays of 32-bit words: 4-byte element count followed by the
/// elements. Used for bitmaps and supplementary gid lists.
impl Serialize for Vec<u32> {
    fn serialize<R: Write>(&self, dest: &mut R) -> std::io::Result<()> {
        assert!(self.len() < u32::MAX as usize);
        let length = self.len() as u32;
        length.serialize(dest)?;
        for word in self {
            word.serialize(dest)?;
        }
        Ok(())
    }
}

impl Deserialize for Vec<u32> {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        let mut length: u32 = 0;
        length.deserialize(src)?;
        self.clear();
        self.resize(length as usize, 0);
        for word in self.iter_mut() {
            word.deserialize(src)?;
        }
        Ok(())
    }
}

/// Consumes the zero padding that follows a variable-length opaque of
/// `src_len` bytes.
pub fn read_padding(src_len: usize, src: &mut impl Read) -> std::io::Result<()> {
    let mut padding_buffer: [u8; ALIGNMENT] = Default::default();
    src.read_exact(&mut padding_buffer[(src_len % ALIGNMENT)..])
}

/// Writes the zero padding that follows a variable-length opaque of
/// `src_len` bytes.
pub fn write_padding(src_len: usize, dest: &mut impl Write) -> std::io::Result<()> {
    let padding_buffer: [u8; ALIGNMENT] = Default::default();
    dest.write_all(&padding_buffer[(src_len % ALIGNMENT)..])
}

/// Reads a variable-length opaque while refusing lengths above `max`.
pub fn deserialize_opaque_max<R: Read>(src: &mut R, max: usize) -> std::io::Result<Vec<u8>> {
    let mut length: u32 = 0;
    length.deserialize(src)?;
    if length as usize > max {
        return Err(invalid_data(format!("opaque length {length} exceeds maximum {max}")));
    }
    let mut data = vec![0u8; length as usize];
    src.read_exact(&mut data)?;
    read_padding(length as usize, src)?;
    Ok(data)
}

/// Implements XDR serialization for a struct by serializing each field
/// in declaration order.
#[macro_export]
macro_rules! SerializeStruct {
    (
        $t:ident,
        $($element:ident),*
    ) => {
        impl Serialize for $t {
            fn serialize<R: Write>(&self, dest: &mut R) -> std::io::Result<()> {
                $(self.$element.serialize(dest)?;)*
                Ok(())
            }
        }
    };
}

/// Implements XDR deserialization for a struct by deserializing each field
/// in declaration order.
#[macro_export]
macro_rules! DeserializeStruct {
    (
        $t:ident,
        $($element:ident),*
    ) => {
        impl Deserialize for $t {
            fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
                $(self.$element.deserialize(src)?;)*
                Ok(())
            }
        }
    };
}

/// Implements XDR serialization for a field-less enum as its 32-bit
/// discriminant.
#[macro_export]
macro_rules! SerializeEnum {
    ($t:ident) => {
        impl Serialize for $t {
            fn serialize<R: Write>(&self, dest: &mut R) -> std::io::Result<()> {
                dest.write_u32::<$crate::protocol::xdr::XDREndian>(*self as u32)
            }
        }
    };
}

/// Implements XDR deserialization for a field-less enum from its 32-bit
/// discriminant, rejecting unknown values.
#[macro_export]
macro_rules! DeserializeEnum {
    ($t:ident) => {
        impl Deserialize for $t {
            fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
                let raw: u32 = src.read_u32::<$crate::protocol::xdr::XDREndian>()?;
                if let Some(value) = FromPrimitive::from_u32(raw) {
                    *self = value;
                    Ok(())
                } else {
                    Err($crate::protocol::xdr::invalid_data(format!(
                        "invalid value {} for {}",
                        raw,
                        stringify!($t)
                    )))
                }
            }
        }
    };
}

/// Implements XDR serialization for a bool-discriminated union with a void
/// arm and a single value arm.
#[macro_export]
macro_rules! SerializeBoolUnion {
    (
        $t:ident, $enumcase:ident, $enumtype:ty
    ) => {
        impl Serialize for $t {
            fn serialize<R: Write>(&self, dest: &mut R) -> std::io::Result<()> {
                match self {
                    $t::Void => false.serialize(dest),
                    $t::$enumcase(v) => {
                        true.serialize(dest)?;
                        v.serialize(dest)
                    }
                }
            }
        }
    };
}

/// Implements XDR deserialization for a bool-discriminated union with a void
/// arm and a single value arm.
#[macro_export]
macro_rules! DeserializeBoolUnion {
    (
        $t:ident, $enumcase:ident, $enumtype:ty
    ) => {
        impl Deserialize for $t {
            fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
                let mut present: bool = false;
                present.deserialize(src)?;
                if present {
                    let mut value = <$enumtype>::default();
                    value.deserialize(src)?;
                    *self = $t::$enumcase(value);
                } else {
                    *self = $t::Void;
                }
                Ok(())
            }
        }
    };
}

// Re-export the macros for use by sibling modules.
pub use crate::DeserializeBoolUnion;
pub use crate::DeserializeEnum;
pub use crate::DeserializeStruct;
pub use crate::SerializeBoolUnion;
pub use crate::SerializeEnum;
pub use crate::SerializeStruct;
