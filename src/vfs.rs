//! The metadata and payload collaborator interfaces the NFSv4 engine is
//! built against.
//!
//! The engine never touches a disk itself: a [`NfsMetadata`] implementation
//! owns the namespace (files, directories, attributes) and a
//! [`PayloadStore`] owns file contents. Both are consumed through opaque
//! filehandles minted by the implementation; the engine only requires that
//! real filehandles never collide with the pseudo-fs handle prefix (see
//! [`crate::pseudo`]).
//!
//! Errors surface as structured [`MetadataError`] kinds that the operation
//! handlers map deterministically onto NFS status codes.

use async_trait::async_trait;

use crate::protocol::xdr::nfs4::{nfs_ftype4, nfsstat4, nfstime4};

/// Maximum length of names passed into [`NfsMetadata`] methods.
pub const MAX_NAME_LEN: usize = 255;

/// Structured error kinds surfaced by the metadata and payload
/// collaborators.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MetadataError {
    /// The named entry or filehandle target does not exist.
    NotFound,
    /// The caller's credentials do not permit the operation.
    AccessDenied,
    /// The target name already exists.
    Exists,
    /// A non-directory was used where a directory is required.
    NotDirectory,
    /// A directory was used where a non-directory is required.
    IsDirectory,
    /// A directory being removed still has entries.
    NotEmpty,
    /// The name exceeds the implementation's limit.
    NameTooLong,
    /// The name contains bytes the implementation refuses.
    BadName,
    /// The filesystem or subtree is read-only.
    ReadOnly,
    /// A hard I/O failure.
    IO,
    /// The filehandle refers to an object that no longer exists.
    Stale,
    /// The operation is not supported by this implementation.
    NotSupported,
}

impl MetadataError {
    /// The fixed translation onto NFS status codes.
    pub fn nfsstat(&self) -> nfsstat4 {
        match self {
            MetadataError::NotFound => nfsstat4::NFS4ERR_NOENT,
            MetadataError::AccessDenied => nfsstat4::NFS4ERR_ACCESS,
            MetadataError::Exists => nfsstat4::NFS4ERR_EXIST,
            MetadataError::NotDirectory => nfsstat4::NFS4ERR_NOTDIR,
            MetadataError::IsDirectory => nfsstat4::NFS4ERR_ISDIR,
            MetadataError::NotEmpty => nfsstat4::NFS4ERR_NOTEMPTY,
            MetadataError::NameTooLong => nfsstat4::NFS4ERR_NAMETOOLONG,
            MetadataError::BadName => nfsstat4::NFS4ERR_BADNAME,
            MetadataError::ReadOnly => nfsstat4::NFS4ERR_ROFS,
            MetadataError::IO => nfsstat4::NFS4ERR_IO,
            MetadataError::Stale => nfsstat4::NFS4ERR_STALE,
            MetadataError::NotSupported => nfsstat4::NFS4ERR_NOTSUPP,
        }
    }
}

/// Result of metadata operations.
pub type Result<T> = std::result::Result<T, MetadataError>;

/// The caller identity surfaced from AUTH_UNIX credentials.
#[derive(Clone, Debug, Default)]
pub struct AuthContext {
    pub uid: u32,
    pub gid: u32,
    pub gids: Vec<u32>,
}

/// A snapshot of one object's metadata.
#[derive(Clone, Debug)]
pub struct FileRecord {
    /// The opaque filehandle for this object.
    pub fh: Vec<u8>,
    /// A stable numeric identity (inode number).
    pub fileid: u64,
    pub kind: nfs_ftype4,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
    pub size: u64,
    /// Bytes actually consumed on the backing store.
    pub space_used: u64,
    pub atime: nfstime4,
    pub mtime: nfstime4,
    pub ctime: nfstime4,
    /// Identity of the payload object backing a regular file.
    pub payload: u64,
}

impl FileRecord {
    /// The change attribute: ctime folded to a monotonic 64-bit counter.
    pub fn change(&self) -> u64 {
        ((self.ctime.seconds as u64) << 32) | self.ctime.nseconds as u64
    }

    pub fn is_dir(&self) -> bool {
        self.kind == nfs_ftype4::NF4DIR
    }
}

/// Attribute changes requested through SETATTR or CREATE.
#[derive(Clone, Debug, Default)]
pub struct SetAttributes {
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub size: Option<u64>,
    pub atime: SetTime,
    pub mtime: SetTime,
}

/// Strategy for updating a timestamp.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum SetTime {
    #[default]
    NoChange,
    ServerCurrent,
    ClientProvided(nfstime4),
}

/// One entry of a directory page.
#[derive(Clone, Debug)]
pub struct DirectoryEntry {
    pub name: Vec<u8>,
    pub file: FileRecord,
}

/// A page of directory entries.
#[derive(Clone, Debug, Default)]
pub struct ReadDirResult {
    pub entries: Vec<DirectoryEntry>,
    /// True when more entries follow the returned page.
    pub has_more: bool,
}

/// An in-flight size reservation returned by
/// [`NfsMetadata::prepare_write`] and redeemed by
/// [`NfsMetadata::commit_write`].
#[derive(Clone, Debug)]
pub struct WriteIntent {
    pub fh: Vec<u8>,
    pub payload: u64,
    pub new_size: u64,
}

/// The metadata collaborator: the namespace and attribute store behind the
/// per-operation handlers.
///
/// Filehandles are opaque byte strings of the implementation's choosing, up
/// to 128 bytes, and must not begin with the pseudo-fs handle prefix.
#[async_trait]
pub trait NfsMetadata: Send + Sync {
    /// The real-filesystem root handle for one configured export path.
    /// Junction lookups in the pseudo-fs resolve through this.
    fn root_handle(&self, export: &str) -> Result<Vec<u8>>;

    /// Fetches the metadata snapshot behind a filehandle.
    async fn get_file(&self, fh: &[u8]) -> Result<FileRecord>;

    /// Resolves one name inside a directory.
    async fn lookup(&self, auth: &AuthContext, parent: &[u8], name: &[u8]) -> Result<FileRecord>;

    /// Looks up the parent directory of an object.
    async fn parent(&self, auth: &AuthContext, fh: &[u8]) -> Result<FileRecord>;

    /// Creates a regular file.
    async fn create_file(
        &self,
        auth: &AuthContext,
        parent: &[u8],
        name: &[u8],
        attrs: &SetAttributes,
    ) -> Result<FileRecord>;

    /// Creates a directory.
    async fn create_directory(
        &self,
        auth: &AuthContext,
        parent: &[u8],
        name: &[u8],
        attrs: &SetAttributes,
    ) -> Result<FileRecord>;

    /// Creates a symbolic link.
    async fn create_symlink(
        &self,
        auth: &AuthContext,
        parent: &[u8],
        name: &[u8],
        target: &[u8],
        attrs: &SetAttributes,
    ) -> Result<FileRecord>;

    /// Removes a file or an empty directory.
    async fn remove(&self, auth: &AuthContext, parent: &[u8], name: &[u8]) -> Result<()>;

    /// Renames and/or moves an object.
    async fn rename(
        &self,
        auth: &AuthContext,
        from_parent: &[u8],
        from_name: &[u8],
        to_parent: &[u8],
        to_name: &[u8],
    ) -> Result<()>;

    /// Creates a hard link to an existing object.
    async fn link(
        &self,
        auth: &AuthContext,
        source: &[u8],
        parent: &[u8],
        name: &[u8],
    ) -> Result<FileRecord>;

    /// Reads one page of a directory. `cookie` is the zero-based index of
    /// the first entry to return, in the implementation's stable listing
    /// order. `max_bytes` bounds the approximate encoded size of the page.
    async fn read_directory(
        &self,
        auth: &AuthContext,
        fh: &[u8],
        cookie: u64,
        max_bytes: u32,
    ) -> Result<ReadDirResult>;

    /// Reads the target of a symbolic link.
    async fn read_symlink(&self, auth: &AuthContext, fh: &[u8]) -> Result<Vec<u8>>;

    /// Reserves a write that may extend the file to `new_size`.
    async fn prepare_write(
        &self,
        auth: &AuthContext,
        fh: &[u8],
        new_size: u64,
    ) -> Result<WriteIntent>;

    /// Publishes the metadata effects of a prepared write.
    async fn commit_write(&self, auth: &AuthContext, intent: WriteIntent) -> Result<FileRecord>;

    /// Applies attribute changes and returns the updated record.
    async fn set_attributes(
        &self,
        auth: &AuthContext,
        fh: &[u8],
        attrs: &SetAttributes,
    ) -> Result<FileRecord>;

    /// Returns the subset of the requested ACCESS mask the caller holds.
    async fn check_permissions(&self, auth: &AuthContext, fh: &[u8], mask: u32) -> Result<u32>;

    /// Pushes any buffered writes for the file to stable storage. Returns
    /// true when something was flushed.
    async fn flush_pending_write_for_file(&self, auth: &AuthContext, fh: &[u8]) -> Result<bool>;

    /// Renders a uid for the fattr4 OWNER attribute. The default is the
    /// `uid:<N>` form; implementations with an identity mapper may return
    /// `name@domain`.
    fn render_owner(&self, uid: u32) -> String {
        format!("uid:{uid}")
    }

    /// Renders a gid for the fattr4 OWNER_GROUP attribute.
    fn render_group(&self, gid: u32) -> String {
        format!("gid:{gid}")
    }
}

/// The payload collaborator: file contents, addressed by the payload id
/// carried on [`FileRecord`].
#[async_trait]
pub trait PayloadStore: Send + Sync {
    /// Writes `data` at `offset`, returning the number of bytes accepted.
    async fn write_at(
        &self,
        auth: &AuthContext,
        payload: u64,
        data: &[u8],
        offset: u64,
    ) -> Result<u32>;

    /// Reads up to `count` bytes at `offset`. The bool reports end-of-file.
    async fn read_at(
        &self,
        auth: &AuthContext,
        payload: u64,
        offset: u64,
        count: u32,
    ) -> Result<(Vec<u8>, bool)>;
}

/// Validates a single name component the way every namespace operation
/// requires: valid UTF-8, no NUL, no `/`, non-empty, bounded length.
pub fn validate_name(name: &[u8]) -> std::result::Result<(), nfsstat4> {
    if name.is_empty() {
        return Err(nfsstat4::NFS4ERR_INVAL);
    }
    if name.len() > MAX_NAME_LEN {
        return Err(nfsstat4::NFS4ERR_NAMETOOLONG);
    }
    if std::str::from_utf8(name).is_err() {
        return Err(nfsstat4::NFS4ERR_BADCHAR);
    }
    if name.contains(&0) || name.contains(&b'/') {
        return Err(nfsstat4::NFS4ERR_BADNAME);
    }
    if name == b"." || name == b".." {
        return Err(nfsstat4::NFS4ERR_BADNAME);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_validation() {
        assert!(validate_name(b"plain.txt").is_ok());
        assert_eq!(validate_name(b"").unwrap_err(), nfsstat4::NFS4ERR_INVAL);
        assert_eq!(validate_name(b"a/b").unwrap_err(), nfsstat4::NFS4ERR_BADNAME);
        assert_eq!(validate_name(b"a\0b").unwrap_err(), nfsstat4::NFS4ERR_BADNAME);
        assert_eq!(validate_name(b".").unwrap_err(), nfsstat4::NFS4ERR_BADNAME);
        assert_eq!(validate_name(&[0xff, 0xfe]).unwrap_err(), nfsstat4::NFS4ERR_BADCHAR);
        assert_eq!(
            validate_name(&[b'x'; MAX_NAME_LEN + 1]).unwrap_err(),
            nfsstat4::NFS4ERR_NAMETOOLONG
        );
    }

    #[test]
    fn metadata_error_mapping_is_deterministic() {
        assert_eq!(MetadataError::NotFound.nfsstat(), nfsstat4::NFS4ERR_NOENT);
        assert_eq!(MetadataError::ReadOnly.nfsstat(), nfsstat4::NFS4ERR_ROFS);
        assert_eq!(MetadataError::Stale.nfsstat(), nfsstat4::NFS4ERR_STALE);
    }
}
