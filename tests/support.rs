//! Shared test fixtures: an in-memory metadata/payload collaborator and a
//! COMPOUND driver wired straight into the engine.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use nfs_sable::protocol::nfs4::compound::process_compound;
use nfs_sable::protocol::nsm::MonitorSet;
use nfs_sable::protocol::portmap::PortmapTable;
use nfs_sable::protocol::rpc::{Context, TransactionTracker};
use nfs_sable::pseudo::PseudoFs;
use nfs_sable::state::{StateConfig, StateManager};
use nfs_sable::vfs::{
    self, AuthContext, DirectoryEntry, FileRecord, MetadataError, NfsMetadata, PayloadStore,
    ReadDirResult, SetAttributes, SetTime, WriteIntent,
};
use nfs_sable::xdr::nfs4::{nfs_ftype4, nfs_opnum4, nfsstat4, nfsstring, nfstime4};
use nfs_sable::xdr::{deserialize, Serialize};

const FH_PREFIX: [u8; 2] = *b"MF";

struct Node {
    id: u64,
    kind: nfs_ftype4,
    parent: u64,
    children: BTreeMap<Vec<u8>, u64>,
    mode: u32,
    uid: u32,
    gid: u32,
    size: u64,
    nlink: u32,
    ctime: nfstime4,
    mtime: nfstime4,
    link_target: Vec<u8>,
}

struct Inner {
    nodes: HashMap<u64, Node>,
    payloads: HashMap<u64, Vec<u8>>,
    next_id: u64,
    clock: i64,
}

/// A small in-memory filesystem exporting a single tree at `/export`.
pub struct MemFs {
    inner: Mutex<Inner>,
    root_id: u64,
}

impl MemFs {
    pub fn new() -> MemFs {
        let mut nodes = HashMap::new();
        nodes.insert(
            1,
            Node {
                id: 1,
                kind: nfs_ftype4::NF4DIR,
                parent: 1,
                children: BTreeMap::new(),
                mode: 0o755,
                uid: 0,
                gid: 0,
                size: 4096,
                nlink: 2,
                ctime: nfstime4 { seconds: 1, nseconds: 0 },
                mtime: nfstime4 { seconds: 1, nseconds: 0 },
                link_target: Vec::new(),
            },
        );
        MemFs {
            inner: Mutex::new(Inner { nodes, payloads: HashMap::new(), next_id: 2, clock: 10 }),
            root_id: 1,
        }
    }

    pub fn root_fh(&self) -> Vec<u8> {
        fh_for(self.root_id)
    }

    /// Creates a regular file with contents, for test setup.
    pub fn add_file(&self, name: &[u8], contents: &[u8]) -> Vec<u8> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.clock += 1;
        let now = nfstime4 { seconds: inner.clock, nseconds: 0 };
        inner.nodes.insert(
            id,
            Node {
                id,
                kind: nfs_ftype4::NF4REG,
                parent: 1,
                children: BTreeMap::new(),
                mode: 0o644,
                uid: 1000,
                gid: 1000,
                size: contents.len() as u64,
                nlink: 1,
                ctime: now,
                mtime: now,
                link_target: Vec::new(),
            },
        );
        inner.payloads.insert(id, contents.to_vec());
        let root_id = self.root_id;
        let root = inner.nodes.get_mut(&root_id).unwrap();
        root.children.insert(name.to_vec(), id);
        fh_for(id)
    }
}

fn fh_for(id: u64) -> Vec<u8> {
    let mut fh = Vec::with_capacity(10);
    fh.extend_from_slice(&FH_PREFIX);
    fh.extend_from_slice(&id.to_be_bytes());
    fh
}

fn id_for(fh: &[u8]) -> Result<u64, MetadataError> {
    if fh.len() != 10 || fh[..2] != FH_PREFIX {
        return Err(MetadataError::Stale);
    }
    Ok(u64::from_be_bytes(fh[2..].try_into().unwrap()))
}

fn record_of(node: &Node) -> FileRecord {
    FileRecord {
        fh: fh_for(node.id),
        fileid: node.id,
        kind: node.kind,
        mode: node.mode,
        uid: node.uid,
        gid: node.gid,
        nlink: node.nlink,
        size: node.size,
        space_used: node.size,
        atime: node.mtime,
        mtime: node.mtime,
        ctime: node.ctime,
        payload: node.id,
    }
}

impl Inner {
    fn touch(&mut self, id: u64) {
        self.clock += 1;
        let now = nfstime4 { seconds: self.clock, nseconds: 0 };
        if let Some(node) = self.nodes.get_mut(&id) {
            node.ctime = now;
            node.mtime = now;
        }
    }

    fn insert_child(
        &mut self,
        parent: u64,
        name: &[u8],
        kind: nfs_ftype4,
        attrs: &SetAttributes,
    ) -> Result<u64, MetadataError> {
        let parent_node = self.nodes.get(&parent).ok_or(MetadataError::Stale)?;
        if !matches!(parent_node.kind, nfs_ftype4::NF4DIR) {
            return Err(MetadataError::NotDirectory);
        }
        if parent_node.children.contains_key(name) {
            return Err(MetadataError::Exists);
        }
        let id = self.next_id;
        self.next_id += 1;
        self.clock += 1;
        let now = nfstime4 { seconds: self.clock, nseconds: 0 };
        self.nodes.insert(
            id,
            Node {
                id,
                kind,
                parent,
                children: BTreeMap::new(),
                mode: attrs.mode.unwrap_or(if kind == nfs_ftype4::NF4DIR { 0o755 } else { 0o644 }),
                uid: attrs.uid.unwrap_or(0),
                gid: attrs.gid.unwrap_or(0),
                size: attrs.size.unwrap_or(0),
                nlink: if kind == nfs_ftype4::NF4DIR { 2 } else { 1 },
                ctime: now,
                mtime: now,
                link_target: Vec::new(),
            },
        );
        if kind == nfs_ftype4::NF4REG {
            self.payloads.insert(id, Vec::new());
        }
        self.nodes.get_mut(&parent).unwrap().children.insert(name.to_vec(), id);
        self.touch(parent);
        Ok(id)
    }
}

#[async_trait]
impl NfsMetadata for MemFs {
    fn root_handle(&self, export: &str) -> vfs::Result<Vec<u8>> {
        if export == "/export" {
            Ok(self.root_fh())
        } else {
            Err(MetadataError::NotFound)
        }
    }

    async fn get_file(&self, fh: &[u8]) -> vfs::Result<FileRecord> {
        let inner = self.inner.lock().unwrap();
        let node = inner.nodes.get(&id_for(fh)?).ok_or(MetadataError::Stale)?;
        Ok(record_of(node))
    }

    async fn lookup(&self, _auth: &AuthContext, parent: &[u8], name: &[u8]) -> vfs::Result<FileRecord> {
        let inner = self.inner.lock().unwrap();
        let parent_node = inner.nodes.get(&id_for(parent)?).ok_or(MetadataError::Stale)?;
        if parent_node.kind != nfs_ftype4::NF4DIR {
            return Err(MetadataError::NotDirectory);
        }
        let child = parent_node.children.get(name).ok_or(MetadataError::NotFound)?;
        Ok(record_of(inner.nodes.get(child).unwrap()))
    }

    async fn parent(&self, _auth: &AuthContext, fh: &[u8]) -> vfs::Result<FileRecord> {
        let inner = self.inner.lock().unwrap();
        let node = inner.nodes.get(&id_for(fh)?).ok_or(MetadataError::Stale)?;
        Ok(record_of(inner.nodes.get(&node.parent).unwrap()))
    }

    async fn create_file(
        &self,
        _auth: &AuthContext,
        parent: &[u8],
        name: &[u8],
        attrs: &SetAttributes,
    ) -> vfs::Result<FileRecord> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.insert_child(id_for(parent)?, name, nfs_ftype4::NF4REG, attrs)?;
        Ok(record_of(inner.nodes.get(&id).unwrap()))
    }

    async fn create_directory(
        &self,
        _auth: &AuthContext,
        parent: &[u8],
        name: &[u8],
        attrs: &SetAttributes,
    ) -> vfs::Result<FileRecord> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.insert_child(id_for(parent)?, name, nfs_ftype4::NF4DIR, attrs)?;
        Ok(record_of(inner.nodes.get(&id).unwrap()))
    }

    async fn create_symlink(
        &self,
        _auth: &AuthContext,
        parent: &[u8],
        name: &[u8],
        target: &[u8],
        attrs: &SetAttributes,
    ) -> vfs::Result<FileRecord> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.insert_child(id_for(parent)?, name, nfs_ftype4::NF4LNK, attrs)?;
        inner.nodes.get_mut(&id).unwrap().link_target = target.to_vec();
        Ok(record_of(inner.nodes.get(&id).unwrap()))
    }

    async fn remove(&self, _auth: &AuthContext, parent: &[u8], name: &[u8]) -> vfs::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let parent_id = id_for(parent)?;
        let child_id = {
            let parent_node = inner.nodes.get(&parent_id).ok_or(MetadataError::Stale)?;
            *parent_node.children.get(name).ok_or(MetadataError::NotFound)?
        };
        let child = inner.nodes.get(&child_id).unwrap();
        if child.kind == nfs_ftype4::NF4DIR && !child.children.is_empty() {
            return Err(MetadataError::NotEmpty);
        }
        inner.nodes.get_mut(&parent_id).unwrap().children.remove(name);
        inner.nodes.remove(&child_id);
        inner.payloads.remove(&child_id);
        inner.touch(parent_id);
        Ok(())
    }

    async fn rename(
        &self,
        _auth: &AuthContext,
        from_parent: &[u8],
        from_name: &[u8],
        to_parent: &[u8],
        to_name: &[u8],
    ) -> vfs::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let from_id = id_for(from_parent)?;
        let to_id = id_for(to_parent)?;
        let child = {
            let from = inner.nodes.get(&from_id).ok_or(MetadataError::Stale)?;
            *from.children.get(from_name).ok_or(MetadataError::NotFound)?
        };
        inner.nodes.get_mut(&from_id).unwrap().children.remove(from_name);
        inner.nodes.get_mut(&to_id).ok_or(MetadataError::Stale)?.children.insert(to_name.to_vec(), child);
        inner.nodes.get_mut(&child).unwrap().parent = to_id;
        inner.touch(from_id);
        inner.touch(to_id);
        Ok(())
    }

    async fn link(
        &self,
        _auth: &AuthContext,
        source: &[u8],
        parent: &[u8],
        name: &[u8],
    ) -> vfs::Result<FileRecord> {
        let mut inner = self.inner.lock().unwrap();
        let source_id = id_for(source)?;
        let parent_id = id_for(parent)?;
        if inner.nodes.get(&source_id).ok_or(MetadataError::Stale)?.kind == nfs_ftype4::NF4DIR {
            return Err(MetadataError::IsDirectory);
        }
        let parent_node = inner.nodes.get_mut(&parent_id).ok_or(MetadataError::Stale)?;
        if parent_node.children.contains_key(name) {
            return Err(MetadataError::Exists);
        }
        parent_node.children.insert(name.to_vec(), source_id);
        inner.nodes.get_mut(&source_id).unwrap().nlink += 1;
        inner.touch(parent_id);
        Ok(record_of(inner.nodes.get(&source_id).unwrap()))
    }

    async fn read_directory(
        &self,
        _auth: &AuthContext,
        fh: &[u8],
        cookie: u64,
        _max_bytes: u32,
    ) -> vfs::Result<ReadDirResult> {
        let inner = self.inner.lock().unwrap();
        let node = inner.nodes.get(&id_for(fh)?).ok_or(MetadataError::Stale)?;
        if node.kind != nfs_ftype4::NF4DIR {
            return Err(MetadataError::NotDirectory);
        }
        let entries: Vec<DirectoryEntry> = node
            .children
            .iter()
            .skip(cookie as usize)
            .map(|(name, id)| DirectoryEntry {
                name: name.clone(),
                file: record_of(inner.nodes.get(id).unwrap()),
            })
            .collect();
        Ok(ReadDirResult { entries, has_more: false })
    }

    async fn read_symlink(&self, _auth: &AuthContext, fh: &[u8]) -> vfs::Result<Vec<u8>> {
        let inner = self.inner.lock().unwrap();
        let node = inner.nodes.get(&id_for(fh)?).ok_or(MetadataError::Stale)?;
        if node.kind != nfs_ftype4::NF4LNK {
            return Err(MetadataError::NotSupported);
        }
        Ok(node.link_target.clone())
    }

    async fn prepare_write(
        &self,
        _auth: &AuthContext,
        fh: &[u8],
        new_size: u64,
    ) -> vfs::Result<WriteIntent> {
        let id = id_for(fh)?;
        Ok(WriteIntent { fh: fh.to_vec(), payload: id, new_size })
    }

    async fn commit_write(&self, _auth: &AuthContext, intent: WriteIntent) -> vfs::Result<FileRecord> {
        let mut inner = self.inner.lock().unwrap();
        let id = id_for(&intent.fh)?;
        let payload_len = inner.payloads.get(&id).map(|p| p.len() as u64).unwrap_or(0);
        {
            let node = inner.nodes.get_mut(&id).ok_or(MetadataError::Stale)?;
            node.size = node.size.max(intent.new_size).max(payload_len);
        }
        inner.touch(id);
        let inner = inner;
        Ok(record_of(inner.nodes.get(&id).unwrap()))
    }

    async fn set_attributes(
        &self,
        _auth: &AuthContext,
        fh: &[u8],
        attrs: &SetAttributes,
    ) -> vfs::Result<FileRecord> {
        let mut inner = self.inner.lock().unwrap();
        let id = id_for(fh)?;
        {
            let node = inner.nodes.get_mut(&id).ok_or(MetadataError::Stale)?;
            if let Some(mode) = attrs.mode {
                node.mode = mode;
            }
            if let Some(uid) = attrs.uid {
                node.uid = uid;
            }
            if let Some(gid) = attrs.gid {
                node.gid = gid;
            }
            if let Some(size) = attrs.size {
                node.size = size;
            }
            if let SetTime::ClientProvided(t) = attrs.mtime {
                node.mtime = t;
            }
        }
        if let Some(size) = attrs.size {
            if let Some(payload) = inner.payloads.get_mut(&id) {
                payload.resize(size as usize, 0);
            }
        }
        inner.touch(id);
        let inner = inner;
        Ok(record_of(inner.nodes.get(&id).unwrap()))
    }

    async fn check_permissions(&self, _auth: &AuthContext, fh: &[u8], mask: u32) -> vfs::Result<u32> {
        let _ = id_for(fh)?;
        Ok(mask)
    }

    async fn flush_pending_write_for_file(&self, _auth: &AuthContext, fh: &[u8]) -> vfs::Result<bool> {
        let _ = id_for(fh)?;
        Ok(true)
    }
}

#[async_trait]
impl PayloadStore for MemFs {
    async fn write_at(
        &self,
        _auth: &AuthContext,
        payload: u64,
        data: &[u8],
        offset: u64,
    ) -> vfs::Result<u32> {
        let mut inner = self.inner.lock().unwrap();
        let buffer = inner.payloads.get_mut(&payload).ok_or(MetadataError::Stale)?;
        let end = offset as usize + data.len();
        if buffer.len() < end {
            buffer.resize(end, 0);
        }
        buffer[offset as usize..end].copy_from_slice(data);
        let new_len = buffer.len() as u64;
        if let Some(node) = inner.nodes.get_mut(&payload) {
            node.size = node.size.max(new_len);
        }
        Ok(data.len() as u32)
    }

    async fn read_at(
        &self,
        _auth: &AuthContext,
        payload: u64,
        offset: u64,
        count: u32,
    ) -> vfs::Result<(Vec<u8>, bool)> {
        let inner = self.inner.lock().unwrap();
        let buffer = inner.payloads.get(&payload).ok_or(MetadataError::Stale)?;
        let start = (offset as usize).min(buffer.len());
        let end = (start + count as usize).min(buffer.len());
        Ok((buffer[start..end].to_vec(), end == buffer.len()))
    }
}

/// A context wired to fresh server state over the given filesystem.
pub fn test_context(fs: Arc<MemFs>) -> Context {
    test_context_with_conn(fs, 1)
}

pub fn test_context_with_conn(fs: Arc<MemFs>, conn_id: u64) -> Context {
    let state = Arc::new(StateManager::new(StateConfig::default()));
    context_with_state(fs, state, conn_id)
}

pub fn context_with_state(fs: Arc<MemFs>, state: Arc<StateManager>, conn_id: u64) -> Context {
    // Surface server traces when a test runs with RUST_LOG set.
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    Context {
        local_port: 0,
        client_addr: format!("127.0.0.1:{}", 40000 + conn_id),
        conn_id,
        auth: Default::default(),
        metadata: fs.clone(),
        payload: fs,
        state,
        pseudo: Arc::new(PseudoFs::build(&["/export".to_string()], 1_000_000).unwrap()),
        monitor: Arc::new(MonitorSet::new(16)),
        transaction_tracker: Arc::new(TransactionTracker::new(Duration::from_secs(60))),
        portmap_table: Arc::new(RwLock::new(PortmapTable::seeded(2049))),
        cancelled: Arc::new(AtomicBool::new(false)),
        advertise_krb5: false,
    }
}

/// One encoded operation: opcode plus its argument bytes.
pub fn op(opcode: nfs_opnum4, args: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::new();
    opcode.serialize(&mut bytes).unwrap();
    bytes.extend_from_slice(args);
    bytes
}

pub fn encode<T: Serialize>(value: &T) -> Vec<u8> {
    let mut bytes = Vec::new();
    value.serialize(&mut bytes).unwrap();
    bytes
}

/// Runs one COMPOUND through the engine and returns the encoded
/// COMPOUND4res bytes.
pub async fn run_compound(context: &Context, tag: &str, minor: u32, ops: &[Vec<u8>]) -> Vec<u8> {
    let mut args = Vec::new();
    for one in ops {
        args.extend_from_slice(one);
    }
    let mut input = Cursor::new(args);
    let mut reply = Vec::new();
    process_compound(
        nfsstring::from(tag),
        minor,
        ops.len() as u32,
        &mut input,
        &mut reply,
        context,
    )
    .await
    .expect("compound execution");
    reply
}

/// The decoded shell of a COMPOUND4res: status, tag, and raw result bytes.
pub struct Reply {
    pub status: nfsstat4,
    pub tag: Vec<u8>,
    pub numresults: u32,
    pub cursor: Cursor<Vec<u8>>,
}

/// Parses the fixed header of a COMPOUND4res, leaving the cursor at the
/// first result's opcode.
pub fn parse_reply(bytes: &[u8]) -> Reply {
    let mut cursor = Cursor::new(bytes.to_vec());
    let status: nfsstat4 = deserialize(&mut cursor).expect("reply status");
    let tag: Vec<u8> = deserialize(&mut cursor).expect("reply tag");
    let numresults: u32 = deserialize(&mut cursor).expect("result count");
    Reply { status, tag, numresults, cursor }
}

impl Reply {
    /// Reads the next result's opcode and status, leaving the cursor after
    /// the status for body-specific parsing.
    pub fn next_result(&mut self) -> (nfs_opnum4, nfsstat4) {
        let opcode: nfs_opnum4 = deserialize(&mut self.cursor).expect("result opcode");
        let status: nfsstat4 = deserialize(&mut self.cursor).expect("result status");
        (opcode, status)
    }

    pub fn read<T: Default + nfs_sable::xdr::Deserialize>(&mut self) -> T {
        deserialize(&mut self.cursor).expect("result body")
    }
}
