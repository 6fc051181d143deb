//! The pseudo-filesystem: a synthetic, read-only directory tree that links
//! the configured export paths into a single namespace rooted at `/`.
//!
//! Every absolute export path contributes the chain of intermediate
//! directories needed to reach it; the final component is a junction whose
//! LOOKUP resolves to the real-filesystem root handle of that export. The
//! tree is built once at startup and never mutated, so readers need no
//! locking.
//!
//! Pseudo handles carry a reserved 4-byte prefix so that
//! [`is_pseudo_handle`] is a constant-time byte compare; metadata
//! collaborators must never mint handles starting with it.

use std::collections::BTreeMap;

use crate::protocol::xdr::nfs4::{fsid4, nfs_ftype4, nfstime4};
use crate::protocol::xdr::nfs4::attr::AttrSource;

/// The reserved prefix distinguishing pseudo-fs handles from real ones.
pub const PSEUDO_FH_PREFIX: [u8; 4] = [0xff, 0x50, 0x46, 0x53];

/// True iff the bytes belong to the pseudo-fs tree.
pub fn is_pseudo_handle(fh: &[u8]) -> bool {
    fh.len() == 12 && fh[..4] == PSEUDO_FH_PREFIX
}

/// What a pseudo LOOKUP resolves to.
#[derive(Debug)]
pub enum PseudoChild<'a> {
    /// Another pseudo directory.
    Node(&'a PseudoNode),
    /// A junction: the export path whose real root handle becomes the
    /// current filehandle.
    Junction(&'a str),
}

/// One directory in the pseudo tree.
#[derive(Debug)]
pub struct PseudoNode {
    id: u64,
    name: Vec<u8>,
    parent: u64,
    children: BTreeMap<Vec<u8>, u64>,
    /// Set when this node is the final component of an export path.
    export: Option<String>,
}

impl PseudoNode {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &[u8] {
        &self.name
    }

    /// The export path when this node is a junction.
    pub fn export(&self) -> Option<&str> {
        self.export.as_deref()
    }

    fn handle(&self) -> Vec<u8> {
        let mut fh = Vec::with_capacity(12);
        fh.extend_from_slice(&PSEUDO_FH_PREFIX);
        fh.extend_from_slice(&self.id.to_be_bytes());
        fh
    }
}

/// The immutable junction tree.
pub struct PseudoFs {
    nodes: Vec<PseudoNode>,
    /// Synthetic timestamp applied to every pseudo directory (boot time).
    built_at: nfstime4,
}

impl PseudoFs {
    /// Builds the tree for a set of absolute export paths. Relative paths,
    /// empty paths and duplicate exports are rejected.
    pub fn build(exports: &[String], built_at_secs: i64) -> std::io::Result<PseudoFs> {
        let mut fs = PseudoFs {
            nodes: vec![PseudoNode {
                id: 0,
                name: Vec::new(),
                parent: 0,
                children: BTreeMap::new(),
                export: None,
            }],
            built_at: nfstime4 { seconds: built_at_secs, nseconds: 0 },
        };

        for export in exports {
            let trimmed = export.trim_end_matches('/');
            if !trimmed.starts_with('/') || trimmed.len() <= 1 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("export path must be absolute and non-root: {export:?}"),
                ));
            }
            let mut cursor = 0u64;
            let components: Vec<&str> = trimmed.split('/').filter(|c| !c.is_empty()).collect();
            for (depth, component) in components.iter().enumerate() {
                let is_leaf = depth + 1 == components.len();
                let existing = fs.nodes[cursor as usize].children.get(component.as_bytes()).copied();
                let child_id = match existing {
                    Some(id) => id,
                    None => {
                        let id = fs.nodes.len() as u64;
                        fs.nodes.push(PseudoNode {
                            id,
                            name: component.as_bytes().to_vec(),
                            parent: cursor,
                            children: BTreeMap::new(),
                            export: None,
                        });
                        fs.nodes[cursor as usize].children.insert(component.as_bytes().to_vec(), id);
                        id
                    }
                };
                if fs.nodes[child_id as usize].export.is_some() && !is_leaf {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("export path nests under another export: {export:?}"),
                    ));
                }
                if is_leaf {
                    let child = &mut fs.nodes[child_id as usize];
                    if child.export.is_some() {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::InvalidInput,
                            format!("duplicate export path: {export:?}"),
                        ));
                    }
                    if !child.children.is_empty() {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::InvalidInput,
                            format!("export path nests another export: {export:?}"),
                        ));
                    }
                    child.export = Some(trimmed.to_string());
                }
                cursor = child_id;
            }
        }
        Ok(fs)
    }

    /// The handle of the pseudo root `/`.
    pub fn root_handle(&self) -> Vec<u8> {
        self.nodes[0].handle()
    }

    /// Resolves a pseudo handle to its node.
    pub fn node_by_handle(&self, fh: &[u8]) -> Option<&PseudoNode> {
        if !is_pseudo_handle(fh) {
            return None;
        }
        let id = u64::from_be_bytes(fh[4..12].try_into().ok()?);
        self.nodes.get(id as usize)
    }

    /// The handle for a node in this tree.
    pub fn handle_of(&self, node: &PseudoNode) -> Vec<u8> {
        node.handle()
    }

    /// Resolves one name under a pseudo directory.
    pub fn lookup(&self, node: &PseudoNode, name: &[u8]) -> Option<PseudoChild<'_>> {
        let child_id = *node.children.get(name)?;
        let child = &self.nodes[child_id as usize];
        match child.export.as_deref() {
            Some(export) => Some(PseudoChild::Junction(export)),
            None => Some(PseudoChild::Node(child)),
        }
    }

    /// The parent of a pseudo node; the root is its own parent.
    pub fn parent(&self, node: &PseudoNode) -> &PseudoNode {
        &self.nodes[node.parent as usize]
    }

    /// Finds the pseudo node owning an export path, for LOOKUPP out of a
    /// real-fs share root.
    pub fn node_for_export(&self, export: &str) -> Option<&PseudoNode> {
        self.nodes.iter().find(|n| n.export.as_deref() == Some(export))
    }

    /// The configured export paths, in tree order.
    pub fn exports(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().filter_map(|n| n.export.as_deref())
    }

    /// Name-sorted children of a pseudo directory.
    pub fn children<'a>(
        &'a self,
        node: &'a PseudoNode,
    ) -> impl Iterator<Item = (&'a [u8], PseudoChild<'a>)> + 'a {
        node.children.iter().map(move |(name, &id)| {
            let child = &self.nodes[id as usize];
            let resolved = match child.export.as_deref() {
                Some(export) => PseudoChild::Junction(export),
                None => PseudoChild::Node(child),
            };
            (name.as_slice(), resolved)
        })
    }

    /// The fixed attribute set every pseudo directory presents: mode 0555,
    /// nlink 2 + subdirectories, synthetic times.
    pub fn attributes(&self, node: &PseudoNode, lease_time: u32) -> AttrSource {
        AttrSource {
            ftype: nfs_ftype4::NF4DIR,
            change: 1,
            size: 4096,
            fsid: fsid4 { major: 0, minor: 0 },
            // Offset ids so a pseudo fileid can never read as the reserved 0.
            fileid: node.id + 1,
            mode: 0o555,
            nlink: 2 + node.children.len() as u32,
            owner: "uid:0".to_string(),
            owner_group: "gid:0".to_string(),
            space_used: 4096,
            atime: self.built_at,
            ctime: self.built_at,
            mtime: self.built_at,
            filehandle: node.handle(),
            lease_time,
        }
    }
}
