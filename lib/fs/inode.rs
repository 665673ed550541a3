//! Inode entities and the inode registry.
//!
//! Every filesystem object the kernel can address lives here as a [`Node`]
//! keyed by its inode number. Directory children that were discovered through
//! a remote listing but never individually looked up stay [`Child::Pending`]
//! and carry no inode number until the driver registers them.

use std::collections::HashMap;
use std::time::SystemTime;

use crate::fs::error::FsError;

/// Kernel-visible inode identifier.
pub type Ino = u64;

/// The reserved root identifier. Always resolves to the mount root directory.
pub const ROOT_INO: Ino = 1;

/// Sentinel inode number carried by placeholder children that have not been
/// registered yet. Sits below the reserved range so it can never collide with
/// an allocated identifier.
pub const PENDING_INO: Ino = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Directory,
}

/// Metadata record shared by files and directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InodeAttrs {
    pub size: u64,
    pub nlink: u32,
    pub perm: u16,
    pub uid: u32,
    pub gid: u32,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    pub crtime: SystemTime,
}

/// A filesystem entity. Closed set: regular file or directory.
#[derive(Debug)]
pub enum Node {
    File(FileNode),
    Dir(DirNode),
}

/// A remote regular file. Content is never cached in the entity; all I/O
/// flows through open remote handles.
#[derive(Debug)]
pub struct FileNode {
    pub attrs: InodeAttrs,
    pub remote_path: String,
    /// Set when unlink removed this file from its parent. The remote file is
    /// deleted once the kernel forgets the inode.
    pub detached: bool,
}

/// A remote directory with a lazily-populated child mapping.
#[derive(Debug)]
pub struct DirNode {
    pub attrs: InodeAttrs,
    pub remote_path: String,
    pub children: HashMap<String, Child>,
    /// While false the child mapping is unknown, not empty. The first lookup
    /// or listing fetches the remote listing exactly once; remote-side
    /// changes made afterwards by other actors are not reflected until the
    /// process restarts.
    pub populated: bool,
    pub detached: bool,
}

/// A directory entry. Children start out as pending placeholders and are
/// promoted to registered inodes the first time they are looked up.
#[derive(Debug)]
pub enum Child {
    Registered(Ino),
    Pending(Box<Node>),
}

impl FileNode {
    pub fn new(remote_path: String, attrs: InodeAttrs) -> Self {
        Self {
            attrs,
            remote_path,
            detached: false,
        }
    }
}

impl DirNode {
    pub fn new(remote_path: String, attrs: InodeAttrs) -> Self {
        Self {
            attrs,
            remote_path,
            children: HashMap::new(),
            populated: false,
            detached: false,
        }
    }
}

impl Node {
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::File(_) => NodeKind::File,
            Self::Dir(_) => NodeKind::Directory,
        }
    }

    pub fn attrs(&self) -> &InodeAttrs {
        match self {
            Self::File(f) => &f.attrs,
            Self::Dir(d) => &d.attrs,
        }
    }

    pub fn attrs_mut(&mut self) -> &mut InodeAttrs {
        match self {
            Self::File(f) => &mut f.attrs,
            Self::Dir(d) => &mut d.attrs,
        }
    }

    pub fn remote_path(&self) -> &str {
        match self {
            Self::File(f) => &f.remote_path,
            Self::Dir(d) => &d.remote_path,
        }
    }

    pub fn detached(&self) -> bool {
        match self {
            Self::File(f) => f.detached,
            Self::Dir(d) => d.detached,
        }
    }

    pub fn set_detached(&mut self) {
        match self {
            Self::File(f) => f.detached = true,
            Self::Dir(d) => d.detached = true,
        }
    }
}

/// The inode registry.
///
/// Owns every inode ever surfaced to the kernel plus the monotonic identifier
/// allocator. No eviction: entries stay resident until the kernel explicitly
/// forgets them.
pub struct InodeTable {
    nodes: HashMap<Ino, Node>,
    next_ino: Ino,
}

impl InodeTable {
    /// Create a registry seeded with the root directory at [`ROOT_INO`].
    pub fn new(root: DirNode) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(ROOT_INO, Node::Dir(root));
        Self {
            nodes,
            next_ino: ROOT_INO + 1,
        }
    }

    /// Hand out a fresh identifier, strictly greater than [`ROOT_INO`] and
    /// never reused within the process lifetime.
    fn allocate(&mut self) -> Ino {
        let ino = self.next_ino;
        self.next_ino += 1;
        ino
    }

    pub fn get(&self, ino: Ino) -> Option<&Node> {
        self.nodes.get(&ino)
    }

    pub fn get_mut(&mut self, ino: Ino) -> Option<&mut Node> {
        self.nodes.get_mut(&ino)
    }

    pub fn contains(&self, ino: Ino) -> bool {
        self.nodes.contains_key(&ino)
    }

    pub fn remove(&mut self, ino: Ino) -> Option<Node> {
        self.nodes.remove(&ino)
    }

    /// Number of registered inodes.
    pub fn inode_count(&self) -> usize {
        self.nodes.len()
    }

    /// Allocate an identifier and insert the node under it.
    pub fn insert_node(&mut self, node: Node) -> Ino {
        let ino = self.allocate();
        self.nodes.insert(ino, node);
        ino
    }

    /// Record `ino` as a child of `parent` under `name`.
    pub fn link_child(&mut self, parent: Ino, name: &str, ino: Ino) -> Result<(), FsError> {
        match self.nodes.get_mut(&parent) {
            None => Err(FsError::NotFound),
            Some(Node::File(_)) => Err(FsError::InvalidArgument),
            Some(Node::Dir(dir)) => {
                dir.children.insert(name.to_owned(), Child::Registered(ino));
                Ok(())
            }
        }
    }

    /// Resolve a child of `parent` by name, registering it first if it is
    /// still a pending placeholder. The placeholder's slot is rewritten to
    /// [`Child::Registered`] so the identifier stays stable on every
    /// subsequent resolution.
    pub fn adopt_pending(&mut self, parent: Ino, name: &str) -> Result<Ino, FsError> {
        let Some(Node::Dir(dir)) = self.nodes.get_mut(&parent) else {
            return Err(FsError::NotFound);
        };
        let Some(slot) = dir.children.get_mut(name) else {
            return Err(FsError::NotFound);
        };
        if let Child::Registered(ino) = slot {
            return Ok(*ino);
        }

        let Child::Pending(node) = std::mem::replace(slot, Child::Registered(PENDING_INO)) else {
            unreachable!("slot was just matched as pending");
        };
        let ino = self.insert_node(*node);
        let Some(Node::Dir(dir)) = self.nodes.get_mut(&parent) else {
            unreachable!("parent {parent} was just borrowed as a directory");
        };
        if let Some(slot) = dir.children.get_mut(name) {
            *slot = Child::Registered(ino);
        }
        Ok(ino)
    }
}
