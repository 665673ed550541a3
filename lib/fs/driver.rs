//! The filesystem driver state machine.
//!
//! Every kernel operation is dispatched here against the inode and handle
//! registries and the remote backend. The caller (the fuser adapter) holds a
//! single process-wide lock across each call, remote round trips included, so
//! the driver itself is written as plain single-threaded code: no operation
//! ever observes a torn registry or a half-populated directory.

use std::time::{Duration, SystemTime};

use bytes::Bytes;
use tracing::{debug, instrument, trace, warn};

use crate::fs::error::FsError;
use crate::fs::handle::{DirEntrySnapshot, DirHandle, Fh, FileHandle, Handle, HandleTable};
use crate::fs::inode::{
    Child, DirNode, FileNode, Ino, InodeAttrs, InodeTable, Node, NodeKind, PENDING_INO, ROOT_INO,
};
use crate::sftp::{RemoteDirEntry, RemoteFile as _, SftpBackend};

/// How long the kernel may cache attributes before re-querying.
pub const ATTR_TTL: Duration = Duration::from_secs(1);

/// Preferred transfer block size reported by statfs.
pub const BLOCK_SIZE: u32 = 1 << 17;

/// Attributes plus the identifier they belong to, as returned to the kernel
/// interface.
#[derive(Debug, Clone, Copy)]
pub struct EntryOut {
    pub ino: Ino,
    pub kind: NodeKind,
    pub attrs: InodeAttrs,
}

/// The settable subset of attributes. Unset fields are left untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct SetAttrRequest {
    pub size: Option<u64>,
    pub mode: Option<u32>,
    pub atime: Option<SystemTime>,
    pub mtime: Option<SystemTime>,
}

/// Synthetic filesystem statistics. Capacities are large enough that naive
/// clients never refuse writes.
#[derive(Debug, Clone, Copy)]
pub struct StatfsOut {
    pub blocks: u64,
    pub blocks_free: u64,
    pub blocks_available: u64,
    pub inodes: u64,
    pub inodes_free: u64,
    pub block_size: u32,
    pub max_name_len: u32,
    pub fragment_size: u32,
}

/// The SFTP-backed filesystem.
pub struct SftpFs<B: SftpBackend> {
    backend: B,
    inodes: InodeTable,
    handles: HandleTable<B::File>,
    owner: (u32, u32),
}

impl<B: SftpBackend> SftpFs<B> {
    /// Create the filesystem rooted at the backend session's working
    /// directory.
    pub fn new(backend: B, owner: (u32, u32)) -> Result<Self, FsError> {
        let root_path = backend.getwd()?;
        debug!(root = %root_path, "mount root resolved");
        let now = SystemTime::now();
        let root = DirNode::new(
            root_path,
            InodeAttrs {
                size: 4096,
                nlink: 2,
                perm: 0o777,
                uid: owner.0,
                gid: owner.1,
                atime: now,
                mtime: now,
                ctime: now,
                crtime: now,
            },
        );
        Ok(Self {
            backend,
            inodes: InodeTable::new(root),
            handles: HandleTable::new(),
            owner,
        })
    }

    /// Number of registered inodes.
    pub fn inode_count(&self) -> usize {
        self.inodes.inode_count()
    }

    /// Number of open handles.
    pub fn handle_count(&self) -> usize {
        self.handles.handle_count()
    }

    #[instrument(skip(self))]
    pub fn lookup(&mut self, parent: Ino, name: &str) -> Result<EntryOut, FsError> {
        self.require_dir(parent, FsError::InvalidArgument)?;
        self.ensure_populated(parent)?;
        let ino = self.inodes.adopt_pending(parent, name)?;
        trace!(ino, "lookup resolved");
        self.entry_out(ino)
    }

    pub fn getattr(&mut self, ino: Ino) -> Result<EntryOut, FsError> {
        self.entry_out(ino)
    }

    #[instrument(skip(self))]
    pub fn setattr(&mut self, ino: Ino, req: &SetAttrRequest) -> Result<EntryOut, FsError> {
        let node = self.inodes.get_mut(ino).ok_or(FsError::NotFound)?;
        let attrs = node.attrs_mut();
        if let Some(size) = req.size {
            attrs.size = size;
        }
        if let Some(mode) = req.mode {
            attrs.perm = (mode & 0o7777) as u16;
        }
        if let Some(atime) = req.atime {
            attrs.atime = atime;
        }
        if let Some(mtime) = req.mtime {
            attrs.mtime = mtime;
        }
        self.entry_out(ino)
    }

    /// The kernel dropped its last reference to `ino`. The registry entry is
    /// removed unconditionally; if unlink or rmdir detached the node earlier,
    /// the deferred remote delete happens now. A failed delete is surfaced
    /// but never resurrects the local entry.
    #[instrument(skip(self))]
    pub fn forget(&mut self, ino: Ino, _nlookup: u64) -> Result<(), FsError> {
        if ino == ROOT_INO {
            return Ok(());
        }
        let Some(node) = self.inodes.remove(ino) else {
            trace!(ino, "forget on unknown inode");
            return Ok(());
        };
        if !node.detached() {
            return Ok(());
        }
        debug!(ino, path = node.remote_path(), "deleting detached remote entry");
        match &node {
            Node::File(f) => self.backend.remove_file(&f.remote_path)?,
            Node::Dir(d) => self.backend.remove_dir(&d.remote_path)?,
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn mkdir(&mut self, parent: Ino, name: &str, mode: u32) -> Result<EntryOut, FsError> {
        self.require_dir(parent, FsError::InvalidArgument)?;
        self.ensure_populated(parent)?;
        let parent_dir = self.require_dir(parent, FsError::InvalidArgument)?;
        if parent_dir.children.contains_key(name) {
            return Err(FsError::AlreadyExists);
        }

        let path = join_remote(&parent_dir.remote_path, name);
        self.backend.mkdir(&path, mode)?;

        let node = Node::Dir(DirNode::new(path, self.fresh_attrs(NodeKind::Directory, mode)));
        let ino = self.inodes.insert_node(node);
        self.inodes.link_child(parent, name, ino)?;
        debug!(ino, "directory created");
        self.entry_out(ino)
    }

    /// Create-and-open: the new inode and an already-open file handle are
    /// returned in one reply.
    #[instrument(skip(self))]
    pub fn create(&mut self, parent: Ino, name: &str, mode: u32) -> Result<(EntryOut, Fh), FsError> {
        self.require_dir(parent, FsError::InvalidArgument)?;
        self.ensure_populated(parent)?;
        let parent_dir = self.require_dir(parent, FsError::InvalidArgument)?;
        if parent_dir.children.contains_key(name) {
            return Err(FsError::AlreadyExists);
        }

        let path = join_remote(&parent_dir.remote_path, name);
        let file = self.backend.create(&path)?;

        let node = Node::File(FileNode::new(path, self.fresh_attrs(NodeKind::File, mode)));
        let ino = self.inodes.insert_node(node);
        self.inodes.link_child(parent, name, ino)?;
        let fh = self.handles.insert(Handle::File(FileHandle { ino, file }));
        debug!(ino, fh, "file created and opened");
        Ok((self.entry_out(ino)?, fh))
    }

    #[instrument(skip(self))]
    pub fn unlink(&mut self, parent: Ino, name: &str) -> Result<(), FsError> {
        self.require_dir(parent, FsError::InvalidArgument)?;
        self.ensure_populated(parent)?;
        let parent_dir = self.require_dir_mut(parent, FsError::InvalidArgument)?;
        let Some(slot) = parent_dir.children.remove(name) else {
            return Err(FsError::NotFound);
        };
        // A pending placeholder was never surfaced to the kernel; dropping
        // the slot is all there is to do.
        if let Child::Registered(ino) = slot
            && let Some(node) = self.inodes.get_mut(ino)
        {
            let attrs = node.attrs_mut();
            attrs.nlink = attrs.nlink.saturating_sub(1);
            node.set_detached();
            debug!(ino, "file detached; remote delete deferred to forget");
        }
        Ok(())
    }

    /// Remove an empty directory. A registered child is detached and its
    /// remote delete deferred to forget; a still-pending child holds no
    /// kernel reference (no forget will ever arrive for it), so it is
    /// checked and deleted in place without registering an inode.
    #[instrument(skip(self))]
    pub fn rmdir(&mut self, parent: Ino, name: &str) -> Result<(), FsError> {
        self.require_dir(parent, FsError::InvalidArgument)?;
        self.ensure_populated(parent)?;

        enum Target {
            Registered(Ino),
            Pending(String),
        }
        let parent_dir = self.require_dir(parent, FsError::InvalidArgument)?;
        let target = match parent_dir.children.get(name) {
            None => return Err(FsError::NotFound),
            Some(Child::Registered(ino)) => Target::Registered(*ino),
            Some(Child::Pending(node)) => match &**node {
                Node::File(_) => return Err(FsError::NotADirectory),
                Node::Dir(dir) => Target::Pending(dir.remote_path.clone()),
            },
        };

        match target {
            Target::Registered(child_ino) => {
                match self.inodes.get(child_ino) {
                    None => return Err(FsError::NotFound),
                    Some(Node::File(_)) => return Err(FsError::NotADirectory),
                    Some(Node::Dir(_)) => {}
                }
                self.ensure_populated(child_ino)?;
                let child = self.require_dir(child_ino, FsError::NotADirectory)?;
                if !child.children.is_empty() {
                    return Err(FsError::NotEmpty);
                }
                if let Some(node) = self.inodes.get_mut(child_ino) {
                    node.set_detached();
                }
                debug!(child_ino, "directory detached; remote delete deferred to forget");
            }
            Target::Pending(path) => {
                if !self.backend.read_dir(&path)?.is_empty() {
                    return Err(FsError::NotEmpty);
                }
                self.backend.remove_dir(&path)?;
                debug!(path = %path, "unreferenced directory removed in place");
            }
        }

        let parent_dir = self.require_dir_mut(parent, FsError::InvalidArgument)?;
        parent_dir.children.remove(name);
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn opendir(&mut self, ino: Ino) -> Result<Fh, FsError> {
        match self.inodes.get(ino) {
            None => return Err(FsError::NotFound),
            Some(Node::File(_)) => return Err(FsError::NotADirectory),
            Some(Node::Dir(_)) => {}
        }
        let fh = self.handles.insert(Handle::Dir(DirHandle { ino, snapshot: None }));
        trace!(fh, "directory handle opened");
        Ok(fh)
    }

    /// Read directory entries starting at `offset` into the handle's
    /// snapshot. The snapshot is taken (and the directory populated) on the
    /// first call and stays frozen for the life of the handle; an offset past
    /// its end is the caller's error.
    pub fn readdir(&mut self, ino: Ino, fh: Fh, offset: u64) -> Result<&[DirEntrySnapshot], FsError> {
        if !self.inodes.contains(ino) {
            return Err(FsError::NotFound);
        }
        let dir_ino = match self.handles.get(fh) {
            None => return Err(FsError::NotFound),
            Some(Handle::File(_)) => return Err(FsError::InvalidArgument),
            Some(Handle::Dir(h)) => h.ino,
        };

        let needs_snapshot = matches!(
            self.handles.get(fh),
            Some(Handle::Dir(DirHandle { snapshot: None, .. }))
        );
        if needs_snapshot {
            self.ensure_populated(dir_ino)?;
            let entries = self.snapshot_entries(dir_ino)?;
            trace!(fh, count = entries.len(), "directory snapshot taken");
            let Some(Handle::Dir(handle)) = self.handles.get_mut(fh) else {
                return Err(FsError::NotFound);
            };
            handle.snapshot = Some(entries);
        }

        let Some(Handle::Dir(handle)) = self.handles.get(fh) else {
            return Err(FsError::NotFound);
        };
        let snapshot = handle.snapshot.as_deref().unwrap_or_default();
        let offset = usize::try_from(offset).map_err(|_| FsError::InvalidArgument)?;
        if offset > snapshot.len() {
            return Err(FsError::InvalidArgument);
        }
        Ok(&snapshot[offset..])
    }

    #[instrument(skip(self))]
    pub fn releasedir(&mut self, fh: Fh) -> Result<(), FsError> {
        match self.handles.get(fh) {
            None => Err(FsError::NotFound),
            Some(Handle::File(_)) => Err(FsError::InvalidArgument),
            Some(Handle::Dir(_)) => {
                self.handles.remove(fh);
                Ok(())
            }
        }
    }

    #[instrument(skip(self))]
    pub fn open(&mut self, ino: Ino) -> Result<Fh, FsError> {
        let path = match self.inodes.get(ino) {
            None => return Err(FsError::NotFound),
            Some(Node::Dir(_)) => return Err(FsError::NotAFile),
            Some(Node::File(f)) => f.remote_path.clone(),
        };
        let file = self.backend.open(&path)?;
        let fh = self.handles.insert(Handle::File(FileHandle { ino, file }));
        trace!(fh, "file handle opened");
        Ok(fh)
    }

    /// Read up to `size` bytes at `offset`. Reading at or past end-of-file
    /// yields empty data, not an error.
    pub fn read(&mut self, ino: Ino, fh: Fh, offset: u64, size: u32) -> Result<Bytes, FsError> {
        if !self.inodes.contains(ino) {
            return Err(FsError::NotFound);
        }
        let handle = match self.handles.get_mut(fh) {
            None => return Err(FsError::NotFound),
            Some(Handle::Dir(_)) => return Err(FsError::InvalidArgument),
            Some(Handle::File(h)) => h,
        };

        let mut buf = vec![0u8; size as usize];
        let mut filled = 0;
        while filled < buf.len() {
            let n = handle.file.read_at(&mut buf[filled..], offset + filled as u64)?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(Bytes::from(buf))
    }

    /// Write `data` at `offset`, implicitly extending the remote file, and
    /// refresh the advisory size/mtime on the inode.
    #[instrument(skip(self, data))]
    pub fn write(&mut self, ino: Ino, fh: Fh, offset: u64, data: &[u8]) -> Result<u32, FsError> {
        if !self.inodes.contains(ino) {
            return Err(FsError::NotFound);
        }
        let handle = match self.handles.get_mut(fh) {
            None => return Err(FsError::NotFound),
            Some(Handle::Dir(_)) => return Err(FsError::InvalidArgument),
            Some(Handle::File(h)) => h,
        };

        let written = handle.file.write_at(data, offset)?;
        let file_ino = handle.ino;
        if let Some(node) = self.inodes.get_mut(file_ino) {
            let attrs = node.attrs_mut();
            attrs.size = attrs.size.max(offset + written as u64);
            attrs.mtime = SystemTime::now();
        }
        trace!(written, "write complete");
        Ok(written as u32)
    }

    /// Release a file handle. Closing the remote descriptor is best-effort:
    /// a failure is logged but never blocks freeing the handle identifier.
    #[instrument(skip(self))]
    pub fn release(&mut self, fh: Fh) -> Result<(), FsError> {
        match self.handles.get(fh) {
            None => Err(FsError::NotFound),
            Some(Handle::Dir(_)) => Err(FsError::InvalidArgument),
            Some(Handle::File(_)) => {
                if let Some(Handle::File(mut handle)) = self.handles.remove(fh) {
                    if let Err(e) = handle.file.close() {
                        warn!(fh, error = %e, "failed to close remote file");
                    }
                }
                Ok(())
            }
        }
    }

    pub fn statfs(&self) -> StatfsOut {
        StatfsOut {
            blocks: 1 << 33,
            blocks_free: 1 << 33,
            blocks_available: 1 << 33,
            inodes: 1 << 50,
            inodes_free: 1 << 50,
            block_size: BLOCK_SIZE,
            max_name_len: 255,
            fragment_size: BLOCK_SIZE,
        }
    }

    fn entry_out(&self, ino: Ino) -> Result<EntryOut, FsError> {
        let node = self.inodes.get(ino).ok_or(FsError::NotFound)?;
        Ok(EntryOut {
            ino,
            kind: node.kind(),
            attrs: *node.attrs(),
        })
    }

    fn require_dir(&self, ino: Ino, kind_err: FsError) -> Result<&DirNode, FsError> {
        match self.inodes.get(ino) {
            None => Err(FsError::NotFound),
            Some(Node::File(_)) => Err(kind_err),
            Some(Node::Dir(dir)) => Ok(dir),
        }
    }

    fn require_dir_mut(&mut self, ino: Ino, kind_err: FsError) -> Result<&mut DirNode, FsError> {
        match self.inodes.get_mut(ino) {
            None => Err(FsError::NotFound),
            Some(Node::File(_)) => Err(kind_err),
            Some(Node::Dir(dir)) => Ok(dir),
        }
    }

    /// One-shot lazy population. Fetches the remote listing the first time a
    /// directory is looked into and inserts every remote entry as a pending
    /// placeholder; names already present locally (our own creations) win.
    /// On failure the directory stays unpopulated and no local state changes.
    fn ensure_populated(&mut self, ino: Ino) -> Result<(), FsError> {
        let dir = self.require_dir(ino, FsError::NotADirectory)?;
        if dir.populated {
            return Ok(());
        }
        let path = dir.remote_path.clone();

        let listing = self.backend.read_dir(&path)?;
        debug!(ino, count = listing.len(), "directory populated from remote");

        let owner = self.owner;
        let dir = self.require_dir_mut(ino, FsError::NotADirectory)?;
        for entry in listing {
            let child_path = join_remote(&path, &entry.name);
            let name = entry.name.clone();
            dir.children
                .entry(name)
                .or_insert_with(|| Child::Pending(Box::new(node_from_remote(&entry, child_path, owner))));
        }
        dir.populated = true;
        Ok(())
    }

    /// Snapshot the current entries of a populated directory. Registered
    /// children carry their inode number; pending placeholders carry the
    /// sentinel.
    fn snapshot_entries(&self, ino: Ino) -> Result<Vec<DirEntrySnapshot>, FsError> {
        let dir = self.require_dir(ino, FsError::NotADirectory)?;
        Ok(dir
            .children
            .iter()
            .map(|(name, child)| match child {
                Child::Registered(child_ino) => DirEntrySnapshot {
                    ino: *child_ino,
                    name: name.clone(),
                    kind: self.inodes.get(*child_ino).map_or(NodeKind::File, Node::kind),
                },
                Child::Pending(node) => DirEntrySnapshot {
                    ino: PENDING_INO,
                    name: name.clone(),
                    kind: node.kind(),
                },
            })
            .collect())
    }

    fn fresh_attrs(&self, kind: NodeKind, mode: u32) -> InodeAttrs {
        let now = SystemTime::now();
        InodeAttrs {
            size: match kind {
                NodeKind::Directory => 4096,
                NodeKind::File => 0,
            },
            nlink: 1,
            perm: (mode & 0o7777) as u16,
            uid: self.owner.0,
            gid: self.owner.1,
            atime: now,
            mtime: now,
            ctime: now,
            crtime: now,
        }
    }
}

fn node_from_remote(entry: &RemoteDirEntry, remote_path: String, owner: (u32, u32)) -> Node {
    let attrs = InodeAttrs {
        size: entry.size,
        nlink: 1,
        perm: entry.perm,
        uid: owner.0,
        gid: owner.1,
        atime: entry.mtime,
        mtime: entry.mtime,
        ctime: entry.mtime,
        crtime: entry.mtime,
    };
    if entry.is_dir {
        Node::Dir(DirNode::new(remote_path, attrs))
    } else {
        Node::File(FileNode::new(remote_path, attrs))
    }
}

fn join_remote(base: &str, name: &str) -> String {
    if base.ends_with('/') {
        format!("{base}{name}")
    } else {
        format!("{base}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_remote_handles_root_and_nested_paths() {
        assert_eq!(join_remote("/", "home"), "/home");
        assert_eq!(join_remote("/home/user", "notes.txt"), "/home/user/notes.txt");
    }
}
