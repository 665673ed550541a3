//! Open handles and the handle registry.

use std::collections::HashMap;

use crate::fs::inode::{Ino, NodeKind};

/// Kernel-visible handle identifier. Independent of inode identifiers.
pub type Fh = u64;

/// One entry of a directory handle's listing snapshot. Entries that were
/// never individually looked up carry [`PENDING_INO`](crate::fs::inode::PENDING_INO).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntrySnapshot {
    pub ino: Ino,
    pub name: String,
    pub kind: NodeKind,
}

/// An open remote file. Borrows its inode; owning the remote descriptor is
/// its whole job.
pub struct FileHandle<F> {
    pub ino: Ino,
    pub file: F,
}

/// An open directory. The listing snapshot is taken on the first read and
/// never revalidated for the life of the handle.
pub struct DirHandle {
    pub ino: Ino,
    pub snapshot: Option<Vec<DirEntrySnapshot>>,
}

pub enum Handle<F> {
    File(FileHandle<F>),
    Dir(DirHandle),
}

impl<F> Handle<F> {
    pub fn ino(&self) -> Ino {
        match self {
            Self::File(h) => h.ino,
            Self::Dir(h) => h.ino,
        }
    }
}

/// The handle registry: every currently open file or directory handle, keyed
/// by a monotonically increasing identifier.
pub struct HandleTable<F> {
    handles: HashMap<Fh, Handle<F>>,
    next_fh: Fh,
}

impl<F> HandleTable<F> {
    pub fn new() -> Self {
        Self {
            handles: HashMap::new(),
            next_fh: 1,
        }
    }

    pub fn insert(&mut self, handle: Handle<F>) -> Fh {
        let fh = self.next_fh;
        self.next_fh += 1;
        self.handles.insert(fh, handle);
        fh
    }

    pub fn get(&self, fh: Fh) -> Option<&Handle<F>> {
        self.handles.get(&fh)
    }

    pub fn get_mut(&mut self, fh: Fh) -> Option<&mut Handle<F>> {
        self.handles.get_mut(&fh)
    }

    pub fn remove(&mut self, fh: Fh) -> Option<Handle<F>> {
        self.handles.remove(&fh)
    }

    /// Number of currently open handles.
    pub fn handle_count(&self) -> usize {
        self.handles.len()
    }
}

impl<F> Default for HandleTable<F> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_monotonic_even_after_release() {
        let mut table: HandleTable<()> = HandleTable::new();
        let a = table.insert(Handle::Dir(DirHandle {
            ino: 1,
            snapshot: None,
        }));
        let b = table.insert(Handle::Dir(DirHandle {
            ino: 1,
            snapshot: None,
        }));
        assert!(b > a);

        table.remove(a);
        let c = table.insert(Handle::Dir(DirHandle {
            ino: 1,
            snapshot: None,
        }));
        assert!(c > b);
        assert_eq!(table.handle_count(), 2);
    }

    #[test]
    fn removed_handles_are_gone() {
        let mut table: HandleTable<()> = HandleTable::new();
        let fh = table.insert(Handle::File(FileHandle { ino: 2, file: () }));
        assert!(table.get(fh).is_some());
        assert!(table.remove(fh).is_some());
        assert!(table.get(fh).is_none());
        assert!(table.remove(fh).is_none());
    }
}
