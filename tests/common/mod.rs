//! In-memory remote store used by the behavioral suites.
#![allow(dead_code, clippy::unwrap_used, missing_docs)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::SystemTime;

use parking_lot::Mutex;

use sftp_fs::fs::SftpFs;
use sftp_fs::sftp::{BackendError, RemoteDirEntry, RemoteFile, SftpBackend};

/// The remote working directory every test mount is rooted at.
pub const REMOTE_ROOT: &str = "/remote";

pub const TEST_OWNER: (u32, u32) = (1000, 1000);

#[derive(Debug, Clone)]
pub struct MemNode {
    pub is_dir: bool,
    pub data: Vec<u8>,
    pub perm: u16,
    pub mtime: SystemTime,
}

/// An in-memory stand-in for the remote store, keyed by absolute path.
///
/// Clones share state, so a clone handed to the filesystem can be inspected
/// and mutated from the test afterwards. The `offline` flag makes every
/// subsequent remote call fail, and `read_dir_calls` counts listing fetches.
#[derive(Clone)]
pub struct MemBackend {
    nodes: Arc<Mutex<HashMap<String, MemNode>>>,
    pub read_dir_calls: Arc<AtomicUsize>,
    pub offline: Arc<AtomicBool>,
}

impl MemBackend {
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            REMOTE_ROOT.to_owned(),
            MemNode {
                is_dir: true,
                data: Vec::new(),
                perm: 0o755,
                mtime: SystemTime::now(),
            },
        );
        Self {
            nodes: Arc::new(Mutex::new(nodes)),
            read_dir_calls: Arc::new(AtomicUsize::new(0)),
            offline: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn add_dir(&self, path: &str) {
        self.nodes.lock().insert(
            path.to_owned(),
            MemNode {
                is_dir: true,
                data: Vec::new(),
                perm: 0o755,
                mtime: SystemTime::now(),
            },
        );
    }

    pub fn add_file(&self, path: &str, data: &[u8]) {
        self.nodes.lock().insert(
            path.to_owned(),
            MemNode {
                is_dir: false,
                data: data.to_vec(),
                perm: 0o644,
                mtime: SystemTime::now(),
            },
        );
    }

    pub fn contains(&self, path: &str) -> bool {
        self.nodes.lock().contains_key(path)
    }

    pub fn file_data(&self, path: &str) -> Option<Vec<u8>> {
        self.nodes.lock().get(path).map(|n| n.data.clone())
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), BackendError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(BackendError::new("connection lost"));
        }
        Ok(())
    }
}

impl Default for MemBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn child_name<'a>(parent: &str, path: &'a str) -> Option<&'a str> {
    let rest = path.strip_prefix(parent)?.strip_prefix('/')?;
    if rest.is_empty() || rest.contains('/') {
        return None;
    }
    Some(rest)
}

impl SftpBackend for MemBackend {
    type File = MemFile;

    fn getwd(&self) -> Result<String, BackendError> {
        self.check_online()?;
        Ok(REMOTE_ROOT.to_owned())
    }

    fn read_dir(&self, path: &str) -> Result<Vec<RemoteDirEntry>, BackendError> {
        self.check_online()?;
        self.read_dir_calls.fetch_add(1, Ordering::SeqCst);
        let nodes = self.nodes.lock();
        if !nodes.get(path).is_some_and(|n| n.is_dir) {
            return Err(BackendError::new(format!("no such directory: {path}")));
        }
        Ok(nodes
            .iter()
            .filter_map(|(entry_path, node)| {
                let name = child_name(path, entry_path)?;
                Some(RemoteDirEntry {
                    name: name.to_owned(),
                    size: node.data.len() as u64,
                    perm: node.perm,
                    is_dir: node.is_dir,
                    mtime: node.mtime,
                })
            })
            .collect())
    }

    fn open(&self, path: &str) -> Result<Self::File, BackendError> {
        self.check_online()?;
        let nodes = self.nodes.lock();
        match nodes.get(path) {
            Some(n) if !n.is_dir => Ok(MemFile {
                nodes: Arc::clone(&self.nodes),
                offline: Arc::clone(&self.offline),
                path: path.to_owned(),
            }),
            _ => Err(BackendError::new(format!("no such file: {path}"))),
        }
    }

    fn create(&self, path: &str) -> Result<Self::File, BackendError> {
        self.check_online()?;
        let mut nodes = self.nodes.lock();
        nodes.insert(
            path.to_owned(),
            MemNode {
                is_dir: false,
                data: Vec::new(),
                perm: 0o644,
                mtime: SystemTime::now(),
            },
        );
        Ok(MemFile {
            nodes: Arc::clone(&self.nodes),
            offline: Arc::clone(&self.offline),
            path: path.to_owned(),
        })
    }

    fn mkdir(&self, path: &str, _mode: u32) -> Result<(), BackendError> {
        self.check_online()?;
        let mut nodes = self.nodes.lock();
        if nodes.contains_key(path) {
            return Err(BackendError::new(format!("already exists: {path}")));
        }
        nodes.insert(
            path.to_owned(),
            MemNode {
                is_dir: true,
                data: Vec::new(),
                perm: 0o755,
                mtime: SystemTime::now(),
            },
        );
        Ok(())
    }

    fn remove_file(&self, path: &str) -> Result<(), BackendError> {
        self.check_online()?;
        let mut nodes = self.nodes.lock();
        match nodes.get(path) {
            Some(n) if !n.is_dir => {
                nodes.remove(path);
                Ok(())
            }
            _ => Err(BackendError::new(format!("no such file: {path}"))),
        }
    }

    fn remove_dir(&self, path: &str) -> Result<(), BackendError> {
        self.check_online()?;
        let mut nodes = self.nodes.lock();
        match nodes.get(path) {
            Some(n) if n.is_dir => {
                nodes.remove(path);
                Ok(())
            }
            _ => Err(BackendError::new(format!("no such directory: {path}"))),
        }
    }
}

/// An open file against the shared in-memory store.
pub struct MemFile {
    nodes: Arc<Mutex<HashMap<String, MemNode>>>,
    offline: Arc<AtomicBool>,
    path: String,
}

impl RemoteFile for MemFile {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, BackendError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(BackendError::new("connection lost"));
        }
        let nodes = self.nodes.lock();
        let node = nodes
            .get(&self.path)
            .ok_or_else(|| BackendError::new("file vanished"))?;
        let offset = offset as usize;
        if offset >= node.data.len() {
            return Ok(0);
        }
        let n = buf.len().min(node.data.len() - offset);
        buf[..n].copy_from_slice(&node.data[offset..offset + n]);
        Ok(n)
    }

    fn write_at(&mut self, data: &[u8], offset: u64) -> Result<usize, BackendError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(BackendError::new("connection lost"));
        }
        let mut nodes = self.nodes.lock();
        let node = nodes
            .get_mut(&self.path)
            .ok_or_else(|| BackendError::new("file vanished"))?;
        let offset = offset as usize;
        let end = offset + data.len();
        if node.data.len() < end {
            node.data.resize(end, 0);
        }
        node.data[offset..end].copy_from_slice(data);
        node.mtime = SystemTime::now();
        Ok(data.len())
    }

    fn close(&mut self) -> Result<(), BackendError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(BackendError::new("connection lost"));
        }
        Ok(())
    }
}

/// Build a filesystem over a fresh shared-state backend.
pub fn mount(backend: &MemBackend) -> SftpFs<MemBackend> {
    SftpFs::new(backend.clone(), TEST_OWNER).unwrap()
}
