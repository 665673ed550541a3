//! The remote file access backend boundary.
//!
//! The driver only ever talks to the remote store through [`SftpBackend`];
//! the production implementation lives in [`session`], and the behavioral
//! test suites substitute an in-memory one. All backend failures are opaque:
//! the driver consumes no structured remote error taxonomy.

use std::time::SystemTime;

use thiserror::Error;

pub mod session;

pub use session::{Ssh2Backend, SshCredentials};

/// Opaque remote failure. Whatever went wrong on the wire, the driver maps
/// it uniformly to an I/O error.
#[derive(Debug, Error)]
#[error("remote backend failure: {0}")]
pub struct BackendError(Box<dyn std::error::Error + Send + Sync>);

impl BackendError {
    pub fn new(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self(source.into())
    }
}

impl From<std::io::Error> for BackendError {
    fn from(e: std::io::Error) -> Self {
        Self::new(e)
    }
}

/// One entry of a remote directory listing.
#[derive(Debug, Clone)]
pub struct RemoteDirEntry {
    pub name: String,
    pub size: u64,
    pub perm: u16,
    pub is_dir: bool,
    pub mtime: SystemTime,
}

/// An open remote file descriptor.
pub trait RemoteFile: Send {
    /// Read at `offset`. A read at or beyond end-of-file returns `Ok(0)`.
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, BackendError>;

    /// Write at `offset`, implicitly extending the remote file if needed.
    fn write_at(&mut self, data: &[u8], offset: u64) -> Result<usize, BackendError>;

    /// Release the remote descriptor.
    fn close(&mut self) -> Result<(), BackendError>;
}

/// The stateful remote file-access session.
pub trait SftpBackend: Send {
    type File: RemoteFile;

    /// The session's working directory; becomes the mount root's remote path.
    fn getwd(&self) -> Result<String, BackendError>;

    fn read_dir(&self, path: &str) -> Result<Vec<RemoteDirEntry>, BackendError>;

    /// Open an existing remote file for reading and writing.
    fn open(&self, path: &str) -> Result<Self::File, BackendError>;

    /// Create (or truncate) a remote file and open it for reading and writing.
    fn create(&self, path: &str) -> Result<Self::File, BackendError>;

    fn mkdir(&self, path: &str, mode: u32) -> Result<(), BackendError>;

    fn remove_file(&self, path: &str) -> Result<(), BackendError>;

    fn remove_dir(&self, path: &str) -> Result<(), BackendError>;
}
