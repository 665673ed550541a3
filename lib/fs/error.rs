//! The driver's error taxonomy and its errno mapping.

use thiserror::Error;

use crate::sftp::BackendError;

/// Every failure a filesystem operation can report. Remote failures collapse
/// into [`FsError::Io`]; no finer classification crosses this boundary.
#[derive(Debug, Error)]
pub enum FsError {
    #[error("no such inode, handle, or entry")]
    NotFound,

    #[error("wrong entity kind for operation")]
    InvalidArgument,

    #[error("entry already exists")]
    AlreadyExists,

    #[error("directory not empty")]
    NotEmpty,

    #[error("not a directory")]
    NotADirectory,

    #[error("not a file")]
    NotAFile,

    #[error("operation not implemented")]
    Unsupported,

    #[error("remote i/o failure")]
    Io(#[from] BackendError),
}

impl FsError {
    /// Translate into the kernel interface's error-code vocabulary.
    pub fn errno(&self) -> i32 {
        match self {
            Self::NotFound => libc::ENOENT,
            Self::InvalidArgument => libc::EINVAL,
            Self::AlreadyExists => libc::EEXIST,
            Self::NotEmpty => libc::ENOTEMPTY,
            Self::NotADirectory => libc::ENOTDIR,
            Self::NotAFile => libc::EISDIR,
            Self::Unsupported => libc::ENOSYS,
            Self::Io(_) => libc::EIO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping_matches_the_kernel_vocabulary() {
        assert_eq!(FsError::NotFound.errno(), libc::ENOENT);
        assert_eq!(FsError::InvalidArgument.errno(), libc::EINVAL);
        assert_eq!(FsError::AlreadyExists.errno(), libc::EEXIST);
        assert_eq!(FsError::NotEmpty.errno(), libc::ENOTEMPTY);
        assert_eq!(FsError::NotADirectory.errno(), libc::ENOTDIR);
        assert_eq!(FsError::NotAFile.errno(), libc::EISDIR);
        assert_eq!(FsError::Unsupported.errno(), libc::ENOSYS);
    }

    #[test]
    fn backend_failures_collapse_to_eio() {
        let err: FsError = BackendError::new("connection reset").into();
        assert_eq!(err.errno(), libc::EIO);
    }
}
