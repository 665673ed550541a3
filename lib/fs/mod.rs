//! The filesystem core.

/// The driver state machine dispatching kernel operations.
pub mod driver;
/// Operation failures and their errno mapping.
pub mod error;
/// Adapter from [`fuser::Filesystem`] callbacks to [`driver::SftpFs`].
pub mod fuse;
/// Open file and directory handles.
pub mod handle;
/// Inode entities and the inode registry.
pub mod inode;

pub use driver::SftpFs;
pub use error::FsError;
pub use fuse::FuseAdapter;
