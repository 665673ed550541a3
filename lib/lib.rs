//! sftp-fs shared library.

/// Filesystem core: registries, driver, and the kernel adapter.
pub mod fs;
/// Remote file access over SFTP.
pub mod sftp;
