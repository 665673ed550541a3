use std::path::PathBuf;

use tokio::select;
use tracing::{debug, error, info};

use sftp_fs::fs::{FuseAdapter, SftpFs};
use sftp_fs::sftp::{Ssh2Backend, SshCredentials};

/// Everything needed to bring the mount up.
pub struct MountConfig {
    pub mount_point: PathBuf,
    pub host: String,
    pub port: u16,
    pub credentials: SshCredentials,
}

mod managed_fuse {
    //! fuser will not attempt a force unmount when the `BackgroundSession` is
    //! dropped, only a regular one, but a crashed or interrupted run must not
    //! leave a dead mount behind. `ManagedFuse` retries an aggressive unmount
    //! on drop.
    use std::path::PathBuf;
    use std::time::Duration;

    use fuser::BackgroundSession;
    use nix::errno::Errno;

    use super::{FuseAdapter, MountConfig, SftpFs, Ssh2Backend, debug, error};

    pub struct FuseCoreScope {
        _session: BackgroundSession,
    }

    impl FuseCoreScope {
        fn spawn(config: &MountConfig) -> Result<Self, std::io::Error> {
            Ok(Self {
                _session: Self::spawn_fuse(config)?,
            })
        }

        fn spawn_fuse(config: &MountConfig) -> Result<BackgroundSession, std::io::Error> {
            let backend = Ssh2Backend::connect(&config.host, config.port, &config.credentials)
                .map_err(std::io::Error::other)?;
            let owner = (
                nix::unistd::getuid().as_raw(),
                nix::unistd::getgid().as_raw(),
            );
            let fs = SftpFs::new(backend, owner).map_err(std::io::Error::other)?;
            let adapter = FuseAdapter::new(fs);
            let mount_opts = [
                fuser::MountOption::FSName("sftp-fs".to_owned()),
                fuser::MountOption::NoDev,
                fuser::MountOption::AutoUnmount,
                fuser::MountOption::DefaultPermissions,
            ];

            fuser::spawn_mount2(adapter, &config.mount_point, &mount_opts)
        }
    }

    pub struct ManagedFuse {
        mount_point: PathBuf,
    }

    impl ManagedFuse {
        pub fn new(config: &MountConfig) -> Self {
            Self {
                mount_point: config.mount_point.clone(),
            }
        }

        pub fn spawn(&self, config: &MountConfig) -> Result<FuseCoreScope, std::io::Error> {
            _ = self; // self used for calling convention.
            FuseCoreScope::spawn(config)
        }
    }

    impl Drop for ManagedFuse {
        fn drop(&mut self) {
            const UMOUNT_ATTEMPT_COUNT: usize = 10;
            const UMOUNT_ATTEMPT_DELAY: Duration = Duration::from_millis(10);

            debug!(mount_point = ?self.mount_point, "Confirming unmount of FUSE filesystem...");

            for i in 0..UMOUNT_ATTEMPT_COUNT {
                let result = {
                    #[cfg(target_os = "macos")]
                    {
                        nix::mount::unmount(&self.mount_point, nix::mount::MntFlags::MNT_FORCE)
                    }

                    #[cfg(target_os = "linux")]
                    {
                        nix::mount::umount2(&self.mount_point, nix::mount::MntFlags::MNT_DETACH)
                    }
                };

                match result {
                    Ok(()) => {
                        debug!(
                            "Successfully unmounted FUSE filesystem on attempt {}",
                            i + 1
                        );
                        break;
                    }
                    Err(Errno::EBUSY) => {
                        debug!(
                            "FUSE filesystem still busy on attempt {}. Retrying...",
                            i + 1
                        );
                        std::thread::sleep(UMOUNT_ATTEMPT_DELAY);
                    }
                    Err(Errno::EINVAL | Errno::ENOENT) => {
                        debug!("FUSE filesystem already unmounted (attempt {})", i + 1);
                        break;
                    }
                    Err(e) => {
                        error!(
                            "Failed to unmount FUSE filesystem on attempt {}: {}",
                            i + 1,
                            e
                        );
                        break;
                    }
                }
            }
        }
    }
}

/// Prepares the mount point directory.
///
/// - If the directory exists and is non-empty, returns an error.
/// - If the directory does not exist, creates it (including parents) and logs an info message.
/// - If the directory exists and is empty, does nothing.
async fn prepare_mount_point(mount_point: &std::path::Path) -> Result<(), std::io::Error> {
    match tokio::fs::read_dir(mount_point).await {
        Ok(mut entries) => {
            if entries.next_entry().await?.is_some() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    format!(
                        "Mount point '{}' already exists and is not empty.",
                        mount_point.display()
                    ),
                ));
            }
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tokio::fs::create_dir_all(mount_point).await?;
            info!(path = %mount_point.display(), "Created mount point directory.");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

async fn wait_for_exit() -> Result<(), std::io::Error> {
    use tokio::signal;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    let mut sighup = signal::unix::signal(signal::unix::SignalKind::hangup())?;
    select! {
        _ = signal::ctrl_c() => {
            debug!("Received Ctrl+C signal, shutting down...");
        },
        _ = sigterm.recv() => {
            debug!("Received termination signal, shutting down...");
        },
        _ = sighup.recv() => {
            debug!("Received hangup signal, shutting down...");
        },
    }
    Ok(())
}

/// Main entry point for the daemon.
pub async fn run(config: MountConfig) -> Result<(), std::io::Error> {
    prepare_mount_point(&config.mount_point).await?;

    info!("Mounting filesystem at {}.", config.mount_point.display());

    let fuse = managed_fuse::ManagedFuse::new(&config);
    {
        let _session = fuse.spawn(&config)?;
        info!("sftp-fs is running. Press Ctrl+C to stop.");

        wait_for_exit().await?;
    }
    Ok(())
}

pub fn spawn(config: MountConfig) -> Result<(), std::io::Error> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(config))
}
