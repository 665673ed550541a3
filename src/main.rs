//! Mount a remote SFTP directory as a local filesystem.
use std::path::PathBuf;

use clap::Parser;
use secrecy::SecretString;
use tracing::error;

mod daemon;
mod trc;

use crate::daemon::MountConfig;
use crate::trc::Trc;
use sftp_fs::sftp::SshCredentials;

/// Environment variable consulted for the SSH user name.
const ENV_USERNAME: &str = "SFTPFS_USERNAME";
/// Environment variable consulted for the SSH password.
const ENV_PASSWORD: &str = "SFTPFS_PASSWORD";

#[derive(Parser)]
#[command(version, about = "Mount a remote SFTP directory as a local filesystem.")]
struct Args {
    #[arg(
        short,
        long,
        default_value = "/tmp/mnt",
        help = "Directory to mount the filesystem at."
    )]
    mountpoint: PathBuf,

    #[arg(short, long, help = "SSH server host name or address.")]
    server: String,

    #[arg(long, default_value_t = 22, help = "SSH server port.")]
    port: u16,

    #[arg(
        short,
        long,
        help = "SSH user name. Falls back to SFTPFS_USERNAME, then to a prompt."
    )]
    username: Option<String>,

    #[arg(
        short = 'p',
        long,
        help = "Prompt for the SSH password even when SFTPFS_PASSWORD is set."
    )]
    password_prompt: bool,
}

fn resolve_credentials(args: &Args) -> Result<SshCredentials, inquire::InquireError> {
    let username = match args.username.clone().or_else(|| std::env::var(ENV_USERNAME).ok()) {
        Some(u) => u,
        None => inquire::Text::new("SSH user name:").prompt()?,
    };
    let password = match std::env::var(ENV_PASSWORD) {
        Ok(p) if !args.password_prompt => p,
        _ => inquire::Password::new("SSH password:")
            .without_confirmation()
            .prompt()?,
    };
    Ok(SshCredentials {
        username,
        password: SecretString::from(password),
    })
}

fn main() {
    let args = Args::parse();

    Trc::default().init();

    // Credentials are gathered before anything touches the network so the
    // prompt never interleaves with log output.
    let credentials = resolve_credentials(&args).unwrap_or_else(|e| {
        eprintln!("Failed to read credentials: {e}");
        std::process::exit(1);
    });

    let config = MountConfig {
        mount_point: args.mountpoint,
        host: args.server,
        port: args.port,
        credentials,
    };

    if let Err(e) = daemon::spawn(config) {
        error!("{e}");
        std::process::exit(1);
    }
}
