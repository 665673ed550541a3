//! ssh2-backed implementation of the backend trait.

use std::io::{Read as _, Seek as _, SeekFrom, Write as _};
use std::net::TcpStream;
use std::path::Path;
use std::time::{Duration, SystemTime};

use secrecy::{ExposeSecret as _, SecretString};
use ssh2::{OpenFlags, OpenType, Session, Sftp};
use tracing::info;

use super::{BackendError, RemoteDirEntry, RemoteFile, SftpBackend};

impl From<ssh2::Error> for BackendError {
    fn from(e: ssh2::Error) -> Self {
        Self::new(e)
    }
}

pub struct SshCredentials {
    pub username: String,
    pub password: SecretString,
}

/// A password-authenticated SSH session with its SFTP channel.
pub struct Ssh2Backend {
    sftp: Sftp,
    // The sftp channel is only valid while the session lives.
    _session: Session,
}

impl Ssh2Backend {
    pub fn connect(
        host: &str,
        port: u16,
        credentials: &SshCredentials,
    ) -> Result<Self, BackendError> {
        let tcp = TcpStream::connect((host, port))?;
        let mut session = Session::new()?;
        session.set_tcp_stream(tcp);
        session.handshake()?;
        session.userauth_password(
            &credentials.username,
            credentials.password.expose_secret(),
        )?;
        if !session.authenticated() {
            return Err(BackendError::new("ssh authentication rejected"));
        }
        let sftp = session.sftp()?;
        info!(host, port, user = %credentials.username, "sftp session established");
        Ok(Self {
            sftp,
            _session: session,
        })
    }
}

impl SftpBackend for Ssh2Backend {
    type File = Ssh2File;

    fn getwd(&self) -> Result<String, BackendError> {
        let wd = self.sftp.realpath(Path::new("."))?;
        Ok(wd.to_string_lossy().into_owned())
    }

    fn read_dir(&self, path: &str) -> Result<Vec<RemoteDirEntry>, BackendError> {
        let listing = self.sftp.readdir(Path::new(path))?;
        Ok(listing
            .into_iter()
            .filter_map(|(entry_path, stat)| {
                let name = entry_path.file_name()?.to_string_lossy().into_owned();
                Some(RemoteDirEntry {
                    name,
                    size: stat.size.unwrap_or(0),
                    perm: (stat.perm.unwrap_or(0o644) & 0o7777) as u16,
                    is_dir: stat.is_dir(),
                    mtime: stat.mtime.map_or(SystemTime::UNIX_EPOCH, |secs| {
                        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
                    }),
                })
            })
            .collect())
    }

    fn open(&self, path: &str) -> Result<Self::File, BackendError> {
        let file = self.sftp.open_mode(
            Path::new(path),
            OpenFlags::READ | OpenFlags::WRITE,
            0o644,
            OpenType::File,
        )?;
        Ok(Ssh2File(file))
    }

    fn create(&self, path: &str) -> Result<Self::File, BackendError> {
        let file = self.sftp.open_mode(
            Path::new(path),
            OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
            0o644,
            OpenType::File,
        )?;
        Ok(Ssh2File(file))
    }

    fn mkdir(&self, path: &str, mode: u32) -> Result<(), BackendError> {
        self.sftp.mkdir(Path::new(path), mode as i32)?;
        Ok(())
    }

    fn remove_file(&self, path: &str) -> Result<(), BackendError> {
        self.sftp.unlink(Path::new(path))?;
        Ok(())
    }

    fn remove_dir(&self, path: &str) -> Result<(), BackendError> {
        self.sftp.rmdir(Path::new(path))?;
        Ok(())
    }
}

/// An open file on the SFTP channel.
pub struct Ssh2File(ssh2::File);

impl RemoteFile for Ssh2File {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, BackendError> {
        self.0.seek(SeekFrom::Start(offset))?;
        Ok(self.0.read(buf)?)
    }

    fn write_at(&mut self, data: &[u8], offset: u64) -> Result<usize, BackendError> {
        self.0.seek(SeekFrom::Start(offset))?;
        self.0.write_all(data)?;
        Ok(data.len())
    }

    fn close(&mut self) -> Result<(), BackendError> {
        // The descriptor itself is released when the handle is dropped.
        self.0.flush()?;
        Ok(())
    }
}
