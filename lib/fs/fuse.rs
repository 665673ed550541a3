//! Bridges the kernel filesystem interface onto the driver.
//!
//! The adapter owns the one process-wide lock: every callback acquires it,
//! runs the driver operation to completion (remote round trips included), and
//! releases it before replying. Kernel-side concurrency therefore serializes
//! here and the driver below stays single-threaded.

use std::ffi::OsStr;
use std::time::SystemTime;

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, ReplyXattr, Request, TimeOrNow,
};
use parking_lot::Mutex;
use tracing::warn;

use crate::fs::driver::{ATTR_TTL, BLOCK_SIZE, EntryOut, SetAttrRequest, SftpFs};
use crate::fs::inode::{Ino, NodeKind, PENDING_INO};
use crate::sftp::SftpBackend;

/// Substitute inode number reported for directory entries that were never
/// individually looked up. Readdir callers skip entries whose inode is zero,
/// so the placeholder sentinel cannot go over the wire as-is.
const UNKNOWN_DIRENT_INO: u64 = u64::MAX;

pub struct FuseAdapter<B: SftpBackend> {
    fs: Mutex<SftpFs<B>>,
}

impl<B: SftpBackend> FuseAdapter<B> {
    pub fn new(fs: SftpFs<B>) -> Self {
        Self { fs: Mutex::new(fs) }
    }
}

fn file_attr(entry: &EntryOut) -> FileAttr {
    let kind = match entry.kind {
        NodeKind::File => FileType::RegularFile,
        NodeKind::Directory => FileType::Directory,
    };
    FileAttr {
        ino: entry.ino,
        size: entry.attrs.size,
        blocks: entry.attrs.size.div_ceil(512),
        atime: entry.attrs.atime,
        mtime: entry.attrs.mtime,
        ctime: entry.attrs.ctime,
        crtime: entry.attrs.crtime,
        kind,
        perm: entry.attrs.perm,
        nlink: entry.attrs.nlink,
        uid: entry.attrs.uid,
        gid: entry.attrs.gid,
        rdev: 0,
        blksize: BLOCK_SIZE,
        flags: 0,
    }
}

fn resolve_time(t: TimeOrNow) -> SystemTime {
    match t {
        TimeOrNow::SpecificTime(t) => t,
        TimeOrNow::Now => SystemTime::now(),
    }
}

impl<B: SftpBackend> Filesystem for FuseAdapter<B> {
    fn lookup(&mut self, _req: &Request<'_>, parent: Ino, name: &OsStr, reply: ReplyEntry) {
        // Names this store can hold are valid UTF-8; anything else cannot
        // exist remotely.
        let Some(name) = name.to_str() else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.fs.lock().lookup(parent, name) {
            Ok(entry) => reply.entry(&ATTR_TTL, &file_attr(&entry), 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn forget(&mut self, _req: &Request<'_>, ino: Ino, nlookup: u64) {
        if let Err(e) = self.fs.lock().forget(ino, nlookup) {
            warn!(ino, error = %e, "deferred remote delete failed");
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: Ino, _fh: Option<u64>, reply: ReplyAttr) {
        match self.fs.lock().getattr(ino) {
            Ok(entry) => reply.attr(&ATTR_TTL, &file_attr(&entry)),
            Err(e) => reply.error(e.errno()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: Ino,
        mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let req = SetAttrRequest {
            size,
            mode,
            atime: atime.map(resolve_time),
            mtime: mtime.map(resolve_time),
        };
        match self.fs.lock().setattr(ino, &req) {
            Ok(entry) => reply.attr(&ATTR_TTL, &file_attr(&entry)),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn mknod(
        &mut self,
        _req: &Request<'_>,
        _parent: Ino,
        _name: &OsStr,
        _mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: ReplyEntry,
    ) {
        reply.error(libc::ENOSYS);
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: Ino,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        match self.fs.lock().mkdir(parent, name, mode) {
            Ok(entry) => reply.entry(&ATTR_TTL, &file_attr(&entry), 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: Ino, name: &OsStr, reply: ReplyEmpty) {
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        match self.fs.lock().unlink(parent, name) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: Ino, name: &OsStr, reply: ReplyEmpty) {
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        match self.fs.lock().rmdir(parent, name) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn symlink(
        &mut self,
        _req: &Request<'_>,
        _parent: Ino,
        _link_name: &OsStr,
        _target: &std::path::Path,
        reply: ReplyEntry,
    ) {
        reply.error(libc::ENOSYS);
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        _parent: Ino,
        _name: &OsStr,
        _newparent: Ino,
        _newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        reply.error(libc::ENOSYS);
    }

    fn link(
        &mut self,
        _req: &Request<'_>,
        _ino: Ino,
        _newparent: Ino,
        _newname: &OsStr,
        reply: ReplyEntry,
    ) {
        reply.error(libc::ENOSYS);
    }

    fn open(&mut self, _req: &Request<'_>, ino: Ino, _flags: i32, reply: ReplyOpen) {
        match self.fs.lock().open(ino) {
            Ok(fh) => reply.opened(fh, 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: Ino,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Ok(offset) = u64::try_from(offset) else {
            reply.error(libc::EINVAL);
            return;
        };
        match self.fs.lock().read(ino, fh, offset, size) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e.errno()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: Ino,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let Ok(offset) = u64::try_from(offset) else {
            reply.error(libc::EINVAL);
            return;
        };
        match self.fs.lock().write(ino, fh, offset, data) {
            Ok(written) => reply.written(written),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn flush(&mut self, _req: &Request<'_>, _ino: Ino, _fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        // Writes go straight to the remote; there is nothing buffered to push.
        reply.ok();
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: Ino,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        match self.fs.lock().release(fh) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn fsync(&mut self, _req: &Request<'_>, _ino: Ino, _fh: u64, _datasync: bool, reply: ReplyEmpty) {
        reply.ok();
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: Ino, _flags: i32, reply: ReplyOpen) {
        match self.fs.lock().opendir(ino) {
            Ok(fh) => reply.opened(fh, 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: Ino,
        fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let Ok(offset) = u64::try_from(offset) else {
            reply.error(libc::EINVAL);
            return;
        };
        let mut fs = self.fs.lock();
        match fs.readdir(ino, fh, offset) {
            Ok(entries) => {
                for (i, entry) in entries.iter().enumerate() {
                    let d_ino = if entry.ino == PENDING_INO {
                        UNKNOWN_DIRENT_INO
                    } else {
                        entry.ino
                    };
                    let kind = match entry.kind {
                        NodeKind::File => FileType::RegularFile,
                        NodeKind::Directory => FileType::Directory,
                    };
                    let next = offset + i as u64 + 1;
                    if reply.add(d_ino, next as i64, kind, &entry.name) {
                        break;
                    }
                }
                reply.ok();
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn releasedir(&mut self, _req: &Request<'_>, _ino: Ino, fh: u64, _flags: i32, reply: ReplyEmpty) {
        match self.fs.lock().releasedir(fh) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: Ino, reply: ReplyStatfs) {
        let out = self.fs.lock().statfs();
        reply.statfs(
            out.blocks,
            out.blocks_free,
            out.blocks_available,
            out.inodes,
            out.inodes_free,
            out.block_size,
            out.max_name_len,
            out.fragment_size,
        );
    }

    fn setxattr(
        &mut self,
        _req: &Request<'_>,
        _ino: Ino,
        _name: &OsStr,
        _value: &[u8],
        _flags: i32,
        _position: u32,
        reply: ReplyEmpty,
    ) {
        reply.error(libc::ENOSYS);
    }

    fn getxattr(
        &mut self,
        _req: &Request<'_>,
        _ino: Ino,
        _name: &OsStr,
        _size: u32,
        reply: ReplyXattr,
    ) {
        reply.error(libc::ENOSYS);
    }

    fn listxattr(&mut self, _req: &Request<'_>, _ino: Ino, _size: u32, reply: ReplyXattr) {
        reply.error(libc::ENOSYS);
    }

    fn removexattr(&mut self, _req: &Request<'_>, _ino: Ino, _name: &OsStr, reply: ReplyEmpty) {
        reply.error(libc::ENOSYS);
    }

    #[allow(clippy::too_many_arguments)]
    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: Ino,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        match self.fs.lock().create(parent, name, mode) {
            Ok((entry, fh)) => reply.created(&ATTR_TTL, &file_attr(&entry), 0, fh, 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn fallocate(
        &mut self,
        _req: &Request<'_>,
        _ino: Ino,
        _fh: u64,
        _offset: i64,
        _length: i64,
        _mode: i32,
        reply: ReplyEmpty,
    ) {
        reply.error(libc::ENOSYS);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::inode::InodeAttrs;

    #[test]
    fn attr_conversion_reports_the_advertised_block_size() {
        let now = SystemTime::now();
        let entry = EntryOut {
            ino: 7,
            kind: NodeKind::File,
            attrs: InodeAttrs {
                size: 1 << 18,
                nlink: 1,
                perm: 0o644,
                uid: 1000,
                gid: 1000,
                atime: now,
                mtime: now,
                ctime: now,
                crtime: now,
            },
        };

        let attr = file_attr(&entry);
        assert_eq!(attr.blksize, BLOCK_SIZE);
        assert_eq!(attr.kind, FileType::RegularFile);
        assert_eq!(attr.blocks, (1 << 18) / 512);
        assert_eq!(attr.perm, 0o644);
    }
}
