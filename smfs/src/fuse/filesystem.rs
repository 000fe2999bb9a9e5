//! `fuser::Filesystem` implementation.
//!
//! Thin dispatch layer: every kernel request is pushed onto the tokio
//! blocking pool with its reply object moved in, so many handlers run
//! concurrently and a stream read blocked on its pipe never stalls the
//! FUSE session loop.

use std::ffi::OsStr;
use std::time::{Duration, SystemTime};

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry,
    ReplyOpen, ReplyWrite, ReplyXattr, Request, TimeOrNow,
};
use std::sync::Arc;
use tokio::runtime::Handle;

use crate::ops::{AttrKind, AttrView, FsOps, SetattrRequest};

/// Time-to-live for cached attributes and entries.
const TTL: Duration = Duration::from_secs(1);

const BLOCK_SIZE: u32 = 512;

pub struct SmfsFilesystem {
    ops: Arc<FsOps>,
    runtime: Handle,
}

impl SmfsFilesystem {
    pub fn new(ops: Arc<FsOps>, runtime: Handle) -> Self {
        Self { ops, runtime }
    }
}

fn to_fuse_attr(view: &AttrView) -> FileAttr {
    FileAttr {
        ino: view.ino,
        size: view.size,
        blocks: view.size.div_ceil(u64::from(BLOCK_SIZE)),
        atime: view.mtime,
        mtime: view.mtime,
        ctime: view.mtime,
        crtime: view.mtime,
        kind: match view.kind {
            AttrKind::Directory => FileType::Directory,
            AttrKind::Regular => FileType::RegularFile,
        },
        perm: view.perm,
        nlink: view.nlink,
        uid: view.uid,
        gid: view.gid,
        rdev: 0,
        blksize: BLOCK_SIZE,
        flags: 0,
    }
}

impl Filesystem for SmfsFilesystem {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let ops = Arc::clone(&self.ops);
        let name = name.to_string_lossy().into_owned();
        self.runtime.spawn_blocking(move || match ops.lookup(parent, &name) {
            Ok(entry) => reply.entry(&TTL, &to_fuse_attr(&entry.attr), 0),
            Err(e) => reply.error(e.errno()),
        });
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        let ops = Arc::clone(&self.ops);
        self.runtime.spawn_blocking(move || match ops.getattr(ino) {
            Ok(attr) => reply.attr(&TTL, &to_fuse_attr(&attr)),
            Err(e) => reply.error(e.errno()),
        });
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        _size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let ops = Arc::clone(&self.ops);
        let request = SetattrRequest { mode, uid, gid };
        self.runtime
            .spawn_blocking(move || match ops.setattr(ino, &request) {
                Ok(attr) => reply.attr(&TTL, &to_fuse_attr(&attr)),
                Err(e) => reply.error(e.errno()),
            });
    }

    fn mknod(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: ReplyEntry,
    ) {
        let ops = Arc::clone(&self.ops);
        let name = name.to_string_lossy().into_owned();
        self.runtime
            .spawn_blocking(move || match ops.mknod(parent, &name, mode) {
                Ok(entry) => reply.entry(&TTL, &to_fuse_attr(&entry.attr), 0),
                Err(e) => reply.error(e.errno()),
            });
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let ops = Arc::clone(&self.ops);
        self.runtime.spawn_blocking(move || match ops.open(ino) {
            Ok(fh) => reply.opened(fh, 0),
            Err(e) => reply.error(e.errno()),
        });
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let ops = Arc::clone(&self.ops);
        self.runtime
            .spawn_blocking(move || match ops.read(fh, size, offset) {
                Ok(data) => reply.data(&data),
                Err(e) => reply.error(e.errno()),
            });
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let ops = Arc::clone(&self.ops);
        let data = data.to_vec();
        self.runtime
            .spawn_blocking(move || match ops.write(fh, &data, offset) {
                Ok(written) => reply.written(written),
                Err(e) => reply.error(e.errno()),
            });
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        let ops = Arc::clone(&self.ops);
        self.runtime.spawn_blocking(move || {
            ops.release(fh);
            reply.ok();
        });
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let ops = Arc::clone(&self.ops);
        self.runtime.spawn_blocking(move || match ops.opendir(ino) {
            Ok(fh) => reply.opened(fh, 0),
            Err(e) => reply.error(e.errno()),
        });
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let ops = Arc::clone(&self.ops);
        self.runtime
            .spawn_blocking(move || match ops.readdir(ino, offset) {
                Ok(entries) => {
                    for (index, entry) in entries.iter().enumerate() {
                        let kind = match entry.kind {
                            AttrKind::Directory => FileType::Directory,
                            AttrKind::Regular => FileType::RegularFile,
                        };
                        let next_offset = offset + index as i64 + 1;
                        if reply.add(entry.ino, next_offset, kind, &entry.name) {
                            break;
                        }
                    }
                    reply.ok();
                }
                Err(e) => reply.error(e.errno()),
            });
    }

    fn releasedir(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        reply: ReplyEmpty,
    ) {
        self.ops.releasedir(fh);
        reply.ok();
    }

    fn getxattr(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _name: &OsStr,
        _size: u32,
        reply: ReplyXattr,
    ) {
        reply.error(libc::ENOTSUP);
    }
}
