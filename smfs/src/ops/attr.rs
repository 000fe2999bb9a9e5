//! Attribute views returned to the FUSE host.

use std::fs::Metadata;
use std::os::unix::fs::MetadataExt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::catalog::UserNode;

/// File kind as reported to the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrKind {
    Directory,
    Regular,
}

/// Host-agnostic file attributes.
#[derive(Debug, Clone)]
pub struct AttrView {
    pub ino: u64,
    pub kind: AttrKind,
    pub perm: u16,
    pub nlink: u32,
    pub size: u64,
    pub uid: u32,
    pub gid: u32,
    pub mtime: SystemTime,
}

/// Size reported for live remote files; their actual length is unbounded.
pub const REMOTE_FILE_SIZE: u64 = i64::MAX as u64;

pub fn directory(ino: u64, uid: u32, gid: u32) -> AttrView {
    AttrView {
        ino,
        kind: AttrKind::Directory,
        perm: 0o755,
        nlink: 2,
        size: 0,
        uid,
        gid,
        mtime: SystemTime::now(),
    }
}

pub fn remote_file(ino: u64, uid: u32, gid: u32) -> AttrView {
    AttrView {
        ino,
        kind: AttrKind::Regular,
        perm: 0o444,
        nlink: 1,
        size: REMOTE_FILE_SIZE,
        uid,
        gid,
        mtime: SystemTime::now(),
    }
}

pub fn user_file(ino: u64, node: &UserNode, size: u64) -> AttrView {
    AttrView {
        ino,
        kind: AttrKind::Regular,
        perm: node.mode,
        nlink: 1,
        size,
        uid: node.uid,
        gid: node.gid,
        mtime: SystemTime::now(),
    }
}

pub fn from_metadata(ino: u64, meta: &Metadata) -> AttrView {
    AttrView {
        ino,
        kind: if meta.is_dir() {
            AttrKind::Directory
        } else {
            AttrKind::Regular
        },
        perm: (meta.mode() & 0o7777) as u16,
        nlink: meta.nlink() as u32,
        size: meta.len(),
        uid: meta.uid(),
        gid: meta.gid(),
        mtime: meta.modified().unwrap_or(UNIX_EPOCH),
    }
}

/// Effective uid/gid of this process; reported as the owner of remote
/// nodes and directories.
pub fn process_owner() -> (u32, u32) {
    // SAFETY: geteuid/getegid cannot fail and take no pointers
    unsafe { (libc::geteuid(), libc::getegid()) }
}
