//! Filesystem operation handlers.
//!
//! [`FsOps`] translates kernel requests into catalog lookups, stream
//! reads, and cache-directory I/O. It is host-agnostic: every handler
//! takes plain arguments and returns a typed `Result`, which keeps the
//! whole engine testable in-process; the FUSE adapter maps results onto
//! reply callbacks and errors onto errnos.
//!
//! Handlers never hold the catalog lock across HTTP I/O or pipe reads;
//! they take owned node views and stream handles out of the catalog
//! first.

pub mod attr;
pub mod handle;

use std::io;
use std::os::unix::fs::MetadataExt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::catalog::{path, Backing, Catalog, NodeKind, NodeView, UserNode, ROOT_INODE};
use crate::error::FsError;
use crate::shutdown::ShutdownFlag;
use crate::storage::CacheDir;
use crate::stream::{self, StreamingClient};

pub use attr::{AttrKind, AttrView};
pub use handle::{HandleTable, OpenHandle};

/// Delay between empty polls of a stream pipe.
const STREAM_READ_RETRY: Duration = Duration::from_millis(50);

/// Result of `lookup`/`mknod`.
#[derive(Debug, Clone)]
pub struct EntryOut {
    pub attr: AttrView,
}

/// One `readdir` entry.
#[derive(Debug, Clone)]
pub struct DirEntryOut {
    pub ino: u64,
    pub name: String,
    pub kind: AttrKind,
}

/// Attribute changes requested by `setattr`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetattrRequest {
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

pub struct FsOps {
    catalog: Arc<Catalog>,
    storage: CacheDir,
    client: Arc<dyn StreamingClient>,
    shutdown: ShutdownFlag,
    handles: HandleTable,
    pipe_capacity: usize,
    owner_uid: u32,
    owner_gid: u32,
}

impl FsOps {
    pub fn new(
        catalog: Arc<Catalog>,
        storage: CacheDir,
        client: Arc<dyn StreamingClient>,
        shutdown: ShutdownFlag,
    ) -> Self {
        let (owner_uid, owner_gid) = attr::process_owner();
        Self {
            catalog,
            storage,
            client,
            shutdown,
            handles: HandleTable::new(),
            pipe_capacity: crate::pipe::DEFAULT_CAPACITY,
            owner_uid,
            owner_gid,
        }
    }

    pub fn with_pipe_capacity(mut self, capacity: usize) -> Self {
        self.pipe_capacity = capacity;
        self
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Resolve `name` under the parent inode.
    ///
    /// Misses fall through to a cache-directory `stat`, so files created
    /// under the cache root out-of-band become visible on first lookup.
    pub fn lookup(&self, parent: u64, name: &str) -> Result<EntryOut, FsError> {
        let parent_path = self.catalog.path_of(parent).ok_or(FsError::NotFound)?;
        let full = path::join(&parent_path, name)?;

        if let Some((ino, view)) = self.catalog.lookup(&full)? {
            let attr = self.view_attr(ino, &full, &view)?;
            return Ok(EntryOut { attr });
        }

        self.adopt_cache_entry(&full)
    }

    /// Attribute read by inode. Falls back to the cache directory like
    /// `lookup` does.
    pub fn getattr(&self, ino: u64) -> Result<AttrView, FsError> {
        if ino == ROOT_INODE {
            return Ok(attr::directory(ROOT_INODE, self.owner_uid, self.owner_gid));
        }
        let full = self.catalog.path_of(ino).ok_or(FsError::NotFound)?;
        if let Some((ino, view)) = self.catalog.lookup(&full)? {
            return self.view_attr(ino, &full, &view);
        }
        self.adopt_cache_entry(&full).map(|entry| entry.attr)
    }

    /// Full listing at offset 0; any positive offset means EOF.
    ///
    /// The host is expected to size its buffer to the directory; listings
    /// are not paged.
    pub fn readdir(&self, ino: u64, offset: i64) -> Result<Vec<DirEntryOut>, FsError> {
        if offset > 0 {
            return Ok(Vec::new());
        }
        let full = self.catalog.path_of(ino).ok_or(FsError::NotFound)?;
        let parent_ino = match path::parent_of(&full) {
            Some(parent) => self.catalog.inode_of(parent)?,
            None => ROOT_INODE,
        };

        let mut out = vec![
            DirEntryOut {
                ino,
                name: ".".to_string(),
                kind: AttrKind::Directory,
            },
            DirEntryOut {
                ino: parent_ino,
                name: "..".to_string(),
                kind: AttrKind::Directory,
            },
        ];
        for (name, kind, child_ino) in self.catalog.children_of(&full)? {
            out.push(DirEntryOut {
                ino: child_ino,
                name,
                kind: match kind {
                    NodeKind::Directory => AttrKind::Directory,
                    _ => AttrKind::Regular,
                },
            });
        }
        Ok(out)
    }

    /// Open an inode, starting the stream session for `.ts` files.
    pub fn open(&self, ino: u64) -> Result<u64, FsError> {
        if self.shutdown.is_set() {
            return Err(FsError::ShuttingDown);
        }
        let full = self.catalog.path_of(ino).ok_or(FsError::NotFound)?;
        let (_, view) = self.catalog.lookup(&full)?.ok_or(FsError::NotFound)?;

        match view {
            NodeView::Directory => Err(FsError::IsDirectory),
            NodeView::Remote { .. } if path::suffix_of(&full) == Some("ts") => {
                let session_id = self.catalog.open_stream(
                    &full,
                    &self.client,
                    &self.shutdown,
                    self.pipe_capacity,
                )?;
                Ok(self.handles.insert(OpenHandle {
                    path: full,
                    session: Some(session_id),
                }))
            }
            _ => Ok(self.handles.insert(OpenHandle {
                path: full,
                session: None,
            })),
        }
    }

    /// Read through an open handle.
    pub fn read(&self, fh: u64, size: u32, offset: i64) -> Result<Vec<u8>, FsError> {
        let handle = self.handles.get(fh).ok_or(FsError::NotFound)?;
        let (_, view) = self
            .catalog
            .lookup(&handle.path)?
            .ok_or(FsError::NotFound)?;
        let size = size as usize;

        match view {
            NodeView::Directory => Err(FsError::IsDirectory),
            NodeView::Remote { url, .. } => self.read_remote(&handle.path, &url, size, offset),
            NodeView::User(user) => self.read_user(&handle.path, &user, size, offset),
        }
    }

    fn read_remote(
        &self,
        full: &str,
        url: &str,
        size: usize,
        offset: i64,
    ) -> Result<Vec<u8>, FsError> {
        match path::suffix_of(full) {
            // streaming-only: the offset is intentionally ignored
            Some("ts") => self.read_stream(full, size),
            Some("strm") => {
                let bytes = url.as_bytes();
                let offset = offset.max(0) as usize;
                if offset >= bytes.len() {
                    return Ok(Vec::new());
                }
                let end = bytes.len().min(offset + size);
                Ok(bytes[offset..end].to_vec())
            }
            Some("xml") => self.read_fetched(&format!("{url}.xml"), size, offset),
            Some("m3u") => self.read_fetched(&format!("{url}.m3u"), size, offset),
            _ => Err(FsError::Invalid),
        }
    }

    fn read_stream(&self, full: &str, size: usize) -> Result<Vec<u8>, FsError> {
        let stream = self.catalog.stream_handle(full)?;
        let mut buf = vec![0u8; size];
        loop {
            if self.shutdown.is_set() {
                return Ok(Vec::new());
            }
            let n = stream.read_stream(&mut buf);
            if n > 0 {
                buf.truncate(n);
                return Ok(buf);
            }
            if stream.is_stopped() || self.shutdown.is_set() {
                return Ok(Vec::new());
            }
            thread::sleep(STREAM_READ_RETRY);
        }
    }

    fn read_fetched(&self, url: &str, size: usize, offset: i64) -> Result<Vec<u8>, FsError> {
        let mut buf = vec![0u8; size];
        let n = stream::fetch_url_range(self.client.as_ref(), url, &mut buf, offset.max(0) as u64)?;
        buf.truncate(n);
        Ok(buf)
    }

    fn read_user(
        &self,
        full: &str,
        user: &UserNode,
        size: usize,
        offset: i64,
    ) -> Result<Vec<u8>, FsError> {
        let offset = offset.max(0) as usize;
        match &user.backing {
            Backing::InMemory(data) => {
                if offset >= data.len() {
                    return Ok(Vec::new());
                }
                let end = data.len().min(offset + size);
                Ok(data[offset..end].to_vec())
            }
            Backing::CacheBacked(_) => {
                let mut buf = vec![0u8; size];
                let n = self.storage.read_at(full, &mut buf, offset as u64)?;
                buf.truncate(n);
                Ok(buf)
            }
        }
    }

    /// Write through an open handle. Only user files are writable.
    pub fn write(&self, fh: u64, data: &[u8], offset: i64) -> Result<u32, FsError> {
        if self.shutdown.is_set() {
            return Err(FsError::ShuttingDown);
        }
        let handle = self.handles.get(fh).ok_or(FsError::NotFound)?;
        let (_, view) = self
            .catalog
            .lookup(&handle.path)?
            .ok_or(FsError::NotFound)?;

        match view {
            NodeView::Directory => Err(FsError::IsDirectory),
            NodeView::Remote { .. } => Err(FsError::PermissionDenied),
            NodeView::User(user) => match user.backing {
                Backing::CacheBacked(_) => {
                    let n = self.storage.write_at(&handle.path, data, offset.max(0) as u64)?;
                    Ok(n as u32)
                }
                Backing::InMemory(_) => {
                    let offset = offset.max(0) as usize;
                    let len = data.len();
                    self.catalog.with_user_node_mut(&handle.path, |node| {
                        if let Backing::InMemory(buf) = &mut node.backing {
                            if buf.len() < offset + len {
                                buf.resize(offset + len, 0);
                            }
                            buf[offset..offset + len].copy_from_slice(data);
                        }
                    })?;
                    Ok(len as u32)
                }
            },
        }
    }

    /// Close a handle. For stream handles the session's reader count is
    /// decremented; when it reaches zero the session is detached and
    /// drained on a separate thread, so release never blocks.
    pub fn release(&self, fh: u64) {
        let Some(handle) = self.handles.remove(fh) else {
            return;
        };
        if let Some(session_id) = handle.session {
            if let Some(session) = self.catalog.release_stream(&handle.path, session_id) {
                debug!(path = %handle.path, "last reader gone, draining session");
                session.stop();
                thread::spawn(move || drop(session));
            }
        }
    }

    /// Apply mode/owner changes. Remote files accept the request but echo
    /// their canonical attributes, which keeps copy tools happy.
    pub fn setattr(&self, ino: u64, req: &SetattrRequest) -> Result<AttrView, FsError> {
        if ino == ROOT_INODE {
            return Ok(attr::directory(ROOT_INODE, self.owner_uid, self.owner_gid));
        }
        let full = self.catalog.path_of(ino).ok_or(FsError::NotFound)?;
        let (ino, view) = self.catalog.lookup(&full)?.ok_or(FsError::NotFound)?;

        match view {
            NodeView::User(user) => {
                if matches!(user.backing, Backing::CacheBacked(_)) {
                    if let Some(mode) = req.mode {
                        self.storage.set_mode(&full, mode & 0o7777)?;
                    }
                    if req.uid.is_some() || req.gid.is_some() {
                        self.storage.set_owner(&full, req.uid, req.gid)?;
                    }
                }
                let updated = self.catalog.with_user_node_mut(&full, |node| {
                    if let Some(mode) = req.mode {
                        node.mode = (mode & 0o7777) as u16;
                    }
                    if let Some(uid) = req.uid {
                        node.uid = uid;
                    }
                    if let Some(gid) = req.gid {
                        node.gid = gid;
                    }
                    node.clone()
                })?;
                self.view_attr(ino, &full, &NodeView::User(updated))
            }
            view => self.view_attr(ino, &full, &view),
        }
    }

    /// Create a user file under the cache directory.
    pub fn mknod(&self, parent: u64, name: &str, mode: u32) -> Result<EntryOut, FsError> {
        if self.shutdown.is_set() {
            return Err(FsError::ShuttingDown);
        }
        let parent_path = self.catalog.path_of(parent).ok_or(FsError::NotFound)?;
        let full = path::join(&parent_path, name)?;
        if self.catalog.contains(&full)? {
            return Err(FsError::Exists);
        }

        let meta = match self.storage.create_exclusive(&full, mode & 0o7777) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Err(FsError::Exists),
            Err(e) => return Err(e.into()),
        };

        self.catalog.insert_user_file(
            &full,
            UserNode {
                mode: (mode & 0o7777) as u16,
                uid: meta.uid(),
                gid: meta.gid(),
                backing: Backing::CacheBacked(self.storage.host_path(&full)),
            },
        )?;
        let ino = self.catalog.inode_of(&full)?;
        Ok(EntryOut {
            attr: attr::from_metadata(ino, &meta),
        })
    }

    /// Directory opens carry no state; the kernel gets handle 0 back.
    pub fn opendir(&self, ino: u64) -> Result<u64, FsError> {
        if self.catalog.path_of(ino).is_none() {
            return Err(FsError::NotFound);
        }
        Ok(0)
    }

    pub fn releasedir(&self, _fh: u64) {}

    /// Extended attributes are not implemented.
    pub fn getxattr(&self) -> Result<(), FsError> {
        Err(FsError::NotSupported)
    }

    fn view_attr(&self, ino: u64, full: &str, view: &NodeView) -> Result<AttrView, FsError> {
        Ok(match view {
            NodeView::Directory => attr::directory(ino, self.owner_uid, self.owner_gid),
            NodeView::Remote { .. } => attr::remote_file(ino, self.owner_uid, self.owner_gid),
            NodeView::User(user) => {
                let size = match &user.backing {
                    Backing::InMemory(data) => data.len() as u64,
                    Backing::CacheBacked(_) => {
                        self.storage.stat(full).map(|m| m.len()).unwrap_or(0)
                    }
                };
                attr::user_file(ino, user, size)
            }
        })
    }

    /// Register a path found on disk under the cache directory but not in
    /// the catalog yet.
    fn adopt_cache_entry(&self, full: &str) -> Result<EntryOut, FsError> {
        let meta = match self.storage.stat(full) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(FsError::NotFound),
            Err(e) => {
                warn!(path = %full, error = %e, "cache directory stat failed");
                return Err(e.into());
            }
        };

        if meta.is_dir() {
            self.catalog.insert_directory(full)?;
        } else {
            self.catalog.insert_user_file(
                full,
                UserNode {
                    mode: (meta.mode() & 0o7777) as u16,
                    uid: meta.uid(),
                    gid: meta.gid(),
                    backing: Backing::CacheBacked(self.storage.host_path(full)),
                },
            )?;
        }
        let ino = self.catalog.inode_of(full)?;
        debug!(path = %full, ino, "adopted cache directory entry");
        Ok(EntryOut {
            attr: attr::from_metadata(ino, &meta),
        })
    }
}
