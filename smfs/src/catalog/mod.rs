//! Path → node catalog with stable inode allocation.
//!
//! The catalog owns every virtual node, the path/inode bimaps, and the
//! snapshot-rebuild logic. One `RwLock` protects the whole structure;
//! callers hold it only across map mutations and attribute reads, never
//! across HTTP I/O or pipe reads. Sessions retired by a rebuild are
//! stopped and drained after the lock is released.

pub mod node;
pub mod path;
pub mod snapshot;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock};

use tracing::{debug, info, warn};

use crate::error::FsError;
use crate::shutdown::ShutdownFlag;
use crate::stream::{StreamHandle, StreamSession, StreamingClient};

pub use node::{Backing, NodeKind, NodeView, RemoteNode, UserNode, VirtualNode};
pub use snapshot::{CatalogSnapshot, SnapshotEntry};

/// Inode reserved for the catalog root by the FUSE host.
pub const ROOT_INODE: u64 = 1;

struct Inner {
    entries: BTreeMap<String, VirtualNode>,
    path_to_inode: HashMap<String, u64>,
    inode_to_path: HashMap<u64, String>,
    next_inode: u64,
    version: u64,
}

impl Inner {
    /// Inode for `path`, allocating on first request. Mappings are
    /// monotone: they survive entry removal so a reintroduced path keeps
    /// its inode.
    fn inode_of(&mut self, path: &str) -> u64 {
        if let Some(&ino) = self.path_to_inode.get(path) {
            return ino;
        }
        let ino = self.next_inode;
        self.next_inode += 1;
        self.path_to_inode.insert(path.to_string(), ino);
        self.inode_to_path.insert(ino, path.to_string());
        ino
    }
}

pub struct Catalog {
    inner: RwLock<Inner>,
    enabled_types: RwLock<HashSet<String>>,
}

impl Catalog {
    /// Create an empty catalog containing only the root directory.
    ///
    /// `enabled_types` is the set of file suffixes (without dot) exposed
    /// by directory listings; it is consulted at listing time, so it can
    /// be replaced while mounted.
    pub fn new(enabled_types: HashSet<String>) -> Self {
        let mut entries = BTreeMap::new();
        entries.insert("/".to_string(), VirtualNode::Directory);
        let mut path_to_inode = HashMap::new();
        path_to_inode.insert("/".to_string(), ROOT_INODE);
        let mut inode_to_path = HashMap::new();
        inode_to_path.insert(ROOT_INODE, "/".to_string());
        Self {
            inner: RwLock::new(Inner {
                entries,
                path_to_inode,
                inode_to_path,
                next_inode: ROOT_INODE + 1,
                version: 0,
            }),
            enabled_types: RwLock::new(enabled_types),
        }
    }

    /// Rebuild counter; incremented by every [`Catalog::apply_snapshot`].
    pub fn version(&self) -> u64 {
        self.inner.read().unwrap().version
    }

    pub fn enabled_types(&self) -> HashSet<String> {
        self.enabled_types.read().unwrap().clone()
    }

    pub fn set_enabled_types(&self, types: HashSet<String>) {
        *self.enabled_types.write().unwrap() = types;
    }

    /// Resolve a path to its inode and an owned node view.
    pub fn lookup(&self, raw: &str) -> Result<Option<(u64, NodeView)>, FsError> {
        let p = path::normalize(raw)?;
        let mut inner = self.inner.write().unwrap();
        match inner.entries.get(&p) {
            Some(entry) => {
                let view = entry.view();
                let ino = inner.inode_of(&p);
                Ok(Some((ino, view)))
            }
            None => Ok(None),
        }
    }

    /// Stable inode for `path`, allocated on first request.
    pub fn inode_of(&self, raw: &str) -> Result<u64, FsError> {
        let p = path::normalize(raw)?;
        Ok(self.inner.write().unwrap().inode_of(&p))
    }

    pub fn path_of(&self, inode: u64) -> Option<String> {
        self.inner.read().unwrap().inode_to_path.get(&inode).cloned()
    }

    pub fn contains(&self, raw: &str) -> Result<bool, FsError> {
        let p = path::normalize(raw)?;
        Ok(self.inner.read().unwrap().entries.contains_key(&p))
    }

    /// Direct children of a directory, filtered for listing.
    ///
    /// Directories always appear; files appear when their suffix is in
    /// `enabled_types`. The root lists everything so top-level groups are
    /// always reachable.
    pub fn children_of(&self, raw: &str) -> Result<Vec<(String, NodeKind, u64)>, FsError> {
        let p = path::normalize(raw)?;
        let enabled = self.enabled_types.read().unwrap().clone();
        let mut inner = self.inner.write().unwrap();

        match inner.entries.get(&p) {
            Some(VirtualNode::Directory) => {}
            Some(_) => return Err(FsError::NotDirectory),
            None => return Err(FsError::NotFound),
        }

        let mut children: Vec<(String, NodeKind, String)> = Vec::new();
        let prefix = if p == "/" { "/".to_string() } else { format!("{p}/") };
        for (entry_path, entry) in inner
            .entries
            .range::<String, _>((
                std::ops::Bound::Excluded(p.clone()),
                std::ops::Bound::Unbounded,
            ))
            .take_while(|(entry_path, _)| entry_path.starts_with(&prefix))
        {
            let Some(name) = path::child_name(&p, entry_path) else {
                continue;
            };
            let kind = entry.kind();
            let listed = match kind {
                NodeKind::Directory => true,
                _ if p == "/" => true,
                _ => path::suffix_of(entry_path)
                    .map(|suffix| enabled.contains(suffix))
                    .unwrap_or(false),
            };
            if listed {
                children.push((name.to_string(), kind, entry_path.clone()));
            }
        }

        Ok(children
            .into_iter()
            .map(|(name, kind, child_path)| {
                let ino = inner.inode_of(&child_path);
                (name, kind, ino)
            })
            .collect())
    }

    pub fn insert_directory(&self, raw: &str) -> Result<(), FsError> {
        let p = path::normalize(raw)?;
        let mut inner = self.inner.write().unwrap();
        inner.inode_of(&p);
        inner.entries.entry(p).or_insert(VirtualNode::Directory);
        Ok(())
    }

    pub fn insert_remote_file(&self, raw: &str, url: impl Into<String>) -> Result<(), FsError> {
        let p = path::normalize(raw)?;
        let mut inner = self.inner.write().unwrap();
        inner.inode_of(&p);
        inner.entries.insert(p, VirtualNode::remote(url.into()));
        Ok(())
    }

    pub fn insert_user_file(&self, raw: &str, node: UserNode) -> Result<(), FsError> {
        let p = path::normalize(raw)?;
        let mut inner = self.inner.write().unwrap();
        inner.inode_of(&p);
        inner.entries.insert(p, VirtualNode::User(node));
        Ok(())
    }

    /// Remove one path. The removed node is returned so the caller can
    /// stop and drain any live session outside the catalog lock.
    pub fn remove(&self, raw: &str) -> Result<Option<VirtualNode>, FsError> {
        let p = path::normalize(raw)?;
        let removed = self.inner.write().unwrap().entries.remove(&p);
        if removed.is_some() {
            debug!(path = %p, "catalog entry removed");
        }
        Ok(removed)
    }

    /// Atomic rebuild from a snapshot.
    ///
    /// Directories implied by file paths are auto-created; user files are
    /// preserved; remote files keep their inode, and their live session
    /// when the URL is unchanged. Sessions of replaced or vanished remote
    /// files are stopped and drained after the swap.
    pub fn apply_snapshot(&self, snapshot: CatalogSnapshot) {
        let mut fresh: BTreeMap<String, VirtualNode> = BTreeMap::new();
        fresh.insert("/".to_string(), VirtualNode::Directory);

        for entry in snapshot.entries {
            let p = match path::normalize(&entry.path) {
                Ok(p) => p,
                Err(_) => {
                    warn!(path = %entry.path, "skipping invalid snapshot path");
                    continue;
                }
            };
            for ancestor in path::ancestors_of(&p) {
                fresh.entry(ancestor).or_insert(VirtualNode::Directory);
            }
            match (entry.kind, entry.url) {
                (NodeKind::Directory, _) => {
                    fresh.entry(p).or_insert(VirtualNode::Directory);
                }
                (NodeKind::RemoteFile, Some(url)) => {
                    fresh.insert(p, VirtualNode::remote(url));
                }
                (NodeKind::RemoteFile, None) => {
                    warn!(path = %p, "skipping remote snapshot entry without URL");
                }
                (NodeKind::UserFile, _) => {
                    warn!(path = %p, "snapshots cannot introduce user files");
                }
            }
        }

        let mut retired: Vec<VirtualNode> = Vec::new();
        let version;
        {
            let mut inner = self.inner.write().unwrap();
            let old = std::mem::take(&mut inner.entries);
            for (entry_path, entry) in old {
                match entry {
                    // user files survive every rebuild
                    VirtualNode::User(user) => {
                        for ancestor in path::ancestors_of(&entry_path) {
                            fresh.entry(ancestor).or_insert(VirtualNode::Directory);
                        }
                        fresh.insert(entry_path, VirtualNode::User(user));
                    }
                    VirtualNode::Remote(remote) => match fresh.get_mut(&entry_path) {
                        Some(VirtualNode::Remote(new_remote)) if new_remote.url == remote.url => {
                            // unchanged URL keeps streaming without a gap
                            new_remote.session = remote.session;
                        }
                        _ => retired.push(VirtualNode::Remote(remote)),
                    },
                    VirtualNode::Directory => {}
                }
            }
            let paths: Vec<String> = fresh.keys().cloned().collect();
            for p in paths {
                inner.inode_of(&p);
            }
            inner.entries = fresh;
            inner.version += 1;
            version = inner.version;
        }

        for node in &retired {
            if let VirtualNode::Remote(remote) = node {
                if let Some(session) = &remote.session {
                    session.stop();
                }
            }
        }
        let drained = retired.len();
        drop(retired);
        info!(version, drained, "catalog snapshot applied");
    }

    /// Create the session for a `.ts` node if absent (or stopped) and add
    /// a reader. Returns the session's identity for the file handle. A
    /// stopped leftover session is replaced and drained off the caller's
    /// thread.
    pub fn open_stream(
        &self,
        raw: &str,
        client: &Arc<dyn StreamingClient>,
        shutdown: &ShutdownFlag,
        pipe_capacity: usize,
    ) -> Result<u64, FsError> {
        let p = path::normalize(raw)?;
        let mut retired: Option<StreamSession> = None;
        let session_id;
        {
            let mut inner = self.inner.write().unwrap();
            let node = inner.entries.get_mut(&p).ok_or(FsError::NotFound)?;
            let VirtualNode::Remote(remote) = node else {
                return Err(FsError::Invalid);
            };
            let needs_new = match &remote.session {
                None => true,
                Some(session) => session.is_stopped(),
            };
            if needs_new {
                retired = remote.session.take();
                remote.session = Some(StreamSession::new(
                    remote.url.clone(),
                    pipe_capacity,
                    Arc::clone(client),
                    shutdown.clone(),
                ));
            }
            match &remote.session {
                Some(session) => {
                    session.incr_readers()?;
                    session_id = session.id();
                }
                None => return Err(FsError::NotFound),
            }
        }
        if let Some(old) = retired {
            old.stop();
            std::thread::spawn(move || drop(old));
        }
        Ok(session_id)
    }

    /// Pipe handle for the path's live session.
    pub fn stream_handle(&self, raw: &str) -> Result<StreamHandle, FsError> {
        let p = path::normalize(raw)?;
        let inner = self.inner.read().unwrap();
        match inner.entries.get(&p) {
            Some(VirtualNode::Remote(remote)) => remote
                .session
                .as_ref()
                .map(StreamSession::handle)
                .ok_or(FsError::NotFound),
            Some(_) => Err(FsError::Invalid),
            None => Err(FsError::NotFound),
        }
    }

    /// Drop one reader from the path's session, provided the session the
    /// handle opened (`session_id`) is still the one attached; a rebuild
    /// may have replaced and drained it already. When the count reaches
    /// zero the session is detached and returned for the caller to drain.
    pub fn release_stream(&self, raw: &str, session_id: u64) -> Option<StreamSession> {
        let p = path::normalize(raw).ok()?;
        let mut inner = self.inner.write().unwrap();
        let VirtualNode::Remote(remote) = inner.entries.get_mut(&p)? else {
            return None;
        };
        let session = remote.session.as_ref()?;
        if session.id() != session_id {
            return None;
        }
        if session.decr_readers() == 0 {
            remote.session.take()
        } else {
            None
        }
    }

    /// Detach, stop, and drain every live session. Part of shutdown.
    pub fn stop_all_sessions(&self) {
        let sessions: Vec<StreamSession> = {
            let mut inner = self.inner.write().unwrap();
            inner
                .entries
                .values_mut()
                .filter_map(|node| match node {
                    VirtualNode::Remote(remote) => remote.session.take(),
                    _ => None,
                })
                .collect()
        };
        for session in &sessions {
            session.stop();
        }
        let count = sessions.len();
        drop(sessions);
        if count > 0 {
            info!(count, "stream sessions drained");
        }
    }

    /// Run `f` against the user node at `path`.
    pub fn with_user_node_mut<R>(
        &self,
        raw: &str,
        f: impl FnOnce(&mut UserNode) -> R,
    ) -> Result<R, FsError> {
        let p = path::normalize(raw)?;
        let mut inner = self.inner.write().unwrap();
        match inner.entries.get_mut(&p) {
            Some(VirtualNode::User(user)) => Ok(f(user)),
            Some(_) => Err(FsError::PermissionDenied),
            None => Err(FsError::NotFound),
        }
    }
}
