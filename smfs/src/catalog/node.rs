//! Entities stored in the catalog.

use std::path::PathBuf;

use crate::stream::StreamSession;

/// Node kind tag, used by listings and snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Directory,
    RemoteFile,
    UserFile,
}

/// Backing store for a user-created file.
#[derive(Debug, Clone)]
pub enum Backing {
    /// Persisted under the cache directory at the given host path.
    CacheBacked(PathBuf),
    /// Held entirely in memory.
    InMemory(Vec<u8>),
}

/// Remote-backed file. The URL is immutable for the node's lifetime; the
/// session is lazily created on first open and dropped when the reader
/// count reaches zero. Move-only: the session has exactly one owner.
#[derive(Debug)]
pub struct RemoteNode {
    pub url: String,
    pub session: Option<StreamSession>,
}

/// Writable user-created file.
#[derive(Debug, Clone)]
pub struct UserNode {
    pub mode: u16,
    pub uid: u32,
    pub gid: u32,
    pub backing: Backing,
}

/// Entity stored in the catalog.
#[derive(Debug)]
pub enum VirtualNode {
    Directory,
    Remote(RemoteNode),
    User(UserNode),
}

impl VirtualNode {
    pub fn remote(url: impl Into<String>) -> Self {
        VirtualNode::Remote(RemoteNode {
            url: url.into(),
            session: None,
        })
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            VirtualNode::Directory => NodeKind::Directory,
            VirtualNode::Remote(_) => NodeKind::RemoteFile,
            VirtualNode::User(_) => NodeKind::UserFile,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, VirtualNode::Directory)
    }

    /// Owned view of the node, safe to use without holding the catalog
    /// lock.
    pub fn view(&self) -> NodeView {
        match self {
            VirtualNode::Directory => NodeView::Directory,
            VirtualNode::Remote(r) => NodeView::Remote {
                url: r.url.clone(),
                streaming: r.session.is_some(),
            },
            VirtualNode::User(u) => NodeView::User(u.clone()),
        }
    }
}

/// Detached, owned snapshot of a node's observable state.
#[derive(Debug, Clone)]
pub enum NodeView {
    Directory,
    Remote { url: String, streaming: bool },
    User(UserNode),
}

impl NodeView {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeView::Directory => NodeKind::Directory,
            NodeView::Remote { .. } => NodeKind::RemoteFile,
            NodeView::User(_) => NodeKind::UserFile,
        }
    }
}
