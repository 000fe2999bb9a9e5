//! Open-handle table.
//!
//! File handles given to the kernel are ids drawn from an atomic counter
//! and resolved through this table, so a snapshot rebuild that replaces a
//! node can never leave a handle dangling; the handle's path is simply
//! looked up again on each operation.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

/// What an open file handle refers to.
#[derive(Debug, Clone)]
pub struct OpenHandle {
    pub path: String,
    /// Identity of the stream session whose reader count this open
    /// incremented, when the handle is for a `.ts` file.
    pub session: Option<u64>,
}

pub struct HandleTable {
    next: AtomicU64,
    open: DashMap<u64, OpenHandle>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            // handle 0 is never allocated so "no handle" stays detectable
            next: AtomicU64::new(1),
            open: DashMap::new(),
        }
    }

    pub fn insert(&self, handle: OpenHandle) -> u64 {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        self.open.insert(id, handle);
        id
    }

    pub fn get(&self, id: u64) -> Option<OpenHandle> {
        self.open.get(&id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, id: u64) -> Option<OpenHandle> {
        self.open.remove(&id).map(|(_, handle)| handle)
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_nonzero() {
        let table = HandleTable::new();
        let a = table.insert(OpenHandle {
            path: "/a".into(),
            session: None,
        });
        let b = table.insert(OpenHandle {
            path: "/b".into(),
            session: Some(7),
        });
        assert_ne!(a, 0);
        assert_ne!(a, b);
    }

    #[test]
    fn remove_returns_the_handle_once() {
        let table = HandleTable::new();
        let id = table.insert(OpenHandle {
            path: "/a".into(),
            session: Some(3),
        });
        assert!(table.remove(id).is_some_and(|h| h.session == Some(3)));
        assert!(table.remove(id).is_none());
        assert!(table.is_empty());
    }
}
