//! Host-filesystem passthrough for user-created files.
//!
//! Every user-file virtual path maps to `cache_dir + path`. Directory
//! chains are created with mode 0755, tolerating already-existing
//! components; file creation honors the mode handed down by the kernel.

use std::fs::{self, Metadata, OpenOptions, Permissions};
use std::io;
use std::os::unix::fs::{DirBuilderExt, FileExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use tracing::debug;

/// Mode used when a write has to create its backing file.
const IMPLICIT_CREATE_MODE: u32 = 0o644;

/// Mode for directories created under the cache root.
const DIR_MODE: u32 = 0o755;

/// Passthrough storage rooted at the configured cache directory.
#[derive(Debug, Clone)]
pub struct CacheDir {
    root: PathBuf,
}

impl CacheDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Host path backing a virtual path.
    pub fn host_path(&self, vpath: &str) -> PathBuf {
        self.root.join(vpath.trim_start_matches('/'))
    }

    pub fn stat(&self, vpath: &str) -> io::Result<Metadata> {
        fs::symlink_metadata(self.host_path(vpath))
    }

    /// Positional read from the backing file.
    pub fn read_at(&self, vpath: &str, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let file = fs::File::open(self.host_path(vpath))?;
        file.read_at(buf, offset)
    }

    /// Positional write, creating the backing file with mode 0644 when it
    /// does not exist yet.
    pub fn write_at(&self, vpath: &str, data: &[u8], offset: u64) -> io::Result<usize> {
        let path = self.host_path(vpath);
        self.ensure_parent_dirs(&path)?;
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .mode(IMPLICIT_CREATE_MODE)
            .open(&path)?;
        file.write_all_at(data, offset)?;
        Ok(data.len())
    }

    /// Create the backing file exclusively with the given mode, building
    /// the containing directory chain first.
    pub fn create_exclusive(&self, vpath: &str, mode: u32) -> io::Result<Metadata> {
        let path = self.host_path(vpath);
        self.ensure_parent_dirs(&path)?;
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(mode)
            .open(&path)?;
        debug!(path = %path.display(), mode, "created user file");
        fs::symlink_metadata(&path)
    }

    pub fn set_mode(&self, vpath: &str, mode: u32) -> io::Result<()> {
        fs::set_permissions(self.host_path(vpath), Permissions::from_mode(mode))
    }

    pub fn set_owner(&self, vpath: &str, uid: Option<u32>, gid: Option<u32>) -> io::Result<()> {
        std::os::unix::fs::chown(self.host_path(vpath), uid, gid)
    }

    fn ensure_parent_dirs(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::DirBuilder::new()
                .recursive(true)
                .mode(DIR_MODE)
                .create(parent)?;
        }
        Ok(())
    }
}
