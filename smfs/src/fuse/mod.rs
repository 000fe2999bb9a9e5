//! FUSE host adapter: the `fuser` filesystem implementation and mount
//! helper.

mod filesystem;

use std::io;
use std::path::Path;
use std::sync::Arc;

use fuser::{BackgroundSession, MountOption};
use tokio::runtime::Handle;
use tracing::info;

use crate::ops::FsOps;

pub use filesystem::SmfsFilesystem;

/// Mount the filesystem in the background; dropping the returned session
/// unmounts it.
pub fn mount(
    ops: Arc<FsOps>,
    runtime: Handle,
    mountpoint: &Path,
) -> io::Result<BackgroundSession> {
    if !mountpoint.exists() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("mount point does not exist: {}", mountpoint.display()),
        ));
    }
    let options = [
        MountOption::FSName("smfs".to_string()),
        MountOption::AutoUnmount,
    ];
    info!(mountpoint = %mountpoint.display(), "mounting filesystem");
    fuser::spawn_mount2(SmfsFilesystem::new(ops, runtime), mountpoint, &options)
}
