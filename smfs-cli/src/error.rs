//! CLI error handling.

use std::io;

/// Errors surfaced to the user at startup. Any of these exits with
/// status 1.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("failed to initialize logging: {0}")]
    Logging(io::Error),
    #[error("failed to start runtime: {0}")]
    Runtime(io::Error),
    #[error("initialization failed: {0}")]
    Init(#[from] smfs::error::FsError),
    #[error("failed to start refresh controller: {0}")]
    Refresh(io::Error),
    #[error("failed to mount filesystem: {0}")]
    Mount(io::Error),
}
