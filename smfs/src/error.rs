//! Error types shared across the SMFS library.
//!
//! Every failure surfaced to the FUSE host maps onto a POSIX errno via
//! [`FsError::errno`]; network failures are split into transient errors
//! (retried by stream workers and the refresh controller) and fatal ones
//! (logged, current state kept).

use std::io;

/// Errors produced by catalog, stream, and filesystem operations.
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    /// Path or inode does not resolve to a catalog entry.
    #[error("no such entry")]
    NotFound,
    /// A directory operation was attempted on a non-directory.
    #[error("not a directory")]
    NotDirectory,
    /// A file operation was attempted on a directory.
    #[error("is a directory")]
    IsDirectory,
    /// Entry already exists.
    #[error("entry already exists")]
    Exists,
    /// The operation is forbidden for this node (e.g. writing a remote file).
    #[error("permission denied")]
    PermissionDenied,
    /// Resource allocation (worker spawn, buffer) failed.
    #[error("out of memory")]
    OutOfMemory,
    /// Malformed path or unsupported suffix.
    #[error("invalid argument")]
    Invalid,
    /// Operation intentionally unimplemented (e.g. xattrs).
    #[error("operation not supported")]
    NotSupported,
    /// The process-wide shutdown flag is set.
    #[error("shutting down")]
    ShuttingDown,
    /// Recoverable network failure; callers retry.
    #[error("transient network error: {0}")]
    NetworkTransient(String),
    /// Unrecoverable network failure; callers abandon the cycle.
    #[error("network error: {0}")]
    NetworkFatal(String),
    /// Host-filesystem error from the cache directory.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl FsError {
    /// Errno reported to the kernel for this error.
    ///
    /// `ShuttingDown` maps to `EIO`; reads convert it to EOF before it
    /// ever reaches this function.
    pub fn errno(&self) -> libc::c_int {
        match self {
            FsError::NotFound => libc::ENOENT,
            FsError::NotDirectory => libc::ENOTDIR,
            FsError::IsDirectory => libc::EISDIR,
            FsError::Exists => libc::EEXIST,
            FsError::PermissionDenied => libc::EACCES,
            FsError::OutOfMemory => libc::ENOMEM,
            FsError::Invalid => libc::EINVAL,
            FsError::NotSupported => libc::ENOTSUP,
            FsError::ShuttingDown => libc::EIO,
            FsError::NetworkTransient(_) | FsError::NetworkFatal(_) => libc::EIO,
            FsError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }

    /// True for errors the caller is expected to retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, FsError::NetworkTransient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping_matches_posix_codes() {
        assert_eq!(FsError::NotFound.errno(), libc::ENOENT);
        assert_eq!(FsError::IsDirectory.errno(), libc::EISDIR);
        assert_eq!(FsError::Exists.errno(), libc::EEXIST);
        assert_eq!(FsError::PermissionDenied.errno(), libc::EACCES);
        assert_eq!(FsError::Invalid.errno(), libc::EINVAL);
        assert_eq!(FsError::NotSupported.errno(), libc::ENOTSUP);
    }

    #[test]
    fn io_error_preserves_raw_errno() {
        let err = FsError::Io(io::Error::from_raw_os_error(libc::EEXIST));
        assert_eq!(err.errno(), libc::EEXIST);
    }

    #[test]
    fn io_error_without_raw_code_falls_back_to_eio() {
        let err = FsError::Io(io::Error::new(io::ErrorKind::Other, "synthetic"));
        assert_eq!(err.errno(), libc::EIO);
    }
}
