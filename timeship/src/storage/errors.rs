use thiserror::Error;

/// Errors produced by the storage layer. Messages carry storage-relative
/// paths only; absolute on-disk paths never leave this layer.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid snapshot id: {0}")]
    InvalidSnapshot(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

impl StorageError {
    /// Classify an OS error raised while resolving `path` relative to a root.
    /// `ENOTDIR` and `ELOOP` are folded into `NotFound`: a path through a
    /// non-directory does not exist from the caller's point of view, and a
    /// symlink refused by `O_NOFOLLOW` must not be distinguishable from a
    /// missing entry.
    pub(crate) fn from_os(err: std::io::Error, path: &str) -> Self {
        match err.raw_os_error() {
            Some(libc::ENOENT) | Some(libc::ENOTDIR) | Some(libc::ELOOP) => {
                StorageError::NotFound(path.to_string())
            }
            Some(libc::EACCES) | Some(libc::EPERM) => {
                StorageError::PermissionDenied(path.to_string())
            }
            _ => StorageError::Io(err),
        }
    }
}
