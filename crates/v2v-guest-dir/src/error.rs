use std::path::PathBuf;

/// Error types for the directory guest service.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A registry hive of the guest could not be read.
    #[error(transparent)]
    Hive(#[from] v2v_hive::HiveError),

    /// A guest binary could not be parsed.
    #[error(transparent)]
    Object(#[from] object::Error),

    /// The guest path is not absolute or escapes the guest root.
    #[error("Invalid guest path: {0}")]
    InvalidPath(String),

    /// An intermediate component of a guest path does not exist.
    #[error("No such file or directory: {0}")]
    NotFound(String),

    /// The mount point is already in use.
    #[error("Mount point already in use: {0}")]
    AlreadyMounted(String),

    /// The guest was launched read-only.
    #[error("Guest is read-only")]
    ReadOnly,

    /// The guest root is not a directory.
    #[error("Not a directory: {}", .0.display())]
    NotADirectory(PathBuf),
}

impl From<Error> for v2v_core::V2vError {
    fn from(value: Error) -> Self {
        v2v_core::V2vError::Guest(value.into())
    }
}
