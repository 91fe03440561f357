use std::path::PathBuf;

use crate::ValueType;

/// Error types for hive operations.
#[derive(thiserror::Error, Debug)]
pub enum HiveError {
    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A path segment did not resolve to a key.
    #[error("No key {key} (while resolving \"{path}\")")]
    KeyNotFound {
        /// The segment that failed to resolve.
        key: String,

        /// The full path being navigated.
        path: String,
    },

    /// The backing store refused to create a subkey.
    #[error("Cannot add subkey: {name}")]
    SubkeyCreateFailed {
        /// The name of the subkey.
        name: String,

        /// The error reported by the backing store.
        #[source]
        source: Box<HiveError>,
    },

    /// The backing store refused to write the hive.
    #[error("Cannot commit hive {}", path.display())]
    CommitFailed {
        /// The hive file.
        path: PathBuf,

        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The codec does not encode values of this type.
    #[error("Unknown value type: {0:?}")]
    UnsupportedValueType(ValueType),

    /// The data does not match the requested value type.
    #[error("Invalid data for value type {0:?}")]
    InvalidValueData(ValueType),

    /// The value data exceeds what a single cell can hold.
    #[error("Value data too large ({0} bytes)")]
    ValueTooLarge(usize),

    /// A subkey with the same name already exists.
    #[error("Key already exists: {0}")]
    KeyExists(String),

    /// The key or value name cannot be stored in a hive.
    #[error("Invalid name: {0:?}")]
    InvalidKeyName(String),

    /// The hive was opened read-only.
    #[error("Hive is opened read-only")]
    ReadOnly,

    /// The file is not a registry hive.
    #[error("Invalid hive signature")]
    InvalidSignature,

    /// Corrupted hive structure.
    #[error("Corrupted hive: {0}")]
    Corrupted(&'static str),
}

impl From<HiveError> for v2v_core::V2vError {
    fn from(value: HiveError) -> Self {
        v2v_core::V2vError::Hive(value.into())
    }
}
