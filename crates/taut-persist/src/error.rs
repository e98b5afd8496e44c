use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures raised by the persistence layer.
#[derive(Debug, Error)]
pub enum PersistError {
    /// Filesystem operation failed.
    #[error("io failure on {path}")]
    Io {
        /// Path the operation targeted.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The state document exists but cannot be decoded. Fatal at startup:
    /// overwriting it silently would discard the user's session.
    #[error("corrupt state document at {path}")]
    Corrupt {
        /// Path of the unreadable document.
        path: PathBuf,
        /// Underlying decode error.
        #[source]
        source: serde_json::Error,
    },
    /// The state document could not be encoded.
    #[error("failed to encode state document")]
    Encode {
        /// Underlying encode error.
        #[source]
        source: serde_json::Error,
    },
}

impl PersistError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
