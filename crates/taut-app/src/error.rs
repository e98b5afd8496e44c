use taut_engine::EngineError;
use taut_persist::PersistError;
use thiserror::Error;

/// Fatal startup and runtime failures of the daemon binary.
#[derive(Debug, Error)]
pub(crate) enum AppError {
    /// The data root could not be created.
    #[error("failed to prepare data root")]
    DataRoot(#[source] PersistError),
    /// `state.json` exists but cannot be decoded; refusing to clobber it.
    #[error("state document is unreadable")]
    CorruptState(#[source] PersistError),
    /// Any other persistence failure during startup.
    #[error("persistence failure during startup")]
    Persist(#[source] PersistError),
    /// The underlying session could not be constructed.
    #[error("session startup failed")]
    Session(#[source] EngineError),
    /// Miscellaneous I/O failure (thread spawn, signal handler).
    #[error("{context}")]
    Io {
        /// What was being attempted.
        context: &'static str,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl AppError {
    /// Process exit code: 0 is reserved for clean shutdown, everything
    /// here is a fatal startup failure.
    pub(crate) fn exit_code(&self) -> u8 {
        match self {
            Self::Session(_) => 2,
            Self::CorruptState(_) => 3,
            Self::DataRoot(_) => 4,
            Self::Persist(_) | Self::Io { .. } => 1,
        }
    }
}
