use taut_core::RpcId;
use taut_session::SessionError;
use thiserror::Error;

/// Failures surfaced by the engine's command surface.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine is shutting down; no further commands are accepted.
    #[error("engine is shutting down")]
    ShuttingDown,
    /// A command named an rpc id with no live torrent behind it.
    #[error("no torrent with rpc id {0}")]
    UnknownId(RpcId),
    /// The underlying session rejected a call.
    #[error("session call failed")]
    Session(#[from] SessionError),
    /// The session was used before `start_session` or after destruction.
    #[error("session is not running")]
    SessionNotRunning,
}
