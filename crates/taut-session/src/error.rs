use thiserror::Error;

use crate::status::TorrentHandle;

/// Failures surfaced synchronously by the session layer.
///
/// Most torrent-level failures arrive asynchronously as [`crate::Alert`]s;
/// these variants cover the calls that can reject immediately.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The handle does not name a live torrent in this session.
    #[error("unknown torrent handle {0:?}")]
    UnknownTorrent(TorrentHandle),
    /// The add request carried a source the library cannot interpret.
    #[error("invalid torrent source: {0}")]
    InvalidSource(String),
    /// The session could not be constructed.
    #[error("session construction failed: {0}")]
    Construction(String),
}
