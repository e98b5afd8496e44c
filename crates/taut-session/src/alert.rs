use std::path::PathBuf;

use taut_core::InfoHash;

use crate::status::{TorrentHandle, TorrentStatus};

/// Asynchronous event popped from the session in batches.
///
/// One variant per alert kind the engine reacts to; everything else the
/// underlying library can emit is filtered out below this boundary.
#[derive(Debug, Clone)]
pub enum Alert {
    /// Outcome of an `async_add_torrent` call.
    AddTorrent {
        /// The live handle, when the add succeeded.
        handle: Option<TorrentHandle>,
        /// Identity of the torrent the request named.
        hash: InfoHash,
        /// Failure detail; `None` on success.
        error: Option<String>,
    },
    /// A torrent finished downloading all wanted data.
    TorrentFinished {
        /// Status captured when the torrent finished.
        status: TorrentStatus,
    },
    /// A requested resume blob is ready.
    SaveResumeData {
        /// Handle the save was requested for; may already be stale.
        handle: TorrentHandle,
        /// Identity carried by the resume params, when recognizable.
        hash: Option<InfoHash>,
        /// The opaque resume payload.
        blob: Vec<u8>,
    },
    /// A requested resume save failed.
    SaveResumeDataFailed {
        /// Handle the save was requested for; may already be stale.
        handle: TorrentHandle,
        /// Identity carried by the failure, when recognizable.
        hash: Option<InfoHash>,
        /// Failure detail.
        message: String,
    },
    /// Metadata for a magnet-initiated torrent became available.
    MetadataReceived {
        /// Handle of the torrent whose metadata arrived.
        handle: TorrentHandle,
    },
    /// Metadata retrieval failed.
    MetadataFailed {
        /// Handle of the affected torrent.
        handle: TorrentHandle,
        /// Failure detail.
        message: String,
    },
    /// Batched per-torrent status refresh.
    StateUpdate {
        /// Statuses of the torrents that changed since the last post.
        statuses: Vec<TorrentStatus>,
    },
    /// A listen socket came up.
    ListenSucceeded {
        /// The endpoint that was bound.
        endpoint: String,
    },
    /// A listen socket could not be bound.
    ListenFailed {
        /// The endpoint that failed.
        endpoint: String,
        /// Failure detail.
        message: String,
    },
    /// Disk I/O failed for a torrent.
    FileError {
        /// Handle of the affected torrent.
        handle: TorrentHandle,
        /// Path the failure occurred on.
        path: String,
        /// Failure detail.
        message: String,
    },
    /// A tracker announce failed.
    TrackerError {
        /// Handle of the affected torrent.
        handle: TorrentHandle,
        /// Tracker URL.
        url: String,
        /// Failure detail.
        message: String,
    },
    /// Data deletion requested alongside a remove failed.
    TorrentDeleteFailed {
        /// Identity of the torrent whose data survived.
        hash: InfoHash,
        /// Failure detail.
        message: String,
    },
    /// A port-mapping attempt failed.
    PortmapError {
        /// Failure detail.
        message: String,
    },
    /// A storage move completed.
    StorageMoved {
        /// Handle of the moved torrent.
        handle: TorrentHandle,
        /// The new storage directory.
        path: PathBuf,
    },
    /// A storage move failed.
    StorageMovedFailed {
        /// Handle of the affected torrent.
        handle: TorrentHandle,
        /// Failure detail.
        message: String,
    },
    /// A resume blob was rejected at load time.
    FastresumeRejected {
        /// Handle of the affected torrent.
        handle: TorrentHandle,
        /// Failure detail.
        message: String,
    },
}
