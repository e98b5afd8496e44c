use std::path::{Path, PathBuf};

use taut_core::{InfoHash, RpcId};
use taut_session::TorrentStatus;

/// Receiver for dispatched session alerts.
///
/// One method per alert kind the manager recognizes, every one defaulted to
/// a no-op: an alert whose method is not overridden is dropped silently.
/// The manager resolves handles to ids and hashes before dispatch, so sinks
/// never touch the session themselves.
#[allow(unused_variables)]
pub trait AlertSink {
    /// A torrent finished downloading all wanted data.
    fn on_torrent_finished(&mut self, id: RpcId, status: &TorrentStatus) {}

    /// A resume blob arrived for `hash`.
    fn on_resume_data(&mut self, hash: &InfoHash, blob: &[u8]) {}

    /// The in-flight resume save for `hash` concluded (with or without a
    /// usable blob).
    fn on_resume_hash_completed(&mut self, hash: &InfoHash) {}

    /// A save-resume alert fired without an identifiable hash; defer the
    /// next forced resume flush.
    fn extend_resume_deadline(&mut self) {}

    /// Persist a `.torrent` payload for `hash`, returning the path and
    /// size on success. The default (`None`) means metadata persistence is
    /// not wired up, and the manager skips it.
    fn persist_metadata(&mut self, hash: &InfoHash, blob: &[u8]) -> Option<(PathBuf, usize)> {
        None
    }

    /// A metadata file was durably written.
    fn on_metadata_persisted(&mut self, hash: &InfoHash, path: &Path, bytes: usize) {}

    /// An `async_add_torrent` request failed.
    fn on_add_torrent_failed(&mut self, hash: &InfoHash, message: &str) {}

    /// Metadata retrieval failed for a magnet-initiated torrent.
    fn on_metadata_failed(&mut self, id: RpcId, message: &str) {}

    /// A batched status refresh, with ids resolved.
    fn on_state_update(&mut self, updates: &[(RpcId, TorrentStatus)]) {}

    /// A listen socket came up.
    fn on_listen_succeeded(&mut self, endpoint: &str) {}

    /// A listen socket could not be bound.
    fn on_listen_failed(&mut self, endpoint: &str, message: &str) {}

    /// Disk I/O failed for a torrent.
    fn on_file_error(&mut self, id: RpcId, path: &str, message: &str) {}

    /// A tracker announce failed.
    fn on_tracker_error(&mut self, id: RpcId, url: &str, message: &str) {}

    /// Payload deletion failed after a remove.
    fn on_delete_failed(&mut self, hash: &InfoHash, message: &str) {}

    /// A port-mapping attempt failed.
    fn on_portmap_error(&mut self, message: &str) {}

    /// A storage relocation completed.
    fn on_storage_moved(&mut self, id: RpcId, hash: &InfoHash, path: &Path) {}

    /// A storage relocation failed.
    fn on_storage_moved_failed(&mut self, id: RpcId, hash: &InfoHash, message: &str) {}

    /// A resume blob was rejected at load time.
    fn on_fastresume_rejected(&mut self, id: RpcId, hash: &InfoHash, message: &str) {}
}

/// Sink that drops everything; used where dispatch must run but no
/// reactions are wanted.
#[derive(Debug, Default)]
pub struct NullSink;

impl AlertSink for NullSink {}
