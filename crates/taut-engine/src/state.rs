use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use taut_core::{InfoHash, RpcId, SessionSettings, TorrentSnapshot};
use taut_persist::{PersistedState, PersistenceManager};
use taut_session::TorrentStatus;

use crate::settings::SettingsFlush;
use crate::sink::AlertSink;
use crate::snapshot::{SnapshotHooks, entry_from_status};

/// Shared view of storage relocations in flight, readable from RPC threads
/// while the engine mutates it.
pub type PendingMoves = Arc<Mutex<HashMap<InfoHash, PathBuf>>>;

/// Fingerprint of the user-visible fields of a status; a torrent's
/// revision moves exactly when its digest does.
#[derive(Debug, Clone, PartialEq, Eq)]
struct StatusDigest {
    name: String,
    state: taut_core::TorrentState,
    paused: bool,
    progress_bits: u64,
    download_rate: i64,
    upload_rate: i64,
    total_done: u64,
    total_size: u64,
    error_code: i32,
    save_path: PathBuf,
}

impl StatusDigest {
    fn of(status: &TorrentStatus) -> Self {
        Self {
            name: status.name.clone(),
            state: status.state,
            paused: status.paused,
            progress_bits: status.progress.to_bits(),
            download_rate: status.download_payload_rate,
            upload_rate: status.upload_payload_rate,
            total_done: status.total_done,
            total_size: status.total_size,
            error_code: status.error_code,
            save_path: status.save_path.clone(),
        }
    }
}

/// Engine-thread state that reacts to alerts and feeds the snapshot
/// builder: revision counters, status digests, per-torrent user state,
/// the pending-resume set, and the persistence manager.
pub struct EngineState {
    pub(crate) persist: PersistenceManager,
    pub(crate) settings: SessionSettings,
    pub(crate) flush: SettingsFlush,
    revisions: HashMap<RpcId, u64>,
    digests: HashMap<RpcId, StatusDigest>,
    labels: HashMap<RpcId, Vec<String>>,
    priorities: HashMap<RpcId, i32>,
    pending_resume: HashSet<InfoHash>,
    pending_moves: PendingMoves,
}

impl EngineState {
    /// Assemble engine state from the recovered document.
    #[must_use]
    pub fn new(
        persist: PersistenceManager,
        settings: SessionSettings,
        flush: SettingsFlush,
        recovered_labels: HashMap<RpcId, Vec<String>>,
        recovered_priorities: HashMap<RpcId, i32>,
    ) -> Self {
        Self {
            persist,
            settings,
            flush,
            revisions: HashMap::new(),
            digests: HashMap::new(),
            labels: recovered_labels,
            priorities: recovered_priorities,
            pending_resume: HashSet::new(),
            pending_moves: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Bump a torrent's revision; creates the counter when absent.
    pub fn bump_revision(&mut self, id: RpcId) {
        *self.revisions.entry(id).or_insert(0) += 1;
    }

    /// Current revision without bumping (tests and diagnostics).
    #[must_use]
    pub fn revision(&self, id: RpcId) -> Option<u64> {
        self.revisions.get(&id).copied()
    }

    /// Replace a torrent's labels and mark both snapshot and settings
    /// stale.
    pub fn set_labels(&mut self, id: RpcId, labels: Vec<String>, now: Instant) {
        self.labels.insert(id, labels);
        self.bump_revision(id);
        self.flush.mark_dirty(now);
    }

    /// Replace a torrent's bandwidth priority and mark state stale.
    pub fn set_priority(&mut self, id: RpcId, priority: i32, now: Instant) {
        self.priorities.insert(id, priority);
        self.bump_revision(id);
        self.flush.mark_dirty(now);
    }

    /// Record a settings mutation at `now`.
    pub fn mark_settings_dirty(&mut self, now: Instant) {
        self.flush.mark_dirty(now);
    }

    /// Drop all per-torrent state for the purged ids and reap their
    /// persisted artifacts.
    pub fn forget(&mut self, removed: &[(RpcId, InfoHash)]) {
        for (id, hash) in removed {
            self.revisions.remove(id);
            self.digests.remove(id);
            self.labels.remove(id);
            self.priorities.remove(id);
            self.pending_resume.remove(hash);
            self.lock_moves().remove(hash);
            if let Err(err) = self.persist.remove_resume(hash) {
                warn!(info_hash = %hash, error = %err, "failed to prune resume blob");
            }
            debug!(rpc_id = id, info_hash = %hash, "forgot departed torrent");
        }
    }

    /// Compose the full durable document from live state.
    #[must_use]
    pub fn export_state(
        &self,
        rpc_ids: std::collections::BTreeMap<String, RpcId>,
    ) -> PersistedState {
        PersistedState {
            settings: self.settings.clone(),
            rpc_ids,
            labels: self.labels.iter().map(|(k, v)| (*k, v.clone())).collect(),
            priorities: self.priorities.iter().map(|(k, v)| (*k, *v)).collect(),
        }
    }

    /// Storage directory used when an add request names none.
    #[must_use]
    pub fn default_save_path(&self) -> PathBuf {
        self.settings
            .download_path
            .clone()
            .unwrap_or_else(|| self.persist.layout().default_download_dir())
    }

    /// Track a resume save now in flight for `hash`.
    pub fn note_resume_requested(&mut self, hash: InfoHash) {
        self.pending_resume.insert(hash);
    }

    /// Whether all in-flight resume saves have completed.
    #[must_use]
    pub fn pending_resume_is_empty(&self) -> bool {
        self.pending_resume.is_empty()
    }

    /// Shared handle to the pending-move table.
    #[must_use]
    pub fn pending_moves(&self) -> PendingMoves {
        Arc::clone(&self.pending_moves)
    }

    /// Record a storage relocation in flight.
    pub fn record_move(&mut self, hash: InfoHash, target: PathBuf) {
        self.lock_moves().insert(hash, target);
    }

    /// Drop a recorded relocation (rejected submissions).
    pub fn clear_move(&mut self, hash: &InfoHash) {
        self.lock_moves().remove(hash);
    }

    fn lock_moves(&self) -> std::sync::MutexGuard<'_, HashMap<InfoHash, PathBuf>> {
        self.pending_moves
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl AlertSink for EngineState {
    fn on_torrent_finished(&mut self, id: RpcId, status: &TorrentStatus) {
        info!(rpc_id = id, name = %status.name, "torrent finished");
        self.bump_revision(id);
    }

    fn on_resume_data(&mut self, hash: &InfoHash, blob: &[u8]) {
        if let Err(err) = self.persist.write_resume(hash, blob) {
            // Recovered locally: the next forced flush retries.
            warn!(info_hash = %hash, error = %err, "resume blob write failed");
        }
    }

    fn on_resume_hash_completed(&mut self, hash: &InfoHash) {
        self.pending_resume.remove(hash);
    }

    fn extend_resume_deadline(&mut self) {
        self.persist.extend_resume_deadline();
    }

    fn persist_metadata(&mut self, hash: &InfoHash, blob: &[u8]) -> Option<(PathBuf, usize)> {
        if self.persist.has_metadata(hash) {
            return None;
        }
        match self.persist.write_metadata(hash, blob) {
            Ok(path) => Some((path, blob.len())),
            Err(err) => {
                warn!(info_hash = %hash, error = %err, "metadata write failed");
                None
            }
        }
    }

    fn on_metadata_persisted(&mut self, hash: &InfoHash, path: &Path, bytes: usize) {
        info!(info_hash = %hash, path = %path.display(), bytes, "metadata persisted");
    }

    fn on_add_torrent_failed(&mut self, hash: &InfoHash, message: &str) {
        warn!(info_hash = %hash, message, "torrent add failed");
    }

    fn on_metadata_failed(&mut self, id: RpcId, message: &str) {
        warn!(rpc_id = id, message, "metadata retrieval failed");
    }

    fn on_state_update(&mut self, updates: &[(RpcId, TorrentStatus)]) {
        for (id, status) in updates {
            let digest = StatusDigest::of(status);
            match self.digests.get(id) {
                Some(previous) if *previous == digest => {}
                _ => {
                    self.digests.insert(*id, digest);
                    self.bump_revision(*id);
                }
            }
        }
    }

    fn on_listen_succeeded(&mut self, endpoint: &str) {
        info!(endpoint, "listen socket bound");
    }

    fn on_listen_failed(&mut self, endpoint: &str, message: &str) {
        warn!(endpoint, message, "listen socket failed");
    }

    fn on_file_error(&mut self, id: RpcId, path: &str, message: &str) {
        warn!(rpc_id = id, path, message, "file error");
    }

    fn on_tracker_error(&mut self, id: RpcId, url: &str, message: &str) {
        debug!(rpc_id = id, url, message, "tracker error");
    }

    fn on_delete_failed(&mut self, hash: &InfoHash, message: &str) {
        warn!(info_hash = %hash, message, "payload deletion failed");
    }

    fn on_portmap_error(&mut self, message: &str) {
        debug!(message, "port mapping failed");
    }

    fn on_storage_moved(&mut self, id: RpcId, hash: &InfoHash, path: &Path) {
        info!(rpc_id = id, path = %path.display(), "storage move completed");
        self.lock_moves().remove(hash);
        self.bump_revision(id);
    }

    fn on_storage_moved_failed(&mut self, id: RpcId, hash: &InfoHash, message: &str) {
        warn!(rpc_id = id, message, "storage move failed");
        self.lock_moves().remove(hash);
    }

    fn on_fastresume_rejected(&mut self, id: RpcId, _hash: &InfoHash, message: &str) {
        warn!(rpc_id = id, message, "resume blob rejected, torrent will recheck");
    }
}

impl SnapshotHooks for EngineState {
    fn on_visit(&mut self, id: RpcId, _status: &TorrentStatus) {
        // Lazily create per-torrent user state so later mutations have a
        // slot to land in.
        self.labels.entry(id).or_default();
        self.priorities.entry(id).or_default();
    }

    fn ensure_revision(&mut self, id: RpcId) -> u64 {
        *self.revisions.entry(id).or_insert(0)
    }

    fn build_entry(
        &mut self,
        id: RpcId,
        status: &TorrentStatus,
        revision: u64,
        added_time: DateTime<Utc>,
    ) -> TorrentSnapshot {
        // Keep the digest in step with what the snapshot now shows, so the
        // next state update only bumps on a real change.
        self.digests.insert(id, StatusDigest::of(status));
        entry_from_status(id, status, revision, added_time)
    }

    fn labels_for(&mut self, id: RpcId, _hex: &str) -> Vec<String> {
        self.labels.get(&id).cloned().unwrap_or_default()
    }

    fn priority_for(&mut self, id: RpcId) -> i32 {
        self.priorities.get(&id).copied().unwrap_or_default()
    }
}
