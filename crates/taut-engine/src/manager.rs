use std::collections::HashSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;

use tracing::{debug, error, warn};

use taut_core::{InfoHash, RpcId};
use taut_session::{
    AddTorrentParams, Alert, BtSession, IpFilter, SessionCounters, SessionParams, SettingsPack,
    TorrentHandle, TorrentStatus, create_session,
};

use crate::error::EngineError;
use crate::ids::IdMap;
use crate::sink::AlertSink;

/// Preallocated capacity of the reusable alert buffer.
const ALERT_BUFFER_CAPACITY: usize = 256;

/// Owner of the session object and the id maps.
///
/// Every session mutation and observation goes through here, on the engine
/// thread. The manager pumps alerts into an [`AlertSink`], translating
/// handles into the stable ids and hashes the rest of the engine keys on.
pub struct TorrentManager {
    session: Option<Box<dyn BtSession>>,
    ids: IdMap,
    alert_buf: Vec<Alert>,
}

impl TorrentManager {
    /// A manager with no session yet; call [`TorrentManager::start_session`]
    /// before the loop begins.
    #[must_use]
    pub fn new() -> Self {
        Self {
            session: None,
            ids: IdMap::new(),
            alert_buf: Vec::with_capacity(ALERT_BUFFER_CAPACITY),
        }
    }

    /// Construct the underlying session. Called exactly once; failure is
    /// fatal to engine startup.
    ///
    /// # Errors
    ///
    /// Propagates the session construction failure.
    pub fn start_session(&mut self, params: SessionParams) -> Result<(), EngineError> {
        if self.session.is_some() {
            warn!("start_session called twice; keeping the existing session");
            return Ok(());
        }
        self.session = Some(create_session(params)?);
        Ok(())
    }

    /// Whether a session is currently running.
    #[must_use]
    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    // --- id management -------------------------------------------------

    /// Replay persisted `(hex, id)` pairs into the id allocator.
    pub fn recover_rpc_mappings(&mut self, pairs: &[(String, RpcId)]) {
        self.ids.recover(pairs);
    }

    /// Idempotent id assignment; 0 for the zero hash.
    pub fn assign_rpc_id(&mut self, hash: InfoHash) -> RpcId {
        self.ids.assign(hash)
    }

    /// Current id of `hash`, if bound.
    #[must_use]
    pub fn id_of(&self, hash: &InfoHash) -> Option<RpcId> {
        self.ids.id_of(hash)
    }

    /// Current hash behind `id`, if bound.
    #[must_use]
    pub fn hash_of(&self, id: RpcId) -> Option<InfoHash> {
        self.ids.hash_of(id)
    }

    /// Drop every binding absent from `seen`; returns the removed pairs.
    pub fn purge_missing_ids(&mut self, seen: &HashSet<RpcId>) -> Vec<(RpcId, InfoHash)> {
        self.ids.purge_missing(seen)
    }

    /// Export the id map for persistence.
    #[must_use]
    pub fn export_rpc_ids(&self) -> std::collections::BTreeMap<String, RpcId> {
        self.ids.export()
    }

    /// Whether id bindings changed since the last call; clears the flag.
    pub fn ids_changed(&mut self) -> bool {
        self.ids.take_dirty()
    }

    // --- alert pump ----------------------------------------------------

    /// Pop every available alert and dispatch each to `sink`.
    ///
    /// Dispatch never propagates panics: a handler that panics is logged
    /// and the remaining alerts still run. The buffer is reused across
    /// ticks to keep the hot path allocation-free.
    pub fn process_alerts(&mut self, sink: &mut dyn AlertSink) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.post_torrent_updates();

        let mut buffer = std::mem::take(&mut self.alert_buf);
        buffer.clear();
        session.pop_alerts(&mut buffer);

        let ids = &mut self.ids;
        for alert in buffer.drain(..) {
            let guarded = catch_unwind(AssertUnwindSafe(|| {
                dispatch(&mut **session, ids, sink, alert);
            }));
            if guarded.is_err() {
                error!("alert handler panicked; continuing with remaining alerts");
            }
        }
        self.alert_buf = buffer;
    }

    // --- session wrappers ----------------------------------------------

    /// Resolve an rpc id to the live handle behind it.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownId`] when the id is unbound or the
    /// torrent has left the session.
    pub fn handle_for(&self, id: RpcId) -> Result<TorrentHandle, EngineError> {
        let hash = self.ids.hash_of(id).ok_or(EngineError::UnknownId(id))?;
        self.session
            .as_deref()
            .and_then(|session| session.find_torrent(hash))
            .ok_or(EngineError::UnknownId(id))
    }

    /// Queue a torrent admission with the session.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::SessionNotRunning`] or the session's
    /// rejection.
    pub fn async_add_torrent(&mut self, params: AddTorrentParams) -> Result<(), EngineError> {
        Ok(self.session_mut()?.async_add_torrent(params)?)
    }

    /// Remove the torrent behind `id`, optionally deleting payload data.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownId`] for a stale id.
    pub fn remove_torrent(&mut self, id: RpcId, delete_data: bool) -> Result<(), EngineError> {
        let handle = self.handle_for(id)?;
        Ok(self.session_mut()?.remove_torrent(handle, delete_data)?)
    }

    /// Resume the torrent behind `id`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownId`] for a stale id.
    pub fn resume_torrent(&mut self, id: RpcId) -> Result<(), EngineError> {
        let handle = self.handle_for(id)?;
        Ok(self.session_mut()?.resume_torrent(handle)?)
    }

    /// Pause the torrent behind `id`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownId`] for a stale id.
    pub fn pause_torrent(&mut self, id: RpcId) -> Result<(), EngineError> {
        let handle = self.handle_for(id)?;
        Ok(self.session_mut()?.pause_torrent(handle)?)
    }

    /// Force-recheck the torrent behind `id`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownId`] for a stale id.
    pub fn recheck_torrent(&mut self, id: RpcId) -> Result<(), EngineError> {
        let handle = self.handle_for(id)?;
        Ok(self.session_mut()?.force_recheck(handle)?)
    }

    /// Apply per-torrent bandwidth limits to every id in `ids`.
    ///
    /// A `kbps` value of 0 with the respective `enabled` flag false means
    /// "no limit"; with `enabled` true it pins the rate to zero.
    ///
    /// # Errors
    ///
    /// Returns the first failure; earlier ids keep their new limits.
    pub fn set_torrent_bandwidth_limits(
        &mut self,
        ids: &[RpcId],
        download_kbps: Option<u32>,
        download_enabled: Option<bool>,
        upload_kbps: Option<u32>,
        upload_enabled: Option<bool>,
    ) -> Result<(), EngineError> {
        let download = limit_bps(download_kbps, download_enabled);
        let upload = limit_bps(upload_kbps, upload_enabled);
        for id in ids {
            let handle = self.handle_for(*id)?;
            self.session_mut()?
                .set_torrent_limits(handle, download, upload)?;
        }
        Ok(())
    }

    /// Push a bandwidth priority down to the session.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownId`] for a stale id.
    pub fn set_torrent_priority(&mut self, id: RpcId, priority: i32) -> Result<(), EngineError> {
        let handle = self.handle_for(id)?;
        Ok(self.session_mut()?.set_torrent_priority(handle, priority)?)
    }

    /// Begin a storage relocation for the torrent behind `id`. With
    /// `delete_source` the payload moves; without it the torrent is
    /// re-pointed at `target`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownId`] for a stale id.
    pub fn move_storage(
        &mut self,
        id: RpcId,
        target: &Path,
        delete_source: bool,
    ) -> Result<(), EngineError> {
        let handle = self.handle_for(id)?;
        Ok(self
            .session_mut()?
            .move_storage(handle, target, delete_source)?)
    }

    /// Apply a settings pack to the session.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::SessionNotRunning`] before startup.
    pub fn apply_settings(&mut self, pack: &SettingsPack) -> Result<(), EngineError> {
        self.session_mut()?.apply_settings(pack);
        Ok(())
    }

    /// Toggle peer exchange.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::SessionNotRunning`] before startup.
    pub fn set_pex_enabled(&mut self, enabled: bool) -> Result<(), EngineError> {
        self.session_mut()?.set_pex_enabled(enabled);
        Ok(())
    }

    /// Install an IP filter.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::SessionNotRunning`] before startup.
    pub fn set_ip_filter(&mut self, filter: IpFilter) -> Result<(), EngineError> {
        self.session_mut()?.set_ip_filter(filter);
        Ok(())
    }

    /// Request a resume save for the torrent behind `id`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownId`] for a stale id.
    pub fn request_resume_save(&mut self, id: RpcId) -> Result<(), EngineError> {
        let handle = self.handle_for(id)?;
        Ok(self.session_mut()?.save_resume_data(handle)?)
    }

    /// Request a resume save for every live torrent; returns the hashes a
    /// save is now in flight for.
    pub fn request_resume_save_all(&mut self) -> Vec<InfoHash> {
        let Some(session) = self.session.as_mut() else {
            return Vec::new();
        };
        let mut requested = Vec::new();
        for handle in session.torrents() {
            let Some(hash) = session.hash_of(handle) else {
                continue;
            };
            if hash.is_zero() {
                continue;
            }
            match session.save_resume_data(handle) {
                Ok(()) => requested.push(hash),
                Err(err) => debug!(info_hash = %hash, error = %err, "resume save request failed"),
            }
        }
        requested
    }

    /// Serialize library session state for `.session_state`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::SessionNotRunning`] after destruction.
    pub fn write_session_params(&mut self) -> Result<Vec<u8>, EngineError> {
        Ok(self.session_mut()?.write_session_params())
    }

    /// Handles of every live torrent; empty when the session is absent.
    #[must_use]
    pub fn handles(&self) -> Vec<TorrentHandle> {
        self.session
            .as_deref()
            .map_or_else(Vec::new, BtSession::torrents)
    }

    /// Status of one torrent.
    #[must_use]
    pub fn status(&self, handle: TorrentHandle) -> Option<TorrentStatus> {
        self.session.as_deref().and_then(|s| s.status(handle))
    }

    /// Session-wide counters; zeroed when the session is absent.
    #[must_use]
    pub fn counters(&self) -> SessionCounters {
        self.session
            .as_deref()
            .map_or_else(SessionCounters::default, BtSession::counters)
    }

    /// Pause the whole session ahead of destruction.
    pub fn pause_session(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.pause();
        }
    }

    /// Drop the session. No alerts are dispatched after this returns.
    pub fn destroy_session(&mut self) {
        self.session = None;
    }

    /// Direct access to the session for tests that drive the simulator.
    #[must_use]
    pub fn session_for_test(&mut self) -> Option<&mut (dyn BtSession + 'static)> {
        self.session.as_deref_mut()
    }

    fn session_mut(&mut self) -> Result<&mut (dyn BtSession + 'static), EngineError> {
        self.session
            .as_deref_mut()
            .ok_or(EngineError::SessionNotRunning)
    }
}

impl Default for TorrentManager {
    fn default() -> Self {
        Self::new()
    }
}

const fn limit_bps(kbps: Option<u32>, enabled: Option<bool>) -> Option<i64> {
    match (kbps, enabled) {
        (_, Some(false)) | (None, _) => None,
        (Some(kbps), _) => Some(kbps as i64 * 1024),
    }
}

/// Route one alert to the sink, resolving handles into ids and hashes.
fn dispatch(session: &mut dyn BtSession, ids: &mut IdMap, sink: &mut dyn AlertSink, alert: Alert) {
    match alert {
        Alert::AddTorrent {
            handle: _,
            hash,
            error,
        } => match error {
            Some(message) => sink.on_add_torrent_failed(&hash, &message),
            None => {
                if !hash.is_zero() {
                    ids.assign(hash);
                }
            }
        },
        Alert::TorrentFinished { status } => {
            let hash = status.info_hashes.best();
            if hash.is_zero() {
                return;
            }
            let id = ids.assign(hash);
            sink.on_torrent_finished(id, &status);
        }
        Alert::SaveResumeData { handle, hash, blob } => {
            match hash.filter(|hash| !hash.is_zero()) {
                Some(hash) => {
                    sink.on_resume_data(&hash, &blob);
                    sink.on_resume_hash_completed(&hash);
                }
                None => resume_fallback(session, sink, handle),
            }
        }
        Alert::SaveResumeDataFailed {
            handle,
            hash,
            message,
        } => {
            warn!(handle = handle.raw(), message, "resume save failed");
            match hash.filter(|hash| !hash.is_zero()) {
                Some(hash) => sink.on_resume_hash_completed(&hash),
                None => resume_fallback(session, sink, handle),
            }
        }
        Alert::MetadataReceived { handle } => {
            // Checkpoint immediately so the new metadata survives a crash.
            if let Err(err) = session.save_resume_data(handle) {
                debug!(handle = handle.raw(), error = %err, "post-metadata resume request failed");
            }
            let Some(hash) = session.hash_of(handle) else {
                return;
            };
            if hash.is_zero() {
                return;
            }
            ids.assign(hash);
            let Some(blob) = session.torrent_metadata(handle) else {
                return;
            };
            if blob.is_empty() {
                return;
            }
            if let Some((path, bytes)) = sink.persist_metadata(&hash, &blob) {
                sink.on_metadata_persisted(&hash, &path, bytes);
            }
        }
        Alert::MetadataFailed { handle, message } => {
            if let Some(id) = resolve_id(session, ids, handle) {
                sink.on_metadata_failed(id, &message);
            }
        }
        Alert::StateUpdate { statuses } => {
            let updates: Vec<(RpcId, TorrentStatus)> = statuses
                .into_iter()
                .filter_map(|status| {
                    let hash = status.info_hashes.best();
                    if hash.is_zero() {
                        return None;
                    }
                    Some((ids.assign(hash), status))
                })
                .collect();
            if !updates.is_empty() {
                sink.on_state_update(&updates);
            }
        }
        Alert::ListenSucceeded { endpoint } => sink.on_listen_succeeded(&endpoint),
        Alert::ListenFailed { endpoint, message } => sink.on_listen_failed(&endpoint, &message),
        Alert::FileError {
            handle,
            path,
            message,
        } => {
            if let Some(id) = resolve_id(session, ids, handle) {
                sink.on_file_error(id, &path, &message);
            }
        }
        Alert::TrackerError {
            handle,
            url,
            message,
        } => {
            if let Some(id) = resolve_id(session, ids, handle) {
                sink.on_tracker_error(id, &url, &message);
            }
        }
        Alert::TorrentDeleteFailed { hash, message } => sink.on_delete_failed(&hash, &message),
        Alert::PortmapError { message } => sink.on_portmap_error(&message),
        Alert::StorageMoved { handle, path } => {
            if let Some((id, hash)) = resolve(session, ids, handle) {
                sink.on_storage_moved(id, &hash, &path);
            }
        }
        Alert::StorageMovedFailed { handle, message } => {
            if let Some((id, hash)) = resolve(session, ids, handle) {
                sink.on_storage_moved_failed(id, &hash, &message);
            }
        }
        Alert::FastresumeRejected { handle, message } => {
            if let Some((id, hash)) = resolve(session, ids, handle) {
                sink.on_fastresume_rejected(id, &hash, &message);
            }
        }
    }
}

/// The save-resume fallback chain: a live handle completes by hash, a live
/// handle with no identity defers the forced flush, and a handle that has
/// already been removed is a no-op that must not re-arm the deadline.
fn resume_fallback(session: &dyn BtSession, sink: &mut dyn AlertSink, handle: TorrentHandle) {
    match session.hash_of(handle) {
        Some(hash) if !hash.is_zero() => sink.on_resume_hash_completed(&hash),
        Some(_) => sink.extend_resume_deadline(),
        None => debug!(
            handle = handle.raw(),
            "resume alert for a removed torrent; ignoring"
        ),
    }
}

fn resolve(
    session: &dyn BtSession,
    ids: &mut IdMap,
    handle: TorrentHandle,
) -> Option<(RpcId, InfoHash)> {
    let hash = session.hash_of(handle)?;
    if hash.is_zero() {
        return None;
    }
    Some((ids.assign(hash), hash))
}

fn resolve_id(session: &dyn BtSession, ids: &mut IdMap, handle: TorrentHandle) -> Option<RpcId> {
    resolve(session, ids, handle).map(|(id, _)| id)
}
