use std::path::Path;

use taut_core::InfoHash;

use crate::alert::Alert;
use crate::error::SessionError;
use crate::pack::{AddTorrentParams, IpFilter, SessionParams, SettingsPack};
use crate::sim::SimSession;
use crate::status::{SessionCounters, TorrentHandle, TorrentStatus};

/// The command/alert surface of the underlying BitTorrent library.
///
/// Mirrors the shape of libtorrent's session object: mutations are cheap
/// synchronous calls whose outcomes arrive later as [`Alert`]s, and
/// observations (`torrents`, `status`) read the session's current state.
/// The engine owns exactly one `BtSession` and drives it from a single
/// thread; implementations need `Send` only so the session can migrate onto
/// that thread.
pub trait BtSession: Send {
    /// Apply a settings pack to the running session.
    fn apply_settings(&mut self, pack: &SettingsPack);

    /// Toggle peer exchange without a full settings apply.
    fn set_pex_enabled(&mut self, enabled: bool);

    /// Replace the session's IP filter.
    fn set_ip_filter(&mut self, filter: IpFilter);

    /// Request a torrent admission; the outcome arrives as
    /// [`Alert::AddTorrent`].
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidSource`] when the request cannot even
    /// be queued.
    fn async_add_torrent(&mut self, params: AddTorrentParams) -> Result<(), SessionError>;

    /// Remove a torrent, optionally deleting its payload.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::UnknownTorrent`] for a stale handle.
    fn remove_torrent(&mut self, handle: TorrentHandle, delete_data: bool)
    -> Result<(), SessionError>;

    /// Pause a torrent.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::UnknownTorrent`] for a stale handle.
    fn pause_torrent(&mut self, handle: TorrentHandle) -> Result<(), SessionError>;

    /// Resume a paused torrent.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::UnknownTorrent`] for a stale handle.
    fn resume_torrent(&mut self, handle: TorrentHandle) -> Result<(), SessionError>;

    /// Re-verify on-disk data against piece hashes.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::UnknownTorrent`] for a stale handle.
    fn force_recheck(&mut self, handle: TorrentHandle) -> Result<(), SessionError>;

    /// Set per-torrent rate limits in bytes per second; `None` lifts the
    /// respective cap.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::UnknownTorrent`] for a stale handle.
    fn set_torrent_limits(
        &mut self,
        handle: TorrentHandle,
        download_bps: Option<i64>,
        upload_bps: Option<i64>,
    ) -> Result<(), SessionError>;

    /// Set a torrent's bandwidth priority relative to its peers.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::UnknownTorrent`] for a stale handle.
    fn set_torrent_priority(
        &mut self,
        handle: TorrentHandle,
        priority: i32,
    ) -> Result<(), SessionError>;

    /// Relocate a torrent's storage; completion arrives as
    /// [`Alert::StorageMoved`] or [`Alert::StorageMovedFailed`]. With
    /// `delete_source` the payload is moved and the old copy removed;
    /// without it the torrent is re-pointed at `target` and existing data
    /// is left behind.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::UnknownTorrent`] for a stale handle.
    fn move_storage(
        &mut self,
        handle: TorrentHandle,
        target: &Path,
        delete_source: bool,
    ) -> Result<(), SessionError>;

    /// Request a resume blob; the payload arrives as
    /// [`Alert::SaveResumeData`].
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::UnknownTorrent`] for a stale handle.
    fn save_resume_data(&mut self, handle: TorrentHandle) -> Result<(), SessionError>;

    /// Ask the session to post a [`Alert::StateUpdate`] batch.
    fn post_torrent_updates(&mut self);

    /// Drain all pending alerts into `buffer`, preserving order.
    fn pop_alerts(&mut self, buffer: &mut Vec<Alert>);

    /// Handles of every live torrent.
    fn torrents(&self) -> Vec<TorrentHandle>;

    /// Handle currently bound to `hash`, `None` when no such torrent lives
    /// in the session.
    fn find_torrent(&self, hash: InfoHash) -> Option<TorrentHandle>;

    /// Current status of one torrent, `None` for a stale handle.
    fn status(&self, handle: TorrentHandle) -> Option<TorrentStatus>;

    /// Identity of one torrent, `None` for a stale handle.
    fn hash_of(&self, handle: TorrentHandle) -> Option<InfoHash>;

    /// The torrent's serialized info dictionary as a `.torrent` payload,
    /// `None` until metadata is known.
    fn torrent_metadata(&self, handle: TorrentHandle) -> Option<Vec<u8>>;

    /// Session-wide counters.
    fn counters(&self) -> SessionCounters;

    /// Serialize library state (DHT table, …) for `.session_state`.
    fn write_session_params(&self) -> Vec<u8>;

    /// Pause the whole session; the last call before destruction.
    fn pause(&mut self);

    /// Escape hatch to the concrete backend, for embedders and test
    /// harnesses that need backend-specific controls. The engine core
    /// never calls this.
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;
}

/// Construct the session backend.
///
/// The native libtorrent adapter is an external collaborator; this build
/// wires the in-memory [`SimSession`] into the same seam.
///
/// # Errors
///
/// Returns [`SessionError::Construction`] when the backend cannot start.
pub fn create_session(params: SessionParams) -> Result<Box<dyn BtSession>, SessionError> {
    Ok(Box::new(SimSession::create(params)?))
}
