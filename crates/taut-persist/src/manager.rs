use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use taut_core::InfoHash;

use crate::atomic::write_atomic;
use crate::error::PersistError;
use crate::layout::DataLayout;
use crate::state::{LoadedState, PersistedState};

/// How often resume blobs are force-flushed for live torrents.
pub const RESUME_FLUSH_INTERVAL: Duration = Duration::from_secs(60);

/// Durable storage facade owned by the engine thread.
///
/// Every write goes through the atomic temp+fsync+rename protocol, so an
/// interrupted flush never corrupts the artifact it was replacing. The
/// manager also tracks the resume-save deadline used to batch forced
/// resume flushes.
#[derive(Debug)]
pub struct PersistenceManager {
    layout: DataLayout,
    resume_interval: Duration,
    next_resume_flush: Instant,
}

impl PersistenceManager {
    /// Build a manager over `layout` with the default resume interval.
    #[must_use]
    pub fn new(layout: DataLayout) -> Self {
        Self::with_resume_interval(layout, RESUME_FLUSH_INTERVAL)
    }

    /// Build a manager with a custom resume-flush interval (tests).
    #[must_use]
    pub fn with_resume_interval(layout: DataLayout, resume_interval: Duration) -> Self {
        Self {
            layout,
            resume_interval,
            next_resume_flush: Instant::now() + resume_interval,
        }
    }

    /// The on-disk layout this manager writes under.
    #[must_use]
    pub fn layout(&self) -> &DataLayout {
        &self.layout
    }

    // --- state document ------------------------------------------------

    /// Load `state.json`. A missing file yields defaults; a present but
    /// undecodable file is [`PersistError::Corrupt`].
    ///
    /// # Errors
    ///
    /// Returns [`PersistError::Io`] or [`PersistError::Corrupt`].
    pub fn load_state(&self) -> Result<LoadedState, PersistError> {
        let path = self.layout.state_file();
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(LoadedState {
                    state: PersistedState::default(),
                    existed: false,
                });
            }
            Err(err) => return Err(PersistError::io(&path, err)),
        };
        let state = serde_json::from_slice(&bytes)
            .map_err(|source| PersistError::Corrupt { path, source })?;
        Ok(LoadedState {
            state,
            existed: true,
        })
    }

    /// Atomically replace `state.json` with `state`.
    ///
    /// # Errors
    ///
    /// Returns [`PersistError::Encode`] or [`PersistError::Io`]; the prior
    /// document survives any failure.
    pub fn save_state(&self, state: &PersistedState) -> Result<(), PersistError> {
        let payload =
            serde_json::to_vec_pretty(state).map_err(|source| PersistError::Encode { source })?;
        let path = self.layout.state_file();
        write_atomic(&path, &payload).map_err(|err| PersistError::io(&path, err))?;
        debug!(path = %path.display(), bytes = payload.len(), "session state persisted");
        Ok(())
    }

    // --- resume blobs --------------------------------------------------

    /// Persist a resume blob for `hash`.
    ///
    /// # Errors
    ///
    /// Returns [`PersistError::Io`] on write failure.
    pub fn write_resume(&self, hash: &InfoHash, blob: &[u8]) -> Result<(), PersistError> {
        let path = self.layout.resume_file(hash);
        write_atomic(&path, blob).map_err(|err| PersistError::io(&path, err))
    }

    /// Delete the resume blob for `hash`, if one exists.
    ///
    /// # Errors
    ///
    /// Returns [`PersistError::Io`] on anything other than a missing file.
    pub fn remove_resume(&self, hash: &InfoHash) -> Result<(), PersistError> {
        let path = self.layout.resume_file(hash);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(PersistError::io(&path, err)),
        }
    }

    /// Enumerate every persisted resume blob for the warm-up phase.
    /// Files that do not look like `<hex>.resume` are skipped with a
    /// warning.
    ///
    /// # Errors
    ///
    /// Returns [`PersistError::Io`] when the directory or a blob cannot be
    /// read.
    pub fn load_resume_blobs(&self) -> Result<Vec<(InfoHash, Vec<u8>)>, PersistError> {
        let dir = self.layout.resume_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(PersistError::io(&dir, err)),
        };

        let mut blobs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| PersistError::io(&dir, err))?;
            let path = entry.path();
            let Some(hash) = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(DataLayout::hash_from_resume_name)
            else {
                warn!(path = %path.display(), "skipping foreign file in resume directory");
                continue;
            };
            let blob = fs::read(&path).map_err(|err| PersistError::io(&path, err))?;
            blobs.push((hash, blob));
        }
        blobs.sort_by_key(|(hash, _)| *hash);
        Ok(blobs)
    }

    // --- metadata files ------------------------------------------------

    /// Path a metadata file for `hash` would live at.
    #[must_use]
    pub fn metadata_file_path(&self, hash: &InfoHash) -> PathBuf {
        self.layout.metadata_file(hash)
    }

    /// Whether a metadata file has already been persisted for `hash`.
    #[must_use]
    pub fn has_metadata(&self, hash: &InfoHash) -> bool {
        self.layout.metadata_file(hash).exists()
    }

    /// Persist the `.torrent` payload for `hash`, returning its path.
    ///
    /// # Errors
    ///
    /// Returns [`PersistError::Io`] on write failure.
    pub fn write_metadata(&self, hash: &InfoHash, blob: &[u8]) -> Result<PathBuf, PersistError> {
        let path = self.layout.metadata_file(hash);
        write_atomic(&path, blob).map_err(|err| PersistError::io(&path, err))?;
        Ok(path)
    }

    // --- library session params ----------------------------------------

    /// Persist the library's serialized session state (`.session_state`).
    ///
    /// # Errors
    ///
    /// Returns [`PersistError::Io`] on write failure.
    pub fn write_session_params(&self, blob: &[u8]) -> Result<(), PersistError> {
        let path = self.layout.session_params_file();
        write_atomic(&path, blob).map_err(|err| PersistError::io(&path, err))
    }

    /// Read back `.session_state`, `None` when absent.
    ///
    /// # Errors
    ///
    /// Returns [`PersistError::Io`] when the file exists but cannot be
    /// read.
    pub fn load_session_params(&self) -> Result<Option<Vec<u8>>, PersistError> {
        let path = self.layout.session_params_file();
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(PersistError::io(&path, err)),
        }
    }

    // --- resume-save batching ------------------------------------------

    /// Defer the next forced resume flush by one interval. Called when a
    /// save-resume alert arrives that cannot be correlated to a torrent,
    /// which would otherwise trigger a tight save loop.
    pub fn extend_resume_deadline(&mut self) {
        self.next_resume_flush = Instant::now() + self.resume_interval;
    }

    /// Whether the periodic resume flush is due at `now`.
    #[must_use]
    pub fn resume_flush_due(&self, now: Instant) -> bool {
        now >= self.next_resume_flush
    }

    /// Record that a forced resume flush ran at `now`.
    pub fn mark_resume_flush(&mut self, now: Instant) {
        self.next_resume_flush = now + self.resume_interval;
    }
}
