use std::time::{Duration, Instant};

use tracing::warn;

use taut_persist::{PersistedState, PersistenceManager};

/// Default debounce interval between a settings mutation and its flush.
pub const SETTINGS_FLUSH_INTERVAL: Duration = Duration::from_millis(500);

/// Debounces settings persistence.
///
/// Mutations mark the state dirty; the flush happens on the first tick at
/// or past `next_flush`, so a burst of changes costs one write. A failed
/// flush keeps the dirty flag and retries one interval later — the atomic
/// write protocol guarantees the previous document survived.
#[derive(Debug)]
pub struct SettingsFlush {
    interval: Duration,
    dirty: bool,
    next_flush: Instant,
}

impl SettingsFlush {
    /// A clean service with the given debounce interval.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            dirty: false,
            next_flush: Instant::now(),
        }
    }

    /// Record a settings mutation observed at `now`. The first mark after
    /// a flush arms the debounce timer; later marks ride the same window.
    pub fn mark_dirty(&mut self, now: Instant) {
        if !self.dirty {
            self.dirty = true;
            self.next_flush = now + self.interval;
        }
    }

    /// Whether unflushed changes exist.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Whether a flush is due at `now`.
    #[must_use]
    pub fn due(&self, now: Instant) -> bool {
        self.dirty && now >= self.next_flush
    }

    /// Flush `state` if due. Returns whether a write happened.
    pub fn tick(
        &mut self,
        now: Instant,
        state: &PersistedState,
        persist: &PersistenceManager,
    ) -> bool {
        if !self.due(now) {
            return false;
        }
        self.write(state, persist, now)
    }

    /// Unconditional flush, used at shutdown: writes even when clean so the
    /// document on disk always reflects the final in-memory state.
    pub fn flush_now(&mut self, state: &PersistedState, persist: &PersistenceManager) {
        self.write(state, persist, Instant::now());
    }

    fn write(&mut self, state: &PersistedState, persist: &PersistenceManager, now: Instant) -> bool {
        match persist.save_state(state) {
            Ok(()) => {
                self.dirty = false;
                true
            }
            Err(err) => {
                warn!(error = %err, "settings flush failed; retrying next interval");
                self.next_flush = now + self.interval;
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taut_persist::DataLayout;
    use tempfile::TempDir;

    fn persist(dir: &TempDir) -> PersistenceManager {
        let layout = DataLayout::new(dir.path());
        layout.ensure().unwrap();
        PersistenceManager::new(layout)
    }

    #[test]
    fn flush_waits_for_the_debounce_window() {
        let dir = TempDir::new().unwrap();
        let persist = persist(&dir);
        let mut flush = SettingsFlush::new(Duration::from_millis(500));
        let state = PersistedState::default();

        let t0 = Instant::now();
        flush.mark_dirty(t0);
        assert!(!flush.tick(t0, &state, &persist));
        assert!(!flush.tick(t0 + Duration::from_millis(499), &state, &persist));
        assert!(flush.tick(t0 + Duration::from_millis(500), &state, &persist));
        assert!(!flush.is_dirty());
        assert!(persist.layout().state_file().exists());
    }

    #[test]
    fn later_marks_ride_the_first_window() {
        let dir = TempDir::new().unwrap();
        let persist = persist(&dir);
        let mut flush = SettingsFlush::new(Duration::from_millis(100));
        let state = PersistedState::default();

        let t0 = Instant::now();
        flush.mark_dirty(t0);
        flush.mark_dirty(t0 + Duration::from_millis(90));
        // The second mark must not push the deadline past t0 + interval.
        assert!(flush.tick(t0 + Duration::from_millis(100), &state, &persist));
    }

    #[test]
    fn flush_now_writes_even_when_clean() {
        let dir = TempDir::new().unwrap();
        let persist = persist(&dir);
        let mut flush = SettingsFlush::new(Duration::from_secs(30));
        let state = PersistedState::default();

        flush.flush_now(&state, &persist);
        assert!(persist.layout().state_file().exists());
        assert!(!flush.is_dirty());
    }

    #[test]
    fn failed_flush_keeps_the_dirty_flag() {
        let dir = TempDir::new().unwrap();
        // No ensure(): the root exists, but state.json's parent is a file,
        // so the atomic write fails.
        let bogus = dir.path().join("root-as-file");
        std::fs::write(&bogus, b"x").unwrap();
        let persist = PersistenceManager::new(DataLayout::new(bogus.join("nested")));

        let mut flush = SettingsFlush::new(Duration::from_millis(10));
        let state = PersistedState::default();
        let t0 = Instant::now();
        flush.mark_dirty(t0);
        assert!(!flush.tick(t0 + Duration::from_millis(10), &state, &persist));
        assert!(flush.is_dirty());
    }
}
