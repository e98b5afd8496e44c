use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};

use taut_core::{RpcId, SessionSnapshot, TorrentSnapshot, TorrentState};
use taut_session::TorrentStatus;

use crate::manager::TorrentManager;

/// Callbacks the snapshot builder pulls per-torrent state through.
///
/// The engine loop implements this on its own state; the builder stays
/// ignorant of where revisions, labels, and priorities actually live.
#[allow(unused_variables)]
pub trait SnapshotHooks {
    /// Bookkeeping hook invoked once per live torrent per build, before the
    /// cache is consulted (used to lazily create per-torrent state).
    fn on_visit(&mut self, id: RpcId, status: &TorrentStatus) {}

    /// Current revision of the torrent, creating the counter on first
    /// sight.
    fn ensure_revision(&mut self, id: RpcId) -> u64;

    /// Build a fresh snapshot entry from the live status.
    fn build_entry(
        &mut self,
        id: RpcId,
        status: &TorrentStatus,
        revision: u64,
        added_time: DateTime<Utc>,
    ) -> TorrentSnapshot;

    /// Labels to overlay on a freshly built entry.
    fn labels_for(&mut self, id: RpcId, hex: &str) -> Vec<String> {
        Vec::new()
    }

    /// Bandwidth priority to overlay on a freshly built entry.
    fn priority_for(&mut self, id: RpcId) -> i32 {
        0
    }
}

/// The atomically swapped snapshot pointer.
///
/// Readers clone the inner `Arc` and hold an owning reference to whichever
/// snapshot was current at the instant of the load; the engine thread
/// replaces the pointer wholesale once per tick. No reader ever observes a
/// partially built snapshot.
#[derive(Debug)]
pub struct SnapshotSlot {
    inner: RwLock<Arc<SessionSnapshot>>,
}

impl SnapshotSlot {
    /// A slot holding the empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Arc::new(SessionSnapshot::default())),
        }
    }

    /// Take an owning reference to the current snapshot.
    #[must_use]
    pub fn load(&self) -> Arc<SessionSnapshot> {
        Arc::clone(
            &self
                .inner
                .read()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    /// Publish a new snapshot.
    pub fn store(&self, snapshot: Arc<SessionSnapshot>) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = snapshot;
    }
}

impl Default for SnapshotSlot {
    fn default() -> Self {
        Self::new()
    }
}

struct CacheSlot {
    entry: Arc<TorrentSnapshot>,
    added_time: DateTime<Utc>,
}

/// Result of one snapshot build.
pub struct BuildOutcome {
    /// The snapshot that was just published.
    pub snapshot: Arc<SessionSnapshot>,
    /// Ids visited this cycle, for purging the id maps.
    pub seen: HashSet<RpcId>,
}

/// Produces one immutable [`SessionSnapshot`] per tick, reusing cached
/// per-torrent entries whose revision has not moved.
pub struct SnapshotBuilder {
    cache: HashMap<RpcId, CacheSlot>,
    slot: Arc<SnapshotSlot>,
}

impl SnapshotBuilder {
    /// A builder publishing into `slot`.
    #[must_use]
    pub fn new(slot: Arc<SnapshotSlot>) -> Self {
        Self {
            cache: HashMap::new(),
            slot,
        }
    }

    /// The slot this builder publishes into.
    #[must_use]
    pub fn slot(&self) -> &Arc<SnapshotSlot> {
        &self.slot
    }

    /// Walk the live torrents, assign ids for newly seen hashes, rebuild
    /// stale entries, accumulate aggregates, and publish the result.
    ///
    /// Purging ids absent from the returned `seen` set is left to the
    /// caller.
    pub fn build(
        &mut self,
        manager: &mut TorrentManager,
        hooks: &mut impl SnapshotHooks,
    ) -> BuildOutcome {
        let handles = manager.handles();
        let mut torrents: Vec<Arc<TorrentSnapshot>> = Vec::with_capacity(handles.len());
        let mut seen = HashSet::with_capacity(handles.len());
        let mut next_cache = HashMap::with_capacity(handles.len());
        let mut snapshot = SessionSnapshot::default();

        for handle in handles {
            let Some(status) = manager.status(handle) else {
                continue;
            };
            let hash = status.info_hashes.best();
            if hash.is_zero() {
                continue;
            }
            let id = manager.assign_rpc_id(hash);
            seen.insert(id);
            hooks.on_visit(id, &status);

            let revision = hooks.ensure_revision(id);
            let cached = self.cache.remove(&id);
            let added_time = cached
                .as_ref()
                .map_or_else(Utc::now, |slot| slot.added_time);

            let entry = match cached {
                Some(slot) if slot.entry.revision == revision => slot.entry,
                _ => {
                    let mut entry = hooks.build_entry(id, &status, revision, added_time);
                    entry.labels = hooks.labels_for(id, &hash.to_hex());
                    entry.bandwidth_priority = hooks.priority_for(id);
                    Arc::new(entry)
                }
            };

            if entry.state == TorrentState::Seeding {
                snapshot.seeding_count += 1;
            }
            if entry.error_code != 0 {
                snapshot.error_count += 1;
            }
            if entry.paused {
                snapshot.paused_count += 1;
            } else if matches!(
                entry.state,
                TorrentState::Downloading | TorrentState::Seeding
            ) {
                snapshot.active_count += 1;
            }
            snapshot.download_rate += entry.download_rate;
            snapshot.upload_rate += entry.upload_rate;

            next_cache.insert(
                id,
                CacheSlot {
                    entry: Arc::clone(&entry),
                    added_time,
                },
            );
            torrents.push(entry);
        }

        torrents.sort_by_key(|entry| entry.id);
        snapshot.torrent_count = torrents.len();
        snapshot.torrents = torrents;
        snapshot.dht_nodes = manager.counters().dht_nodes;

        self.cache = next_cache;
        let snapshot = Arc::new(snapshot);
        self.slot.store(Arc::clone(&snapshot));
        BuildOutcome { snapshot, seen }
    }

    /// Cached entry for `id`, if any (tests and diagnostics).
    #[must_use]
    pub fn cached(&self, id: RpcId) -> Option<&Arc<TorrentSnapshot>> {
        self.cache.get(&id).map(|slot| &slot.entry)
    }
}

/// Translate a live status into a snapshot entry. Rates are clamped at
/// zero; labels and priority are overlaid by the builder afterwards.
#[must_use]
pub fn entry_from_status(
    id: RpcId,
    status: &TorrentStatus,
    revision: u64,
    added_time: DateTime<Utc>,
) -> TorrentSnapshot {
    TorrentSnapshot {
        id,
        info_hash: status.info_hashes.best(),
        name: status.name.clone(),
        state: status.state,
        paused: status.paused,
        progress: status.progress,
        download_rate: status.download_payload_rate.max(0).unsigned_abs(),
        upload_rate: status.upload_payload_rate.max(0).unsigned_abs(),
        total_done: status.total_done,
        total_size: status.total_size,
        total_uploaded: status.total_uploaded,
        total_downloaded: status.total_downloaded,
        save_path: status.save_path.clone(),
        labels: Vec::new(),
        bandwidth_priority: 0,
        error_code: status.error_code,
        error_message: status.error_message.clone(),
        added_time,
        revision,
    }
}
