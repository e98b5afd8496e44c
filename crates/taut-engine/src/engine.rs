use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::Context;
use tracing::{debug, error, info, warn};

use taut_core::{
    AddTorrentRequest, InfoHash, RpcId, SessionSnapshot, SettingsUpdate, TorrentSource,
};
use taut_persist::{PersistedState, PersistenceManager};
use taut_session::{AddTorrentParams, IpFilter, SessionParams, SettingsPack};

use crate::error::EngineError;
use crate::manager::TorrentManager;
use crate::queue::{CommandQueue, IDLE_SLEEP, MAX_PENDING_TASKS};
use crate::settings::{SETTINGS_FLUSH_INTERVAL, SettingsFlush};
use crate::snapshot::{SnapshotBuilder, SnapshotSlot};
use crate::state::{EngineState, PendingMoves};

/// A deferred operation executed on the engine thread.
pub type Task = Box<dyn FnOnce(&mut EngineCtx<'_>) + Send + 'static>;

/// What a [`Task`] gets to touch while it runs.
pub struct EngineCtx<'a> {
    /// The session owner and id maps.
    pub manager: &'a mut TorrentManager,
    /// Revisions, user state, settings, and persistence.
    pub state: &'a mut EngineState,
}

/// Wrap a fallible command body into a [`Task`]: a failure is logged with
/// its full context chain and swallowed, the loop's policy for every
/// queued command.
fn command_task<F>(command: &'static str, body: F) -> Task
where
    F: FnOnce(&mut EngineCtx<'_>) -> anyhow::Result<()> + Send + 'static,
{
    Box::new(move |ctx| {
        if let Err(err) = body(ctx) {
            warn!(command, error = format!("{err:#}"), "command failed");
        }
    })
}

/// Tunables for the engine loop; the defaults are the production values.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Command queue capacity.
    pub max_pending_tasks: usize,
    /// Idle park duration per loop iteration.
    pub idle_sleep: Duration,
    /// Settings flush debounce interval.
    pub settings_flush_interval: Duration,
    /// How long shutdown waits for in-flight resume saves.
    pub shutdown_resume_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_pending_tasks: MAX_PENDING_TASKS,
            idle_sleep: IDLE_SLEEP,
            settings_flush_interval: SETTINGS_FLUSH_INTERVAL,
            shutdown_resume_timeout: Duration::from_secs(10),
        }
    }
}

/// Everything the engine needs to come up.
pub struct EngineConfig {
    /// Durable storage rooted at the data directory.
    pub persist: PersistenceManager,
    /// The recovered (or default) state document.
    pub state: PersistedState,
    /// Serialized library state from `.session_state`, if present.
    pub session_state_blob: Option<Vec<u8>>,
    /// IP filter assembled from the blocklist file, if present.
    pub blocklist: Option<IpFilter>,
    /// Resume blobs to replay as add tasks during warm-up.
    pub warm_start: Vec<(InfoHash, Vec<u8>)>,
    /// Loop tunables.
    pub options: EngineOptions,
}

/// The single-threaded engine loop (session, snapshots, persistence).
///
/// Construct with [`Engine::start`], then either [`Engine::run`] on the
/// current thread or [`Engine::spawn`] onto a dedicated one. All outside
/// interaction goes through the [`EngineHandle`].
pub struct Engine {
    manager: TorrentManager,
    state: EngineState,
    builder: SnapshotBuilder,
    queue: Arc<CommandQueue<Task>>,
    shutdown: Arc<AtomicBool>,
    options: EngineOptions,
}

impl Engine {
    /// Bring up the session and prepare the loop. Session construction
    /// failure is fatal and aborts startup.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Session`] when the underlying session cannot
    /// be created.
    pub fn start(config: EngineConfig) -> Result<(Self, EngineHandle), EngineError> {
        let EngineConfig {
            persist,
            state: document,
            session_state_blob,
            blocklist,
            warm_start,
            options,
        } = config;

        let mut manager = TorrentManager::new();
        let pairs = document.rpc_id_pairs();
        manager.recover_rpc_mappings(&pairs);
        info!(recovered = pairs.len(), "rpc id mappings recovered");

        let settings = document.settings.clone();
        manager.start_session(SessionParams {
            settings: SettingsPack::from_settings(&settings),
            state_blob: session_state_blob,
        })?;
        if let Some(filter) = blocklist {
            info!(ranges = filter.len(), "applying blocklist");
            manager.set_ip_filter(filter)?;
        }

        let labels: HashMap<RpcId, Vec<String>> = document.labels.into_iter().collect();
        let priorities: HashMap<RpcId, i32> = document.priorities.into_iter().collect();
        let state = EngineState::new(
            persist,
            settings,
            SettingsFlush::new(options.settings_flush_interval),
            labels,
            priorities,
        );

        let slot = Arc::new(SnapshotSlot::new());
        let queue = Arc::new(CommandQueue::new(options.max_pending_tasks));
        let shutdown = Arc::new(AtomicBool::new(false));
        let handle = EngineHandle {
            queue: Arc::clone(&queue),
            slot: Arc::clone(&slot),
            shutdown: Arc::clone(&shutdown),
            pending_moves: state.pending_moves(),
        };

        let engine = Self {
            manager,
            state,
            builder: SnapshotBuilder::new(slot),
            queue,
            shutdown,
            options,
        };

        let replayed = warm_start.len();
        for (hash, blob) in warm_start {
            engine.queue.push_unbounded(command_task("resume_replay", move |ctx| {
                let params = AddTorrentParams {
                    source: TorrentSource::resume(blob),
                    save_path: ctx.state.default_save_path(),
                    paused: false,
                };
                ctx.manager
                    .async_add_torrent(params)
                    .with_context(|| format!("replaying resume blob for {hash}"))
            }));
        }
        if replayed > 0 {
            info!(count = replayed, "queued resume blobs for warm start");
        }

        Ok((engine, handle))
    }

    /// Run the loop on the current thread until shutdown, then perform the
    /// final flush sequence.
    pub fn run(mut self) {
        info!("engine loop running");
        loop {
            self.tick();
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
            self.queue
                .wait_for_work(self.options.idle_sleep, &self.shutdown);
        }
        self.shutdown_sequence();
        info!("engine loop stopped");
    }

    /// Run the loop on a dedicated OS thread.
    ///
    /// # Errors
    ///
    /// Propagates the thread spawn failure.
    pub fn spawn(self) -> std::io::Result<EngineThread> {
        let inner = thread::Builder::new()
            .name("taut-engine".to_string())
            .spawn(move || self.run())?;
        Ok(EngineThread { inner })
    }

    /// One canonical iteration: drain commands, pump alerts, rebuild and
    /// publish the snapshot, reap departed ids, flush settings if due.
    fn tick(&mut self) {
        self.process_tasks();
        self.maybe_request_resume_saves();
        self.manager.process_alerts(&mut self.state);

        let outcome = self.builder.build(&mut self.manager, &mut self.state);
        let removed = self.manager.purge_missing_ids(&outcome.seen);
        if !removed.is_empty() {
            self.state.forget(&removed);
        }
        if self.manager.ids_changed() {
            self.state.mark_settings_dirty(Instant::now());
        }
        self.flush_settings(Instant::now());
    }

    fn process_tasks(&mut self) {
        let batch = self.queue.drain();
        if batch.is_empty() {
            return;
        }
        debug!(count = batch.len(), "executing command batch");
        for task in batch {
            let mut ctx = EngineCtx {
                manager: &mut self.manager,
                state: &mut self.state,
            };
            if catch_unwind(AssertUnwindSafe(|| task(&mut ctx))).is_err() {
                error!("queued task panicked; continuing with remaining tasks");
            }
        }
    }

    fn maybe_request_resume_saves(&mut self) {
        let now = Instant::now();
        if !self.state.persist.resume_flush_due(now) {
            return;
        }
        for hash in self.manager.request_resume_save_all() {
            self.state.note_resume_requested(hash);
        }
        self.state.persist.mark_resume_flush(now);
    }

    fn flush_settings(&mut self, now: Instant) {
        if !self.state.flush.due(now) {
            return;
        }
        let document = self.state.export_state(self.manager.export_rpc_ids());
        let _ = self.state.flush.tick(now, &document, &self.state.persist);
    }

    /// Drain one final task cycle, wait (bounded) for in-flight resume
    /// saves, flush settings and library state, then pause and destroy the
    /// session. Nothing is published after this runs.
    fn shutdown_sequence(&mut self) {
        debug!("shutdown: final command drain");
        self.process_tasks();

        for hash in self.manager.request_resume_save_all() {
            self.state.note_resume_requested(hash);
        }
        let deadline = Instant::now() + self.options.shutdown_resume_timeout;
        while !self.state.pending_resume_is_empty() && Instant::now() < deadline {
            self.manager.process_alerts(&mut self.state);
            if !self.state.pending_resume_is_empty() {
                thread::sleep(Duration::from_millis(10));
            }
        }
        if !self.state.pending_resume_is_empty() {
            warn!("shutdown timed out waiting for resume saves");
        }

        let document = self.state.export_state(self.manager.export_rpc_ids());
        self.state.flush.flush_now(&document, &self.state.persist);

        match self.manager.write_session_params() {
            Ok(blob) => {
                if let Err(err) = self.state.persist.write_session_params(&blob) {
                    warn!(error = %err, "failed to persist library session state");
                }
            }
            Err(err) => warn!(error = %err, "failed to serialize library session state"),
        }

        self.manager.pause_session();
        self.manager.destroy_session();
    }
}

/// Join handle for a spawned engine.
pub struct EngineThread {
    inner: JoinHandle<()>,
}

impl EngineThread {
    /// Wait for the engine thread to finish its shutdown sequence.
    pub fn join(self) {
        if self.inner.join().is_err() {
            error!("engine thread panicked");
        }
    }
}

/// Cloneable, thread-safe handle to a running engine.
///
/// Commands are acknowledged as *queued*, not completed; outcomes surface
/// through subsequent snapshots. `snapshot()` is the only synchronous read
/// and never touches the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    queue: Arc<CommandQueue<Task>>,
    slot: Arc<SnapshotSlot>,
    shutdown: Arc<AtomicBool>,
    pending_moves: PendingMoves,
}

impl EngineHandle {
    /// Enqueue an arbitrary task; blocks while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ShuttingDown`] once [`EngineHandle::stop`]
    /// has been called.
    pub fn submit(&self, task: Task) -> Result<(), EngineError> {
        self.queue.push(task).map_err(|_| EngineError::ShuttingDown)
    }

    /// Queue a torrent admission.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ShuttingDown`] during shutdown.
    pub fn add_torrent(&self, request: AddTorrentRequest) -> Result<(), EngineError> {
        self.submit(command_task("add_torrent", move |ctx| {
            let save_path = request
                .save_path
                .clone()
                .unwrap_or_else(|| ctx.state.default_save_path());
            let params = AddTorrentParams {
                source: request.source,
                save_path,
                paused: request.paused,
            };
            ctx.manager
                .async_add_torrent(params)
                .context("queueing torrent admission")
        }))
    }

    /// Queue a removal, optionally deleting payload data.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ShuttingDown`] during shutdown.
    pub fn remove_torrent(&self, id: RpcId, delete_data: bool) -> Result<(), EngineError> {
        self.submit(command_task("remove_torrent", move |ctx| {
            ctx.manager
                .remove_torrent(id, delete_data)
                .with_context(|| format!("removing torrent {id}"))
        }))
    }

    /// Queue resume-flag toggles for `ids`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ShuttingDown`] during shutdown.
    pub fn start_torrents(&self, ids: Vec<RpcId>) -> Result<(), EngineError> {
        self.submit(Box::new(move |ctx| {
            // One stale id must not stop the rest of the batch.
            for id in ids {
                let started = ctx
                    .manager
                    .resume_torrent(id)
                    .with_context(|| format!("starting torrent {id}"));
                if let Err(err) = started {
                    warn!(error = format!("{err:#}"), "start command failed");
                }
            }
        }))
    }

    /// Queue pause-flag toggles for `ids`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ShuttingDown`] during shutdown.
    pub fn stop_torrents(&self, ids: Vec<RpcId>) -> Result<(), EngineError> {
        self.submit(Box::new(move |ctx| {
            for id in ids {
                let stopped = ctx
                    .manager
                    .pause_torrent(id)
                    .with_context(|| format!("stopping torrent {id}"));
                if let Err(err) = stopped {
                    warn!(error = format!("{err:#}"), "stop command failed");
                }
            }
        }))
    }

    /// Queue force-rechecks for `ids`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ShuttingDown`] during shutdown.
    pub fn recheck(&self, ids: Vec<RpcId>) -> Result<(), EngineError> {
        self.submit(Box::new(move |ctx| {
            for id in ids {
                let rechecked = ctx
                    .manager
                    .recheck_torrent(id)
                    .with_context(|| format!("rechecking torrent {id}"));
                if let Err(err) = rechecked {
                    warn!(error = format!("{err:#}"), "recheck command failed");
                }
            }
        }))
    }

    /// Queue per-torrent bandwidth limits. A 0 kbps value means "no limit"
    /// iff the matching enabled flag is false.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ShuttingDown`] during shutdown.
    pub fn set_bandwidth_limits(
        &self,
        ids: Vec<RpcId>,
        download_kbps: Option<u32>,
        download_enabled: Option<bool>,
        upload_kbps: Option<u32>,
        upload_enabled: Option<bool>,
    ) -> Result<(), EngineError> {
        self.submit(command_task("set_bandwidth_limits", move |ctx| {
            ctx.manager
                .set_torrent_bandwidth_limits(
                    &ids,
                    download_kbps,
                    download_enabled,
                    upload_kbps,
                    upload_enabled,
                )
                .context("applying per-torrent bandwidth limits")
        }))
    }

    /// Queue a partial settings mutation: merged into the durable
    /// settings, pushed to the library, and marked for a debounced flush.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ShuttingDown`] during shutdown.
    pub fn set_settings(&self, update: SettingsUpdate) -> Result<(), EngineError> {
        if update.is_empty() {
            return Ok(());
        }
        self.submit(command_task("set_settings", move |ctx| {
            let pex_toggle = update.pex_enabled;
            update.apply(&mut ctx.state.settings);
            // Dirty before the library call: the merged settings must be
            // flushed even if the session rejects the pack.
            ctx.state.mark_settings_dirty(Instant::now());
            let pack = SettingsPack::from_settings(&ctx.state.settings);
            ctx.manager
                .apply_settings(&pack)
                .context("applying settings pack")?;
            if let Some(enabled) = pex_toggle {
                ctx.manager
                    .set_pex_enabled(enabled)
                    .context("toggling peer exchange")?;
            }
            Ok(())
        }))
    }

    /// Queue a label replacement for one torrent.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ShuttingDown`] during shutdown.
    pub fn set_labels(&self, id: RpcId, labels: Vec<String>) -> Result<(), EngineError> {
        self.submit(Box::new(move |ctx| {
            ctx.state.set_labels(id, labels, Instant::now());
        }))
    }

    /// Queue a bandwidth-priority change for one torrent.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ShuttingDown`] during shutdown.
    pub fn set_bandwidth_priority(&self, id: RpcId, priority: i32) -> Result<(), EngineError> {
        self.submit(command_task("set_bandwidth_priority", move |ctx| {
            ctx.manager
                .set_torrent_priority(id, priority)
                .with_context(|| format!("setting priority for torrent {id}"))?;
            ctx.state.set_priority(id, priority, Instant::now());
            Ok(())
        }))
    }

    /// Queue a storage relocation. The pending-move entry is recorded
    /// before the library call and cleared by the completion alert. With
    /// `delete_source` the payload is moved and the old copy removed;
    /// without it the torrent is re-pointed at `target`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ShuttingDown`] during shutdown.
    pub fn move_storage(
        &self,
        id: RpcId,
        target: PathBuf,
        delete_source: bool,
    ) -> Result<(), EngineError> {
        self.submit(command_task("move_storage", move |ctx| {
            let hash = ctx
                .manager
                .hash_of(id)
                .with_context(|| format!("no torrent with rpc id {id}"))?;
            ctx.state.record_move(hash, target.clone());
            if let Err(err) = ctx.manager.move_storage(id, &target, delete_source) {
                ctx.state.clear_move(&hash);
                return Err(err)
                    .with_context(|| format!("relocating torrent {id} to {}", target.display()));
            }
            Ok(())
        }))
    }

    /// Atomic load of the published snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<SessionSnapshot> {
        self.slot.load()
    }

    /// Storage relocations currently in flight.
    #[must_use]
    pub fn pending_moves(&self) -> Vec<(InfoHash, PathBuf)> {
        self.pending_moves
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .map(|(hash, path)| (*hash, path.clone()))
            .collect()
    }

    /// Wake the engine loop without enqueueing work.
    pub fn notify(&self) {
        self.queue.notify();
    }

    /// Request shutdown: refuse new commands and wake the loop. The engine
    /// finishes its flush sequence on its own thread; join the
    /// [`EngineThread`] to wait for it.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.queue.close();
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Current queue depth (diagnostics).
    #[must_use]
    pub fn queued_commands(&self) -> usize {
        self.queue.len()
    }
}
