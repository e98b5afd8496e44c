#![forbid(unsafe_code)]
#![deny(unreachable_pub, rustdoc::broken_intra_doc_links)]

//! The engine core: a single-writer session loop that pumps library
//! alerts, maintains a revision-cached snapshot of the torrent population,
//! serves a bounded command queue under backpressure, and persists
//! everything crash-safely.
//!
//! Layout: `manager` (session ownership + alert pump), `snapshot`
//! (revision-cached builder + published slot), `queue` (bounded FIFO),
//! `settings` (debounced flush), `state` (alert reactions + per-torrent
//! bookkeeping), `engine` (the loop and its handle).

mod engine;
mod error;
mod ids;
mod manager;
mod queue;
mod settings;
mod sink;
mod snapshot;
mod state;

pub use engine::{
    Engine, EngineConfig, EngineCtx, EngineHandle, EngineOptions, EngineThread, Task,
};
pub use error::EngineError;
pub use ids::IdMap;
pub use manager::TorrentManager;
pub use queue::{CommandQueue, IDLE_SLEEP, MAX_PENDING_TASKS};
pub use settings::{SETTINGS_FLUSH_INTERVAL, SettingsFlush};
pub use sink::{AlertSink, NullSink};
pub use snapshot::{BuildOutcome, SnapshotBuilder, SnapshotHooks, SnapshotSlot, entry_from_status};
pub use state::{EngineState, PendingMoves};
