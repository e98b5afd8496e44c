use std::path::PathBuf;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use taut_engine::{Engine, EngineConfig, EngineHandle, EngineOptions, EngineThread};
use taut_persist::{DataLayout, PersistError, PersistenceManager, read_blocklist};
use taut_session::IpFilter;

use crate::env::{RpcAuth, apply_env_overrides};
use crate::error::AppError;

/// Boot the daemon and block until a shutdown signal arrives.
pub(crate) async fn run_app() -> Result<(), AppError> {
    init_logging();
    let root = resolve_data_root(|name| std::env::var_os(name).map(PathBuf::from));
    info!(data_root = %root.display(), "starting tautd");

    let daemon = start_daemon(root)?;
    if daemon.rpc_auth.basic.is_some() || daemon.rpc_auth.token.is_some() {
        info!("rpc credentials supplied via environment");
    }

    wait_for_shutdown_signal().await;
    info!("shutdown signal received");
    daemon.handle.stop();
    let thread = daemon.thread;
    tokio::task::spawn_blocking(move || thread.join())
        .await
        .map_err(|err| AppError::Io {
            context: "failed to join engine thread",
            source: std::io::Error::other(err),
        })?;
    info!("clean shutdown complete");
    Ok(())
}

/// A running daemon: the engine thread plus the surfaces its collaborators
/// (RPC transport, shell) consume.
pub(crate) struct Daemon {
    pub(crate) handle: EngineHandle,
    pub(crate) thread: EngineThread,
    pub(crate) rpc_auth: RpcAuth,
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon").finish_non_exhaustive()
    }
}

/// Load state, apply environment overrides, and spawn the engine thread
/// rooted at `root`.
pub(crate) fn start_daemon(root: PathBuf) -> Result<Daemon, AppError> {
    let layout = DataLayout::new(root);
    layout.ensure().map_err(AppError::DataRoot)?;
    let persist = PersistenceManager::new(layout.clone());

    let loaded = persist.load_state().map_err(|err| match err {
        corrupt @ PersistError::Corrupt { .. } => AppError::CorruptState(corrupt),
        other => AppError::Persist(other),
    })?;
    if loaded.existed {
        info!(torrents = loaded.state.rpc_ids.len(), "session state recovered");
    } else {
        info!("no prior state; starting with defaults");
    }

    let mut document = loaded.state;
    let rpc_auth = apply_env_overrides(&mut document.settings, |name| std::env::var(name).ok());
    if let Err(rejected) =
        taut_core::set_partfile_extension(document.settings.partfile_extension.clone())
    {
        warn!(rejected = %rejected, "partfile extension was already fixed for this process");
    }

    let blocklist = load_blocklist(&layout);
    let session_state_blob = match persist.load_session_params() {
        Ok(blob) => blob,
        Err(err) => {
            warn!(error = %err, "ignoring unreadable .session_state");
            None
        }
    };
    let warm_start = match persist.load_resume_blobs() {
        Ok(blobs) => blobs,
        Err(err) => {
            warn!(error = %err, "resume directory unreadable; starting without warm-up");
            Vec::new()
        }
    };

    let (engine, handle) = Engine::start(EngineConfig {
        persist,
        state: document,
        session_state_blob,
        blocklist,
        warm_start,
        options: EngineOptions::default(),
    })
    .map_err(AppError::Session)?;
    let thread = engine.spawn().map_err(|source| AppError::Io {
        context: "failed to spawn engine thread",
        source,
    })?;

    Ok(Daemon {
        handle,
        thread,
        rpc_auth,
    })
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// `TT_DATA_ROOT` wins; otherwise the platform data directory, falling
/// back to a local directory for containerized or stripped environments.
pub(crate) fn resolve_data_root(lookup: impl Fn(&str) -> Option<PathBuf>) -> PathBuf {
    if let Some(root) = lookup("TT_DATA_ROOT") {
        return root;
    }
    dirs::data_local_dir()
        .map(|dir| dir.join("taut"))
        .unwrap_or_else(|| PathBuf::from("taut-data"))
}

fn load_blocklist(layout: &DataLayout) -> Option<IpFilter> {
    let path = layout.blocklist_file();
    match read_blocklist(&path) {
        Ok(Some(ranges)) => {
            let mut filter = IpFilter::default();
            for (first, last) in ranges {
                filter.add_range(first, last);
            }
            info!(ranges = filter.len(), "blocklist loaded");
            Some(filter)
        }
        Ok(None) => None,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "blocklist unreadable; continuing without it");
            None
        }
    }
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(err) => {
                warn!(error = %err, "cannot install SIGTERM handler; relying on ctrl-c");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
