//! End-to-end engine scenarios: a full loop on a real data root, driven
//! exclusively through the public handle.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use taut_core::{AddTorrentRequest, SessionSnapshot, SettingsUpdate, TorrentSource};
use taut_engine::{Engine, EngineConfig, EngineHandle, EngineOptions, EngineThread};
use taut_persist::{DataLayout, PersistenceManager};
use tempfile::TempDir;

const DEMO_HEX: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

fn test_options() -> EngineOptions {
    EngineOptions {
        idle_sleep: Duration::from_millis(10),
        settings_flush_interval: Duration::from_millis(100),
        ..EngineOptions::default()
    }
}

fn start_engine(root: PathBuf, options: EngineOptions) -> (EngineHandle, EngineThread) {
    let layout = DataLayout::new(root);
    layout.ensure().expect("data root");
    let persist = PersistenceManager::new(layout);
    let loaded = persist.load_state().expect("state loads");
    let session_state_blob = persist.load_session_params().expect("session params");
    let warm_start = persist.load_resume_blobs().expect("resume blobs");

    let (engine, handle) = Engine::start(EngineConfig {
        persist,
        state: loaded.state,
        session_state_blob,
        blocklist: None,
        warm_start,
        options,
    })
    .expect("engine starts");
    let thread = engine.spawn().expect("engine thread");
    (handle, thread)
}

fn magnet(hex: &str) -> AddTorrentRequest {
    AddTorrentRequest {
        source: TorrentSource::magnet(format!("magnet:?xt=urn:btih:{hex}&dn=demo")),
        save_path: None,
        paused: false,
    }
}

fn wait_until<F>(deadline: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

fn wait_for_torrents(handle: &EngineHandle, count: usize) -> Arc<SessionSnapshot> {
    assert!(
        wait_until(Duration::from_secs(5), || {
            handle.snapshot().torrent_count == count
        }),
        "expected {count} torrents, snapshot has {}",
        handle.snapshot().torrent_count
    );
    handle.snapshot()
}

#[test]
fn add_persist_restart_keeps_the_rpc_id() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().to_path_buf();

    let (handle, thread) = start_engine(root.clone(), test_options());
    handle.add_torrent(magnet(DEMO_HEX)).unwrap();

    let snapshot = wait_for_torrents(&handle, 1);
    assert_eq!(snapshot.torrents[0].id, 1);
    assert_eq!(snapshot.torrents[0].info_hash.to_hex(), DEMO_HEX);

    handle.stop();
    thread.join();

    let state: serde_json::Value =
        serde_json::from_slice(&std::fs::read(root.join("state.json")).unwrap()).unwrap();
    assert_eq!(state["rpc_ids"][DEMO_HEX], 1);
    assert!(
        root.join("resume").join(format!("{DEMO_HEX}.resume")).exists(),
        "shutdown must leave a resume blob behind"
    );

    // Second run over the same data root: the torrent comes back from its
    // resume blob with the identical id.
    let (handle, thread) = start_engine(root, test_options());
    let snapshot = wait_for_torrents(&handle, 1);
    assert_eq!(snapshot.torrents[0].id, 1);
    assert_eq!(snapshot.torrents[0].info_hash.to_hex(), DEMO_HEX);
    handle.stop();
    thread.join();
}

#[test]
fn idle_torrents_reuse_snapshot_entries_and_mutations_bump_once() {
    let dir = TempDir::new().unwrap();
    let (handle, thread) = start_engine(dir.path().to_path_buf(), test_options());
    handle.add_torrent(magnet(DEMO_HEX)).unwrap();
    let first = wait_for_torrents(&handle, 1);

    // Let several ticks pass; an idle torrent must keep the exact cached
    // value object.
    std::thread::sleep(Duration::from_millis(150));
    let second = handle.snapshot();
    assert!(
        Arc::ptr_eq(&first.torrents[0], &second.torrents[0]),
        "idle torrent must reuse the cached entry"
    );
    let revision_before = second.torrents[0].revision;

    // One observable mutation: exactly one revision bump.
    handle.stop_torrents(vec![1]).unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || handle.snapshot().torrents[0].paused),
        "pause must become visible"
    );
    let paused = handle.snapshot();
    assert_eq!(paused.torrents[0].revision, revision_before + 1);
    assert_eq!(paused.paused_count, 1);

    // And the new entry is cached again once things settle.
    std::thread::sleep(Duration::from_millis(150));
    let settled = handle.snapshot();
    assert_eq!(settled.torrents[0].revision, revision_before + 1);
    assert!(Arc::ptr_eq(&paused.torrents[0], &settled.torrents[0]));

    handle.stop();
    thread.join();
}

#[test]
fn command_flood_executes_every_task_within_the_bound() {
    const FLOOD: usize = 300;
    let dir = TempDir::new().unwrap();
    let options = EngineOptions {
        max_pending_tasks: 16,
        ..test_options()
    };
    let (handle, thread) = start_engine(dir.path().to_path_buf(), options);

    let executed = Arc::new(AtomicUsize::new(0));
    let producer = {
        let handle = handle.clone();
        let executed = Arc::clone(&executed);
        std::thread::spawn(move || {
            for _ in 0..FLOOD {
                let executed = Arc::clone(&executed);
                handle
                    .submit(Box::new(move |_ctx| {
                        executed.fetch_add(1, Ordering::Relaxed);
                    }))
                    .expect("queue accepts while engine runs");
            }
        })
    };

    let mut max_depth = 0;
    assert!(
        wait_until(Duration::from_secs(10), || {
            max_depth = max_depth.max(handle.queued_commands());
            executed.load(Ordering::Relaxed) == FLOOD
        }),
        "only {} of {FLOOD} tasks executed",
        executed.load(Ordering::Relaxed)
    );
    producer.join().unwrap();
    assert!(
        max_depth <= 16,
        "queue depth {max_depth} exceeded the configured bound"
    );

    handle.stop();
    thread.join();
}

#[test]
fn settings_mutations_reach_disk_within_the_flush_bound() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().to_path_buf();
    let (handle, thread) = start_engine(root.clone(), test_options());

    handle
        .set_settings(SettingsUpdate {
            peer_limit: Some(321),
            dht_enabled: Some(false),
            ..SettingsUpdate::default()
        })
        .unwrap();

    let state_file = root.join("state.json");
    assert!(
        wait_until(Duration::from_secs(5), || {
            std::fs::read(&state_file)
                .ok()
                .and_then(|bytes| serde_json::from_slice::<serde_json::Value>(&bytes).ok())
                .is_some_and(|state| state["peer_limit"] == 321 && state["dht_enabled"] == false)
        }),
        "settings flush did not land on disk in time"
    );

    handle.stop();
    thread.join();
}

#[test]
fn shutdown_waits_for_in_flight_resume_saves() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().to_path_buf();
    let (handle, thread) = start_engine(root.clone(), test_options());

    let hexes = ["11", "22", "33"].map(|byte| byte.repeat(20));
    for hex in &hexes {
        handle.add_torrent(magnet(hex)).unwrap();
    }
    wait_for_torrents(&handle, 3);

    handle.stop();
    thread.join();

    for hex in &hexes {
        assert!(
            root.join("resume").join(format!("{hex}.resume")).exists(),
            "resume blob for {hex} missing after shutdown"
        );
    }
}

#[test]
fn stop_is_final_no_snapshots_or_writes_afterwards() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().to_path_buf();
    let (handle, thread) = start_engine(root.clone(), test_options());
    handle.add_torrent(magnet(DEMO_HEX)).unwrap();
    wait_for_torrents(&handle, 1);

    handle.stop();
    thread.join();

    let snapshot_after = handle.snapshot();
    let state_after = std::fs::read(root.join("state.json")).unwrap();
    assert!(handle.add_torrent(magnet(&"bb".repeat(20))).is_err());

    std::thread::sleep(Duration::from_millis(120));
    assert!(
        Arc::ptr_eq(&snapshot_after, &handle.snapshot()),
        "no snapshot may be published after stop"
    );
    assert_eq!(
        std::fs::read(root.join("state.json")).unwrap(),
        state_after,
        "no persistence writes may happen after stop"
    );
}

#[test]
fn remove_purges_the_id_and_its_artifacts() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().to_path_buf();
    let (handle, thread) = start_engine(root.clone(), test_options());

    handle.add_torrent(magnet(DEMO_HEX)).unwrap();
    wait_for_torrents(&handle, 1);

    handle.remove_torrent(1, false).unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || {
            handle.snapshot().torrent_count == 0
        }),
        "removed torrent still visible"
    );

    handle.stop();
    thread.join();

    let state: serde_json::Value =
        serde_json::from_slice(&std::fs::read(root.join("state.json")).unwrap()).unwrap();
    assert!(
        state["rpc_ids"].as_object().unwrap().is_empty(),
        "purged id must leave the persisted map"
    );
    assert!(!root.join("resume").join(format!("{DEMO_HEX}.resume")).exists());
}

#[test]
fn labels_survive_a_restart() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().to_path_buf();

    let (handle, thread) = start_engine(root.clone(), test_options());
    handle.add_torrent(magnet(DEMO_HEX)).unwrap();
    wait_for_torrents(&handle, 1);
    handle
        .set_labels(1, vec!["linux".into(), "iso".into()])
        .unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || {
            handle.snapshot().torrents[0].labels == vec!["linux", "iso"]
        }),
        "labels must reach the snapshot"
    );
    handle.stop();
    thread.join();

    let (handle, thread) = start_engine(root, test_options());
    let snapshot = wait_for_torrents(&handle, 1);
    assert_eq!(snapshot.torrents[0].labels, vec!["linux", "iso"]);
    handle.stop();
    thread.join();
}

#[test]
fn move_storage_lands_in_the_snapshot_and_clears_pending() {
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("archive");
    let (handle, thread) = start_engine(dir.path().join("data"), test_options());

    handle.add_torrent(magnet(DEMO_HEX)).unwrap();
    wait_for_torrents(&handle, 1);

    handle.move_storage(1, target.clone(), false).unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || {
            handle.snapshot().torrents[0].save_path == target
        }),
        "storage move must become visible"
    );
    assert!(handle.pending_moves().is_empty());

    handle.stop();
    thread.join();
}

#[test]
fn unparseable_magnet_is_surfaced_and_the_loop_survives() {
    let dir = TempDir::new().unwrap();
    let (handle, thread) = start_engine(dir.path().to_path_buf(), test_options());

    handle
        .add_torrent(AddTorrentRequest {
            source: TorrentSource::magnet("magnet:?dn=lonely"),
            save_path: None,
            paused: false,
        })
        .unwrap();
    handle.add_torrent(magnet(DEMO_HEX)).unwrap();

    // The bad add produces only an error alert; the good one lands.
    let snapshot = wait_for_torrents(&handle, 1);
    assert_eq!(snapshot.torrents[0].info_hash.to_hex(), DEMO_HEX);

    handle.stop();
    thread.join();
}
