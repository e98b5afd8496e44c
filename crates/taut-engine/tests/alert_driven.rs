//! Scenarios driven by session alerts: metadata arrival, rate changes,
//! completion, and the error taxonomy, all observed through published
//! snapshots and on-disk artifacts.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use taut_core::{AddTorrentRequest, InfoHash, TorrentSource, TorrentState};
use taut_engine::{Engine, EngineConfig, EngineHandle, EngineOptions, EngineThread};
use taut_persist::{DataLayout, PersistenceManager};
use taut_session::{Alert, SimSession};
use tempfile::TempDir;

const DEMO_HEX: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

fn test_options() -> EngineOptions {
    EngineOptions {
        idle_sleep: Duration::from_millis(10),
        settings_flush_interval: Duration::from_millis(100),
        ..EngineOptions::default()
    }
}

fn start_engine(root: PathBuf) -> (EngineHandle, EngineThread) {
    let layout = DataLayout::new(root);
    layout.ensure().expect("data root");
    let persist = PersistenceManager::new(layout);
    let loaded = persist.load_state().expect("state loads");
    let (engine, handle) = Engine::start(EngineConfig {
        persist,
        state: loaded.state,
        session_state_blob: None,
        blocklist: None,
        warm_start: Vec::new(),
        options: test_options(),
    })
    .expect("engine starts");
    let thread = engine.spawn().expect("engine thread");
    (handle, thread)
}

/// Run a closure against the simulated session on the engine thread.
fn with_sim(handle: &EngineHandle, body: impl FnOnce(&mut SimSession) + Send + 'static) {
    handle
        .submit(Box::new(move |ctx| {
            let session = ctx.manager.session_for_test().expect("session running");
            let sim = session
                .as_any_mut()
                .downcast_mut::<SimSession>()
                .expect("sim backend");
            body(sim);
        }))
        .expect("engine accepts tasks");
}

fn add_demo(handle: &EngineHandle) {
    handle
        .add_torrent(AddTorrentRequest {
            source: TorrentSource::magnet(format!("magnet:?xt=urn:btih:{DEMO_HEX}")),
            save_path: None,
            paused: false,
        })
        .unwrap();
}

fn demo_hash() -> InfoHash {
    InfoHash::from_hex(DEMO_HEX).unwrap()
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

#[test]
fn metadata_arrival_persists_a_torrent_file_once() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().to_path_buf();
    let (handle, thread) = start_engine(root.clone());

    add_demo(&handle);
    assert!(wait_until(Duration::from_secs(5), || {
        handle.snapshot().torrent_count == 1
    }));
    assert_eq!(
        handle.snapshot().torrents[0].state,
        TorrentState::DownloadingMetadata
    );

    with_sim(&handle, |sim| {
        let torrent = sim.handle_of(demo_hash()).expect("torrent admitted");
        sim.complete_metadata(torrent, "demo-payload", 4096);
    });

    let metadata_file = root.join("metadata").join(format!("{DEMO_HEX}.torrent"));
    assert!(
        wait_until(Duration::from_secs(5), || metadata_file.exists()),
        "metadata file must be persisted after the alert"
    );
    assert!(
        wait_until(Duration::from_secs(5), || {
            handle.snapshot().torrents[0].name == "demo-payload"
        }),
        "metadata name must reach the snapshot"
    );

    // The arrival also checkpoints resume data for the torrent.
    assert!(wait_until(Duration::from_secs(5), || {
        root.join("resume").join(format!("{DEMO_HEX}.resume")).exists()
    }));

    handle.stop();
    thread.join();
}

#[test]
fn rate_change_bumps_the_revision_exactly_once() {
    let dir = TempDir::new().unwrap();
    let (handle, thread) = start_engine(dir.path().to_path_buf());

    add_demo(&handle);
    assert!(wait_until(Duration::from_secs(5), || {
        handle.snapshot().torrent_count == 1
    }));
    std::thread::sleep(Duration::from_millis(100));
    let before = handle.snapshot().torrents[0].revision;

    with_sim(&handle, |sim| {
        let torrent = sim.handle_of(demo_hash()).expect("torrent admitted");
        sim.set_transfer(torrent, 5_000, 250, 0);
    });

    assert!(
        wait_until(Duration::from_secs(5), || {
            handle.snapshot().torrents[0].download_rate == 5_000
        }),
        "rate change must reach the snapshot"
    );
    let changed = handle.snapshot();
    assert_eq!(changed.torrents[0].revision, before + 1);
    assert_eq!(changed.download_rate, 5_000);
    assert_eq!(changed.upload_rate, 250);

    // Identical updates on subsequent ticks must not move the revision.
    std::thread::sleep(Duration::from_millis(150));
    assert_eq!(handle.snapshot().torrents[0].revision, before + 1);

    handle.stop();
    thread.join();
}

#[test]
fn finished_torrent_is_counted_as_seeding() {
    let dir = TempDir::new().unwrap();
    let (handle, thread) = start_engine(dir.path().to_path_buf());

    add_demo(&handle);
    assert!(wait_until(Duration::from_secs(5), || {
        handle.snapshot().torrent_count == 1
    }));

    with_sim(&handle, |sim| {
        let torrent = sim.handle_of(demo_hash()).expect("torrent admitted");
        sim.complete_metadata(torrent, "demo", 1024);
        sim.finish(torrent);
    });

    assert!(
        wait_until(Duration::from_secs(5), || {
            let snapshot = handle.snapshot();
            snapshot.seeding_count == 1 && snapshot.active_count == 1
        }),
        "finished torrent must count as seeding"
    );
    let snapshot = handle.snapshot();
    assert_eq!(snapshot.torrents[0].state, TorrentState::Seeding);
    assert!((snapshot.torrents[0].progress - 1.0).abs() < f64::EPSILON);

    handle.stop();
    thread.join();
}

#[test]
fn torrent_errors_surface_in_the_snapshot() {
    let dir = TempDir::new().unwrap();
    let (handle, thread) = start_engine(dir.path().to_path_buf());

    add_demo(&handle);
    assert!(wait_until(Duration::from_secs(5), || {
        handle.snapshot().torrent_count == 1
    }));

    with_sim(&handle, |sim| {
        let torrent = sim.handle_of(demo_hash()).expect("torrent admitted");
        sim.set_error(torrent, 3, "disk full");
    });

    assert!(
        wait_until(Duration::from_secs(5), || handle.snapshot().error_count == 1),
        "error must reach the aggregates"
    );
    let snapshot = handle.snapshot();
    assert_eq!(snapshot.torrents[0].error_code, 3);
    assert_eq!(snapshot.torrents[0].error_message.as_deref(), Some("disk full"));

    handle.stop();
    thread.join();
}

#[test]
fn noise_alerts_are_absorbed_without_disturbing_torrents() {
    let dir = TempDir::new().unwrap();
    let (handle, thread) = start_engine(dir.path().to_path_buf());

    add_demo(&handle);
    assert!(wait_until(Duration::from_secs(5), || {
        handle.snapshot().torrent_count == 1
    }));
    std::thread::sleep(Duration::from_millis(100));
    let before = handle.snapshot().torrents[0].revision;

    with_sim(&handle, |sim| {
        let torrent = sim.handle_of(demo_hash()).expect("torrent admitted");
        sim.inject(Alert::TrackerError {
            handle: torrent,
            url: "http://tracker.invalid/announce".into(),
            message: "connection refused".into(),
        });
        sim.inject(Alert::FileError {
            handle: torrent,
            path: "/downloads/demo".into(),
            message: "permission denied".into(),
        });
        sim.inject(Alert::PortmapError {
            message: "no igd".into(),
        });
        sim.inject(Alert::ListenFailed {
            endpoint: "0.0.0.0:6881".into(),
            message: "address in use".into(),
        });
        sim.inject(Alert::TorrentDeleteFailed {
            hash: InfoHash::V1([0x99; 20]),
            message: "payload busy".into(),
        });
        sim.inject(Alert::MetadataFailed {
            handle: torrent,
            message: "no peers".into(),
        });
        sim.inject(Alert::FastresumeRejected {
            handle: torrent,
            message: "mismatched files".into(),
        });
        sim.inject(Alert::StorageMovedFailed {
            handle: torrent,
            message: "target missing".into(),
        });
    });

    // None of these change observable snapshot fields; the loop keeps
    // serving and the cached entry stays put.
    std::thread::sleep(Duration::from_millis(200));
    let after = handle.snapshot();
    assert_eq!(after.torrent_count, 1);
    assert_eq!(after.torrents[0].revision, before);

    handle.stop();
    thread.join();
}

#[test]
fn bandwidth_commands_reach_session_and_snapshot() {
    let dir = TempDir::new().unwrap();
    let (handle, thread) = start_engine(dir.path().to_path_buf());

    add_demo(&handle);
    assert!(wait_until(Duration::from_secs(5), || {
        handle.snapshot().torrent_count == 1
    }));

    // 100 KiB/s down, unlimited up (0 kbps with enabled=false).
    handle
        .set_bandwidth_limits(vec![1], Some(100), Some(true), Some(0), Some(false))
        .unwrap();
    handle.set_bandwidth_priority(1, 1).unwrap();

    assert!(
        wait_until(Duration::from_secs(5), || {
            handle.snapshot().torrents[0].bandwidth_priority == 1
        }),
        "priority must reach the snapshot"
    );

    let (probe_tx, probe_rx) = std::sync::mpsc::channel();
    with_sim(&handle, move |sim| {
        let torrent = sim.handle_of(demo_hash()).expect("torrent admitted");
        let _ = probe_tx.send(sim.torrent_limits(torrent));
    });
    let limits = probe_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("probe task ran");
    assert_eq!(limits, Some((Some(100 * 1024), None)));

    handle.stop();
    thread.join();
}

#[test]
fn move_storage_forwards_the_delete_source_flag() {
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("archive");
    let (handle, thread) = start_engine(dir.path().join("data"));

    add_demo(&handle);
    assert!(wait_until(Duration::from_secs(5), || {
        handle.snapshot().torrent_count == 1
    }));

    handle.move_storage(1, target.clone(), true).unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || {
            handle.snapshot().torrents[0].save_path == target
        }),
        "storage move must complete"
    );

    let (probe_tx, probe_rx) = std::sync::mpsc::channel();
    with_sim(&handle, move |sim| {
        let torrent = sim.handle_of(demo_hash()).expect("torrent admitted");
        let _ = probe_tx.send(sim.last_move_deleted_source(torrent));
    });
    let recorded = probe_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("probe task ran");
    assert_eq!(recorded, Some(true));

    handle.stop();
    thread.join();
}

#[test]
fn v2_magnets_are_first_class() {
    let dir = TempDir::new().unwrap();
    let (handle, thread) = start_engine(dir.path().to_path_buf());
    let hex = "bb".repeat(32);

    handle
        .add_torrent(AddTorrentRequest {
            source: TorrentSource::magnet(format!("magnet:?xt=urn:btmh:1220{hex}")),
            save_path: None,
            paused: false,
        })
        .unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        handle.snapshot().torrent_count == 1
    }));
    let snapshot = handle.snapshot();
    assert_eq!(snapshot.torrents[0].id, 1);
    assert_eq!(snapshot.torrents[0].info_hash.to_hex(), hex);

    handle.stop();
    thread.join();
}

#[test]
fn startup_ignores_a_stray_state_tmp_file() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().to_path_buf();
    std::fs::create_dir_all(&root).unwrap();
    std::fs::write(root.join("state.json"), br#"{"peer_limit": 77}"#).unwrap();
    std::fs::write(root.join("state.json.tmp"), b"garbage from a crash").unwrap();

    let (handle, thread) = start_engine(root.clone());
    assert_eq!(handle.snapshot().torrent_count, 0);
    handle.stop();
    thread.join();

    let state: serde_json::Value =
        serde_json::from_slice(&std::fs::read(root.join("state.json")).unwrap()).unwrap();
    assert_eq!(state["peer_limit"], 77, "prior settings must survive");
    assert!(
        !root.join("state.json.tmp").exists(),
        "the final flush replaces the stray tmp file"
    );
}
