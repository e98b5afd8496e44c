use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::hash::{InfoHash, RpcId};

/// Source describing how a torrent enters the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TorrentSource {
    /// A magnet URI to resolve and add.
    Magnet {
        /// The full `magnet:?xt=urn:btih:…` URI.
        uri: String,
    },
    /// Raw `.torrent` metainfo bytes.
    Metainfo {
        /// Bencoded metainfo payload.
        bytes: Vec<u8>,
    },
    /// A resume blob captured from a previous run, replayed at warm-up.
    Resume {
        /// Opaque resume payload produced by the underlying library.
        blob: Vec<u8>,
    },
}

impl TorrentSource {
    /// Convenience constructor for magnet-based sources.
    #[must_use]
    pub fn magnet(uri: impl Into<String>) -> Self {
        Self::Magnet { uri: uri.into() }
    }

    /// Convenience constructor for metainfo-based sources.
    #[must_use]
    pub fn metainfo(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Metainfo {
            bytes: bytes.into(),
        }
    }

    /// Convenience constructor for resume-blob replay.
    #[must_use]
    pub fn resume(blob: impl Into<Vec<u8>>) -> Self {
        Self::Resume { blob: blob.into() }
    }
}

/// Request payload for admitting a torrent into the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddTorrentRequest {
    /// How the torrent should be retrieved.
    pub source: TorrentSource,
    /// Download directory; `None` uses the session default.
    #[serde(default)]
    pub save_path: Option<PathBuf>,
    /// Whether the torrent starts paused.
    #[serde(default)]
    pub paused: bool,
}

/// Lifecycle state of a torrent as reported by the underlying library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TorrentState {
    /// Verifying on-disk data against piece hashes.
    CheckingFiles,
    /// Fetching metadata for a magnet-initiated torrent.
    DownloadingMetadata,
    /// Actively downloading payload data.
    Downloading,
    /// All wanted data present; not yet seeding.
    Finished,
    /// Complete and uploading to peers.
    Seeding,
    /// Validating a resume blob before starting.
    CheckingResumeData,
    /// Explicitly stopped.
    Stopped,
}

impl TorrentState {
    /// Stable lowercase name used in logs and external surfaces.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CheckingFiles => "checking_files",
            Self::DownloadingMetadata => "downloading_metadata",
            Self::Downloading => "downloading",
            Self::Finished => "finished",
            Self::Seeding => "seeding",
            Self::CheckingResumeData => "checking_resume_data",
            Self::Stopped => "stopped",
        }
    }
}

/// Immutable view of one torrent at a tick boundary.
///
/// Snapshots are value objects: two snapshots with equal fields are
/// interchangeable, and a published snapshot is never mutated. The
/// `revision` counter gates cache reuse in the snapshot builder.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TorrentSnapshot {
    /// Stable external id.
    pub id: RpcId,
    /// Torrent identity.
    pub info_hash: InfoHash,
    /// Display name (empty until metadata is known).
    pub name: String,
    /// Lifecycle state.
    pub state: TorrentState,
    /// Whether the torrent is paused.
    pub paused: bool,
    /// Completion in `[0, 1]`.
    pub progress: f64,
    /// Payload download rate in bytes per second, clamped at zero.
    pub download_rate: u64,
    /// Payload upload rate in bytes per second, clamped at zero.
    pub upload_rate: u64,
    /// Bytes of wanted data already downloaded.
    pub total_done: u64,
    /// Total bytes of wanted data.
    pub total_size: u64,
    /// Cumulative bytes uploaded.
    pub total_uploaded: u64,
    /// Cumulative bytes downloaded.
    pub total_downloaded: u64,
    /// Storage directory for the torrent's payload.
    pub save_path: PathBuf,
    /// User-assigned labels.
    pub labels: Vec<String>,
    /// Bandwidth priority relative to other torrents.
    pub bandwidth_priority: i32,
    /// Library error code; zero when healthy.
    pub error_code: i32,
    /// Human-readable error detail, when `error_code` is non-zero.
    pub error_message: Option<String>,
    /// When the torrent was first observed by this data root.
    pub added_time: DateTime<Utc>,
    /// Change counter; strictly increases whenever an observable field of
    /// this torrent changes.
    pub revision: u64,
}

/// Immutable aggregate over the whole torrent population, published
/// atomically once per tick.
#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    /// Per-torrent snapshots, ordered by id.
    pub torrents: Vec<Arc<TorrentSnapshot>>,
    /// Number of torrents in `torrents`.
    pub torrent_count: usize,
    /// Torrents actively transferring (downloading or seeding, not paused).
    pub active_count: usize,
    /// Paused torrents.
    pub paused_count: usize,
    /// Seeding torrents.
    pub seeding_count: usize,
    /// Torrents with a non-zero error code.
    pub error_count: usize,
    /// Sum of per-torrent download rates, bytes per second.
    pub download_rate: u64,
    /// Sum of per-torrent upload rates, bytes per second.
    pub upload_rate: u64,
    /// DHT routing-table size reported by the library.
    pub dht_nodes: u64,
}

impl SessionSnapshot {
    /// Find a torrent by id.
    #[must_use]
    pub fn torrent(&self, id: RpcId) -> Option<&Arc<TorrentSnapshot>> {
        self.torrents.iter().find(|snap| snap.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_constructors_build_variants() {
        match TorrentSource::magnet("magnet:?xt=urn:btih:demo") {
            TorrentSource::Magnet { uri } => assert!(uri.contains("demo")),
            other => panic!("expected magnet, got {other:?}"),
        }
        match TorrentSource::metainfo(vec![1_u8, 2]) {
            TorrentSource::Metainfo { bytes } => assert_eq!(bytes, vec![1, 2]),
            other => panic!("expected metainfo, got {other:?}"),
        }
        match TorrentSource::resume(vec![3_u8]) {
            TorrentSource::Resume { blob } => assert_eq!(blob, vec![3]),
            other => panic!("expected resume, got {other:?}"),
        }
    }

    #[test]
    fn state_names_are_stable() {
        assert_eq!(TorrentState::Seeding.as_str(), "seeding");
        assert_eq!(
            serde_json::to_string(&TorrentState::DownloadingMetadata).unwrap(),
            "\"downloading_metadata\""
        );
    }

    #[test]
    fn snapshot_lookup_by_id() {
        let mut snapshot = SessionSnapshot::default();
        assert!(snapshot.torrent(1).is_none());
        snapshot.torrents.push(Arc::new(TorrentSnapshot {
            id: 7,
            info_hash: InfoHash::ZERO,
            name: "demo".into(),
            state: TorrentState::Downloading,
            paused: false,
            progress: 0.5,
            download_rate: 0,
            upload_rate: 0,
            total_done: 0,
            total_size: 0,
            total_uploaded: 0,
            total_downloaded: 0,
            save_path: PathBuf::from("/downloads"),
            labels: Vec::new(),
            bandwidth_priority: 0,
            error_code: 0,
            error_message: None,
            added_time: Utc::now(),
            revision: 1,
        }));
        assert!(snapshot.torrent(7).is_some());
    }
}
