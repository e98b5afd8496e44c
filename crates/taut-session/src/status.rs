use std::path::PathBuf;

use taut_core::{InfoHash, TorrentState};

/// Opaque reference to a live torrent inside the session.
///
/// Handles are not stable across restarts; durable identity is the
/// info-hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TorrentHandle(u64);

impl TorrentHandle {
    /// Wrap a raw library handle value.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw library handle value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// The v1/v2 hash pair a hybrid torrent carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InfoHashPair {
    /// SHA-1 identity, if the torrent has one.
    pub v1: Option<InfoHash>,
    /// SHA-256 identity, if the torrent has one.
    pub v2: Option<InfoHash>,
}

impl InfoHashPair {
    /// Wrap a single known hash.
    #[must_use]
    pub const fn single(hash: InfoHash) -> Self {
        match hash {
            InfoHash::V1(_) => Self {
                v1: Some(hash),
                v2: None,
            },
            InfoHash::V2(_) => Self {
                v1: None,
                v2: Some(hash),
            },
        }
    }

    /// The preferred identity: v2 when present, else v1, else the zero hash.
    #[must_use]
    pub fn best(&self) -> InfoHash {
        self.v2.or(self.v1).unwrap_or(InfoHash::ZERO)
    }
}

/// Point-in-time observation of one torrent, as queried from the session.
#[derive(Debug, Clone, PartialEq)]
pub struct TorrentStatus {
    /// The live handle this status was taken from.
    pub handle: TorrentHandle,
    /// Identity of the torrent.
    pub info_hashes: InfoHashPair,
    /// Display name; empty until metadata is known.
    pub name: String,
    /// Lifecycle state.
    pub state: TorrentState,
    /// Whether the torrent is paused.
    pub paused: bool,
    /// Completion in `[0, 1]`.
    pub progress: f64,
    /// Payload download rate; the library may report transient negatives.
    pub download_payload_rate: i64,
    /// Payload upload rate; the library may report transient negatives.
    pub upload_payload_rate: i64,
    /// Bytes of wanted data already downloaded.
    pub total_done: u64,
    /// Total bytes of wanted data.
    pub total_size: u64,
    /// Cumulative bytes uploaded.
    pub total_uploaded: u64,
    /// Cumulative bytes downloaded.
    pub total_downloaded: u64,
    /// Storage directory.
    pub save_path: PathBuf,
    /// Library error code; zero when healthy.
    pub error_code: i32,
    /// Error detail when `error_code` is non-zero.
    pub error_message: Option<String>,
}

/// Session-wide counters queried once per snapshot build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionCounters {
    /// DHT routing-table size.
    pub dht_nodes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn best_prefers_v2() {
        let v1 = InfoHash::V1([1; 20]);
        let v2 = InfoHash::V2([2; 32]);
        assert_eq!(InfoHashPair { v1: Some(v1), v2: Some(v2) }.best(), v2);
        assert_eq!(InfoHashPair::single(v1).best(), v1);
        assert_eq!(InfoHashPair::default().best(), InfoHash::ZERO);
    }
}
