use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use taut_core::{InfoHash, TorrentSource, TorrentState};

use crate::alert::Alert;
use crate::error::SessionError;
use crate::pack::{AddTorrentParams, IpFilter, SessionParams, SettingsPack};
use crate::session::BtSession;
use crate::status::{InfoHashPair, SessionCounters, TorrentHandle, TorrentStatus};

/// In-memory session backend.
///
/// Models the observable contract of a real library session — handles,
/// statuses, and the alert stream — without any networking or disk I/O.
/// Tests (and builds without a native backend) drive torrent lifecycles
/// through the simulation controls (`finish`, `set_transfer`, `inject`, …)
/// and observe exactly the alerts a native session would deliver.
pub struct SimSession {
    next_handle: u64,
    torrents: BTreeMap<TorrentHandle, SimTorrent>,
    pending: Vec<Alert>,
    pack: SettingsPack,
    ip_filter: IpFilter,
    dht_nodes: u64,
    session_paused: bool,
}

struct SimTorrent {
    hash: InfoHash,
    name: String,
    state: TorrentState,
    paused: bool,
    progress: f64,
    download_rate: i64,
    upload_rate: i64,
    total_done: u64,
    total_size: u64,
    total_uploaded: u64,
    total_downloaded: u64,
    save_path: PathBuf,
    metadata: Option<Vec<u8>>,
    error_code: i32,
    error_message: Option<String>,
    download_limit: Option<i64>,
    upload_limit: Option<i64>,
    priority: i32,
    last_move_deleted_source: Option<bool>,
}

/// Metainfo payload format understood by the simulator in place of
/// bencoded `.torrent` bytes.
#[derive(Debug, Serialize, Deserialize)]
struct SimMetainfo {
    info_hash: InfoHash,
    name: String,
    #[serde(default)]
    total_size: u64,
}

/// Resume payload format produced and consumed by the simulator.
#[derive(Debug, Serialize, Deserialize)]
struct SimResume {
    info_hash: InfoHash,
    name: String,
    #[serde(default)]
    total_size: u64,
    #[serde(default)]
    total_done: u64,
    #[serde(default)]
    progress: f64,
    #[serde(default)]
    paused: bool,
    #[serde(default)]
    save_path: PathBuf,
}

/// Serialized session-wide state written to `.session_state`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct SimSessionState {
    #[serde(default)]
    dht_nodes: u64,
}

impl SimSession {
    /// Bring up a simulated session from the given parameters.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Construction`] when the restored state blob
    /// is present but undecodable.
    pub fn create(params: SessionParams) -> Result<Self, SessionError> {
        let restored = match params.state_blob.as_deref() {
            Some(blob) => serde_json::from_slice::<SimSessionState>(blob)
                .map_err(|err| SessionError::Construction(err.to_string()))?,
            None => SimSessionState::default(),
        };
        let mut session = Self {
            next_handle: 1,
            torrents: BTreeMap::new(),
            pending: Vec::new(),
            pack: params.settings,
            ip_filter: IpFilter::default(),
            dht_nodes: restored.dht_nodes,
            session_paused: false,
        };
        session.pending.push(Alert::ListenSucceeded {
            endpoint: session.pack.listen_interface.clone(),
        });
        Ok(session)
    }

    /// Encode a metainfo payload in the simulator's format, for tests that
    /// add torrents from "file bytes".
    #[must_use]
    pub fn encode_metainfo(hash: InfoHash, name: &str, total_size: u64) -> Vec<u8> {
        serde_json::to_vec(&SimMetainfo {
            info_hash: hash,
            name: name.to_string(),
            total_size,
        })
        .unwrap_or_default()
    }

    // --- simulation controls -------------------------------------------

    /// Queue an arbitrary alert, exactly as a native session would post it.
    pub fn inject(&mut self, alert: Alert) {
        self.pending.push(alert);
    }

    /// Adjust the simulated DHT routing-table size.
    pub fn set_dht_nodes(&mut self, nodes: u64) {
        self.dht_nodes = nodes;
    }

    /// Update a torrent's transfer counters; visible at the next
    /// `post_torrent_updates`.
    pub fn set_transfer(
        &mut self,
        handle: TorrentHandle,
        download_rate: i64,
        upload_rate: i64,
        total_done: u64,
    ) {
        if let Some(torrent) = self.torrents.get_mut(&handle) {
            torrent.download_rate = download_rate;
            torrent.upload_rate = upload_rate;
            torrent.total_done = total_done;
            if torrent.total_size > 0 {
                torrent.progress = to_progress(total_done, torrent.total_size);
            }
        }
    }

    /// Mark a torrent's payload complete and queue the finished alert.
    pub fn finish(&mut self, handle: TorrentHandle) {
        let Some(torrent) = self.torrents.get_mut(&handle) else {
            return;
        };
        torrent.total_done = torrent.total_size;
        torrent.progress = 1.0;
        torrent.state = TorrentState::Seeding;
        let status = torrent.to_status(handle);
        self.pending.push(Alert::TorrentFinished { status });
    }

    /// Deliver metadata for a magnet-initiated torrent and queue the
    /// metadata alert.
    pub fn complete_metadata(&mut self, handle: TorrentHandle, name: &str, total_size: u64) {
        let Some(torrent) = self.torrents.get_mut(&handle) else {
            return;
        };
        torrent.name = name.to_string();
        torrent.total_size = total_size;
        torrent.state = TorrentState::Downloading;
        torrent.metadata = Some(Self::encode_metainfo(torrent.hash, name, total_size));
        self.pending.push(Alert::MetadataReceived { handle });
    }

    /// Put a torrent into an errored state.
    pub fn set_error(&mut self, handle: TorrentHandle, code: i32, message: &str) {
        if let Some(torrent) = self.torrents.get_mut(&handle) {
            torrent.error_code = code;
            torrent.error_message = Some(message.to_string());
        }
    }

    /// Rate limits currently applied to a torrent, `(download, upload)` in
    /// bytes per second.
    #[must_use]
    pub fn torrent_limits(&self, handle: TorrentHandle) -> Option<(Option<i64>, Option<i64>)> {
        self.torrents
            .get(&handle)
            .map(|torrent| (torrent.download_limit, torrent.upload_limit))
    }

    /// Whether the most recent storage move for a torrent asked for the
    /// source payload to be deleted; `None` before any move.
    #[must_use]
    pub fn last_move_deleted_source(&self, handle: TorrentHandle) -> Option<bool> {
        self.torrents
            .get(&handle)
            .and_then(|torrent| torrent.last_move_deleted_source)
    }

    /// Handle currently bound to `hash`, if any.
    #[must_use]
    pub fn handle_of(&self, hash: InfoHash) -> Option<TorrentHandle> {
        self.torrents
            .iter()
            .find(|(_, torrent)| torrent.hash == hash)
            .map(|(handle, _)| *handle)
    }

    /// Whether the whole session has been paused for shutdown.
    #[must_use]
    pub fn is_session_paused(&self) -> bool {
        self.session_paused
    }

    /// The filter most recently applied via `set_ip_filter`.
    #[must_use]
    pub fn ip_filter(&self) -> &IpFilter {
        &self.ip_filter
    }

    // --- internals -----------------------------------------------------

    fn admit(&mut self, params: &AddTorrentParams) -> Result<(), String> {
        let (hash, name, total_size, total_done, paused, save_path, has_metadata) =
            match &params.source {
                TorrentSource::Magnet { uri } => {
                    let (hash, name) = parse_magnet(uri)?;
                    (
                        hash,
                        name.unwrap_or_default(),
                        0,
                        0,
                        params.paused,
                        params.save_path.clone(),
                        false,
                    )
                }
                TorrentSource::Metainfo { bytes } => {
                    let meta: SimMetainfo =
                        serde_json::from_slice(bytes).map_err(|err| err.to_string())?;
                    (
                        meta.info_hash,
                        meta.name,
                        meta.total_size,
                        0,
                        params.paused,
                        params.save_path.clone(),
                        true,
                    )
                }
                TorrentSource::Resume { blob } => {
                    let resume: SimResume =
                        serde_json::from_slice(blob).map_err(|err| err.to_string())?;
                    let save_path = if resume.save_path.as_os_str().is_empty() {
                        params.save_path.clone()
                    } else {
                        resume.save_path
                    };
                    (
                        resume.info_hash,
                        resume.name,
                        resume.total_size,
                        resume.total_done,
                        resume.paused,
                        save_path,
                        true,
                    )
                }
            };

        if hash.is_zero() {
            return Err("torrent source carries no identity".to_string());
        }
        if self.handle_of(hash).is_some() {
            return Err(format!("duplicate torrent {hash}"));
        }

        let handle = TorrentHandle::from_raw(self.next_handle);
        self.next_handle += 1;
        let state = if !has_metadata {
            TorrentState::DownloadingMetadata
        } else if total_done >= total_size && total_size > 0 {
            TorrentState::Seeding
        } else {
            TorrentState::Downloading
        };
        let metadata = has_metadata.then(|| Self::encode_metainfo(hash, &name, total_size));
        self.torrents.insert(
            handle,
            SimTorrent {
                hash,
                name,
                state,
                paused,
                progress: to_progress(total_done, total_size),
                download_rate: 0,
                upload_rate: 0,
                total_done,
                total_size,
                total_uploaded: 0,
                total_downloaded: total_done,
                save_path,
                metadata,
                error_code: 0,
                error_message: None,
                download_limit: None,
                upload_limit: None,
                priority: 0,
                last_move_deleted_source: None,
            },
        );
        self.pending.push(Alert::AddTorrent {
            handle: Some(handle),
            hash,
            error: None,
        });
        debug!(info_hash = %hash, handle = handle.raw(), "simulated torrent admitted");
        Ok(())
    }

    fn torrent_mut(&mut self, handle: TorrentHandle) -> Result<&mut SimTorrent, SessionError> {
        self.torrents
            .get_mut(&handle)
            .ok_or(SessionError::UnknownTorrent(handle))
    }
}

impl BtSession for SimSession {
    fn apply_settings(&mut self, pack: &SettingsPack) {
        self.pack = pack.clone();
    }

    fn set_pex_enabled(&mut self, enabled: bool) {
        self.pack.pex_enabled = enabled;
    }

    fn set_ip_filter(&mut self, filter: IpFilter) {
        self.ip_filter = filter;
    }

    fn async_add_torrent(&mut self, params: AddTorrentParams) -> Result<(), SessionError> {
        if let Err(message) = self.admit(&params) {
            let hash = match &params.source {
                TorrentSource::Magnet { uri } => {
                    parse_magnet(uri).map(|(hash, _)| hash).unwrap_or(InfoHash::ZERO)
                }
                _ => InfoHash::ZERO,
            };
            self.pending.push(Alert::AddTorrent {
                handle: None,
                hash,
                error: Some(message),
            });
        }
        Ok(())
    }

    fn remove_torrent(
        &mut self,
        handle: TorrentHandle,
        _delete_data: bool,
    ) -> Result<(), SessionError> {
        if self.torrents.remove(&handle).is_none() {
            return Err(SessionError::UnknownTorrent(handle));
        }
        Ok(())
    }

    fn pause_torrent(&mut self, handle: TorrentHandle) -> Result<(), SessionError> {
        let torrent = self.torrent_mut(handle)?;
        torrent.paused = true;
        torrent.download_rate = 0;
        torrent.upload_rate = 0;
        Ok(())
    }

    fn resume_torrent(&mut self, handle: TorrentHandle) -> Result<(), SessionError> {
        self.torrent_mut(handle)?.paused = false;
        Ok(())
    }

    fn force_recheck(&mut self, handle: TorrentHandle) -> Result<(), SessionError> {
        self.torrent_mut(handle)?.state = TorrentState::CheckingFiles;
        Ok(())
    }

    fn set_torrent_limits(
        &mut self,
        handle: TorrentHandle,
        download_bps: Option<i64>,
        upload_bps: Option<i64>,
    ) -> Result<(), SessionError> {
        let torrent = self.torrent_mut(handle)?;
        torrent.download_limit = download_bps;
        torrent.upload_limit = upload_bps;
        Ok(())
    }

    fn set_torrent_priority(
        &mut self,
        handle: TorrentHandle,
        priority: i32,
    ) -> Result<(), SessionError> {
        self.torrent_mut(handle)?.priority = priority;
        Ok(())
    }

    fn move_storage(
        &mut self,
        handle: TorrentHandle,
        target: &Path,
        delete_source: bool,
    ) -> Result<(), SessionError> {
        let torrent = self.torrent_mut(handle)?;
        torrent.save_path = target.to_path_buf();
        torrent.last_move_deleted_source = Some(delete_source);
        self.pending.push(Alert::StorageMoved {
            handle,
            path: target.to_path_buf(),
        });
        Ok(())
    }

    fn save_resume_data(&mut self, handle: TorrentHandle) -> Result<(), SessionError> {
        let torrent = self.torrent_mut(handle)?;
        let blob = serde_json::to_vec(&SimResume {
            info_hash: torrent.hash,
            name: torrent.name.clone(),
            total_size: torrent.total_size,
            total_done: torrent.total_done,
            progress: torrent.progress,
            paused: torrent.paused,
            save_path: torrent.save_path.clone(),
        })
        .unwrap_or_default();
        let hash = torrent.hash;
        self.pending.push(Alert::SaveResumeData {
            handle,
            hash: Some(hash),
            blob,
        });
        Ok(())
    }

    fn post_torrent_updates(&mut self) {
        let statuses: Vec<TorrentStatus> = self
            .torrents
            .iter()
            .map(|(handle, torrent)| torrent.to_status(*handle))
            .collect();
        if !statuses.is_empty() {
            self.pending.push(Alert::StateUpdate { statuses });
        }
    }

    fn pop_alerts(&mut self, buffer: &mut Vec<Alert>) {
        buffer.append(&mut self.pending);
    }

    fn torrents(&self) -> Vec<TorrentHandle> {
        self.torrents.keys().copied().collect()
    }

    fn find_torrent(&self, hash: InfoHash) -> Option<TorrentHandle> {
        self.handle_of(hash)
    }

    fn status(&self, handle: TorrentHandle) -> Option<TorrentStatus> {
        self.torrents
            .get(&handle)
            .map(|torrent| torrent.to_status(handle))
    }

    fn hash_of(&self, handle: TorrentHandle) -> Option<InfoHash> {
        self.torrents.get(&handle).map(|torrent| torrent.hash)
    }

    fn torrent_metadata(&self, handle: TorrentHandle) -> Option<Vec<u8>> {
        self.torrents
            .get(&handle)
            .and_then(|torrent| torrent.metadata.clone())
    }

    fn counters(&self) -> SessionCounters {
        SessionCounters {
            dht_nodes: if self.pack.dht_enabled {
                self.dht_nodes
            } else {
                0
            },
        }
    }

    fn write_session_params(&self) -> Vec<u8> {
        serde_json::to_vec(&SimSessionState {
            dht_nodes: self.dht_nodes,
        })
        .unwrap_or_default()
    }

    fn pause(&mut self) {
        self.session_paused = true;
        for torrent in self.torrents.values_mut() {
            torrent.download_rate = 0;
            torrent.upload_rate = 0;
        }
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

impl SimTorrent {
    fn to_status(&self, handle: TorrentHandle) -> TorrentStatus {
        TorrentStatus {
            handle,
            info_hashes: InfoHashPair::single(self.hash),
            name: self.name.clone(),
            state: self.state,
            paused: self.paused,
            progress: self.progress,
            download_payload_rate: self.download_rate,
            upload_payload_rate: self.upload_rate,
            total_done: self.total_done,
            total_size: self.total_size,
            total_uploaded: self.total_uploaded,
            total_downloaded: self.total_downloaded,
            save_path: self.save_path.clone(),
            error_code: self.error_code,
            error_message: self.error_message.clone(),
        }
    }
}

fn to_progress(done: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        #[allow(clippy::cast_precision_loss)]
        {
            (done as f64 / total as f64).clamp(0.0, 1.0)
        }
    }
}

/// Extract the info-hash (and display name, when present) from a magnet URI.
fn parse_magnet(uri: &str) -> Result<(InfoHash, Option<String>), String> {
    let query = uri
        .strip_prefix("magnet:?")
        .ok_or_else(|| format!("not a magnet URI: {uri}"))?;
    let mut hash = None;
    let mut name = None;
    for pair in query.split('&') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        match key {
            "xt" => {
                let digest = value
                    .strip_prefix("urn:btih:")
                    .or_else(|| value.strip_prefix("urn:btmh:1220"))
                    .ok_or_else(|| format!("unsupported exact topic: {value}"))?;
                hash = Some(
                    InfoHash::from_hex(digest)
                        .map_err(|err| format!("bad info-hash in magnet: {err}"))?,
                );
            }
            "dn" => name = Some(value.replace('+', " ")),
            _ => {}
        }
    }
    let hash = hash.ok_or_else(|| "magnet URI carries no exact topic".to_string())?;
    Ok((hash, name))
}
