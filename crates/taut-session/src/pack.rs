use std::net::Ipv4Addr;
use std::path::PathBuf;

use taut_core::{EncryptionMode, ProxyType, SessionSettings, TorrentSource};

/// Library-facing settings, derived from [`SessionSettings`] on every apply.
///
/// This is the subset the session object consumes; everything else in the
/// persisted schema (RPC bind, watch directory, …) is engine- or
/// collaborator-side.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingsPack {
    /// Peer listen endpoint, `address:port`.
    pub listen_interface: String,
    /// Global download cap in bytes per second, `None` when unlimited.
    pub download_rate_limit_bps: Option<u64>,
    /// Global upload cap in bytes per second, `None` when unlimited.
    pub upload_rate_limit_bps: Option<u64>,
    /// DHT toggle.
    pub dht_enabled: bool,
    /// Peer-exchange toggle.
    pub pex_enabled: bool,
    /// Local peer discovery toggle.
    pub lpd_enabled: bool,
    /// µTP transport toggle.
    pub utp_enabled: bool,
    /// Encryption policy.
    pub encryption: EncryptionMode,
    /// Global peer connection limit.
    pub peer_limit: u32,
    /// Per-torrent peer connection limit.
    pub peer_limit_per_torrent: u32,
    /// Concurrent download slots.
    pub download_queue_size: u32,
    /// Concurrent seed slots.
    pub seed_queue_size: u32,
    /// Opaque queueing passthrough.
    pub queue_stalled_enabled: bool,
    /// Stop-seeding ratio, when limited.
    pub seed_ratio_limit: Option<f64>,
    /// Stop-seeding idle minutes, when limited.
    pub seed_idle_limit_minutes: Option<u32>,
    /// Outbound proxy, when configured.
    pub proxy: Option<ProxySettings>,
}

/// Proxy configuration handed to the library.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxySettings {
    /// Proxy protocol.
    pub kind: ProxyType,
    /// Proxy host.
    pub hostname: String,
    /// Proxy port.
    pub port: u16,
    /// Credentials, when authentication is enabled.
    pub credentials: Option<(String, String)>,
    /// Whether peer connections are proxied too.
    pub peer_connections: bool,
}

impl SettingsPack {
    /// Project the durable settings onto the library-facing subset.
    #[must_use]
    pub fn from_settings(settings: &SessionSettings) -> Self {
        let proxy = (settings.proxy_type != ProxyType::None).then(|| ProxySettings {
            kind: settings.proxy_type,
            hostname: settings.proxy_hostname.clone(),
            port: settings.proxy_port,
            credentials: settings.proxy_auth_enabled.then(|| {
                (
                    settings.proxy_username.clone(),
                    settings.proxy_password.clone(),
                )
            }),
            peer_connections: settings.proxy_peer_connections,
        });
        Self {
            listen_interface: settings.listen_interface.clone(),
            download_rate_limit_bps: settings.effective_download_limit_bps(),
            upload_rate_limit_bps: settings.effective_upload_limit_bps(),
            dht_enabled: settings.dht_enabled,
            pex_enabled: settings.pex_enabled,
            lpd_enabled: settings.lpd_enabled,
            utp_enabled: settings.utp_enabled,
            encryption: settings.encryption,
            peer_limit: settings.peer_limit,
            peer_limit_per_torrent: settings.peer_limit_per_torrent,
            download_queue_size: settings.download_queue_size,
            seed_queue_size: settings.seed_queue_size,
            queue_stalled_enabled: settings.queue_stalled_enabled,
            seed_ratio_limit: settings
                .seed_ratio_limit_enabled
                .then_some(settings.seed_ratio_limit),
            seed_idle_limit_minutes: settings
                .seed_idle_limit_enabled
                .then_some(settings.seed_idle_limit),
            proxy,
        }
    }
}

/// IPv4 range filter applied to incoming and outgoing peers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpFilter {
    rules: Vec<(Ipv4Addr, Ipv4Addr)>,
}

impl IpFilter {
    /// Block the inclusive range `[first, last]`. Reversed bounds are
    /// normalized.
    pub fn add_range(&mut self, first: Ipv4Addr, last: Ipv4Addr) {
        if first <= last {
            self.rules.push((first, last));
        } else {
            self.rules.push((last, first));
        }
    }

    /// Number of blocked ranges.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the filter blocks nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Whether `addr` falls in a blocked range.
    #[must_use]
    pub fn is_blocked(&self, addr: Ipv4Addr) -> bool {
        self.rules
            .iter()
            .any(|(first, last)| (*first..=*last).contains(&addr))
    }
}

/// Everything needed to bring up a session.
#[derive(Debug, Clone)]
pub struct SessionParams {
    /// Initial library settings.
    pub settings: SettingsPack,
    /// Serialized library state from a previous run (`.session_state`).
    pub state_blob: Option<Vec<u8>>,
}

/// Parameters of a single torrent admission.
#[derive(Debug, Clone)]
pub struct AddTorrentParams {
    /// Magnet, metainfo bytes, or a resume blob.
    pub source: TorrentSource,
    /// Storage directory for the payload.
    pub save_path: PathBuf,
    /// Whether the torrent starts paused.
    pub paused: bool,
}
