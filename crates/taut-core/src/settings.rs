use std::path::PathBuf;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Peer-wire encryption policy, persisted as the integer the settings schema
/// mandates: `0` tolerated, `1` preferred, `2` required.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncryptionMode {
    /// Accept plaintext and encrypted connections alike.
    Tolerated,
    /// Prefer encrypted connections, fall back to plaintext.
    #[default]
    Preferred,
    /// Refuse plaintext connections.
    Required,
}

impl EncryptionMode {
    /// The persisted integer value.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Tolerated => 0,
            Self::Preferred => 1,
            Self::Required => 2,
        }
    }
}

impl Serialize for EncryptionMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for EncryptionMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match u8::deserialize(deserializer)? {
            0 => Ok(Self::Tolerated),
            1 => Ok(Self::Preferred),
            2 => Ok(Self::Required),
            other => Err(serde::de::Error::custom(format!(
                "encryption mode must be 0, 1 or 2, got {other}"
            ))),
        }
    }
}

/// Proxy protocol used for outbound connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyType {
    /// No proxy.
    #[default]
    None,
    /// HTTP CONNECT proxy.
    Http,
    /// SOCKS4 proxy.
    Socks4,
    /// SOCKS5 proxy.
    Socks5,
}

/// Durable session settings, the schema of `state.json`.
///
/// Every key is optional on disk; a missing key takes the value from
/// [`SessionSettings::default`]. Unknown keys are ignored so newer state
/// files load on older builds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Peer listen endpoint, `address:port`.
    pub listen_interface: String,
    /// URL the RPC transport collaborator binds to.
    pub rpc_bind: String,
    /// Download directory; `None` means `<data_root>/downloads`.
    pub download_path: Option<PathBuf>,
    /// Directory for in-progress payloads, when enabled.
    pub incomplete_dir: Option<PathBuf>,
    /// Whether `incomplete_dir` is honored.
    pub incomplete_dir_enabled: bool,
    /// Directory watched for dropped `.torrent` files, when enabled.
    pub watch_dir: Option<PathBuf>,
    /// Whether `watch_dir` is honored.
    pub watch_dir_enabled: bool,
    /// Global download cap in kilobytes per second.
    pub speed_limit_down_kbps: u32,
    /// Whether the download cap is active.
    pub speed_limit_down_enabled: bool,
    /// Global upload cap in kilobytes per second.
    pub speed_limit_up_kbps: u32,
    /// Whether the upload cap is active.
    pub speed_limit_up_enabled: bool,
    /// Alternate download cap in kilobytes per second.
    pub alt_speed_down_kbps: u32,
    /// Alternate upload cap in kilobytes per second.
    pub alt_speed_up_kbps: u32,
    /// Whether the alternate caps are active right now.
    pub alt_speed_enabled: bool,
    /// Schedule start, minutes after midnight.
    pub alt_speed_time_begin: u32,
    /// Schedule end, minutes after midnight.
    pub alt_speed_time_end: u32,
    /// Whether the alternate-speed schedule is active.
    pub alt_speed_time_enabled: bool,
    /// Days-of-week bitmask for the schedule (bit 0 = Sunday).
    pub alt_speed_time_day: u8,
    /// Global peer connection limit.
    pub peer_limit: u32,
    /// Per-torrent peer connection limit.
    pub peer_limit_per_torrent: u32,
    /// Peer-wire encryption policy.
    pub encryption: EncryptionMode,
    /// Whether the DHT participates in peer discovery.
    pub dht_enabled: bool,
    /// Whether peer exchange is enabled.
    pub pex_enabled: bool,
    /// Whether local peer discovery is enabled.
    pub lpd_enabled: bool,
    /// Whether µTP transport is enabled.
    pub utp_enabled: bool,
    /// Number of torrents allowed to download concurrently.
    pub download_queue_size: u32,
    /// Number of torrents allowed to seed concurrently.
    pub seed_queue_size: u32,
    /// Opaque passthrough to the library's queueing logic.
    pub queue_stalled_enabled: bool,
    /// Stop seeding at this share ratio, when enabled.
    pub seed_ratio_limit: f64,
    /// Whether the ratio limit is active.
    pub seed_ratio_limit_enabled: bool,
    /// Stop seeding after this many idle minutes, when enabled.
    pub seed_idle_limit: u32,
    /// Whether the idle limit is active.
    pub seed_idle_limit_enabled: bool,
    /// Proxy protocol.
    pub proxy_type: ProxyType,
    /// Proxy host.
    pub proxy_hostname: String,
    /// Proxy port.
    pub proxy_port: u16,
    /// Whether proxy credentials are sent.
    pub proxy_auth_enabled: bool,
    /// Proxy username.
    pub proxy_username: String,
    /// Proxy password.
    pub proxy_password: String,
    /// Whether peer connections are routed through the proxy.
    pub proxy_peer_connections: bool,
    /// Extension appended to incomplete payload files.
    pub partfile_extension: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            listen_interface: "0.0.0.0:6881".into(),
            rpc_bind: "http://127.0.0.1:9091".into(),
            download_path: None,
            incomplete_dir: None,
            incomplete_dir_enabled: false,
            watch_dir: None,
            watch_dir_enabled: false,
            speed_limit_down_kbps: 100,
            speed_limit_down_enabled: false,
            speed_limit_up_kbps: 100,
            speed_limit_up_enabled: false,
            alt_speed_down_kbps: 50,
            alt_speed_up_kbps: 50,
            alt_speed_enabled: false,
            alt_speed_time_begin: 540,
            alt_speed_time_end: 1_020,
            alt_speed_time_enabled: false,
            alt_speed_time_day: 0x7f,
            peer_limit: 200,
            peer_limit_per_torrent: 50,
            encryption: EncryptionMode::Preferred,
            dht_enabled: true,
            pex_enabled: true,
            lpd_enabled: true,
            utp_enabled: true,
            download_queue_size: 4,
            seed_queue_size: 2,
            queue_stalled_enabled: true,
            seed_ratio_limit: 2.0,
            seed_ratio_limit_enabled: false,
            seed_idle_limit: 30,
            seed_idle_limit_enabled: false,
            proxy_type: ProxyType::None,
            proxy_hostname: String::new(),
            proxy_port: 0,
            proxy_auth_enabled: false,
            proxy_username: String::new(),
            proxy_password: String::new(),
            proxy_peer_connections: false,
            partfile_extension: ".part".into(),
        }
    }
}

impl SessionSettings {
    /// Effective global download cap in bytes per second, or `None` when
    /// unlimited. Honors the alternate caps when they are active.
    #[must_use]
    pub fn effective_download_limit_bps(&self) -> Option<u64> {
        if self.alt_speed_enabled {
            return Some(u64::from(self.alt_speed_down_kbps) * 1024);
        }
        self.speed_limit_down_enabled
            .then(|| u64::from(self.speed_limit_down_kbps) * 1024)
    }

    /// Effective global upload cap in bytes per second, or `None` when
    /// unlimited. Honors the alternate caps when they are active.
    #[must_use]
    pub fn effective_upload_limit_bps(&self) -> Option<u64> {
        if self.alt_speed_enabled {
            return Some(u64::from(self.alt_speed_up_kbps) * 1024);
        }
        self.speed_limit_up_enabled
            .then(|| u64::from(self.speed_limit_up_kbps) * 1024)
    }
}

/// Partial settings mutation applied by the `set_settings` command.
///
/// Every field is optional; `None` leaves the current value untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsUpdate {
    /// New peer listen endpoint.
    pub listen_interface: Option<String>,
    /// New RPC bind URL.
    pub rpc_bind: Option<String>,
    /// New download directory.
    pub download_path: Option<PathBuf>,
    /// New incomplete directory.
    pub incomplete_dir: Option<PathBuf>,
    /// Toggle for the incomplete directory.
    pub incomplete_dir_enabled: Option<bool>,
    /// New watch directory.
    pub watch_dir: Option<PathBuf>,
    /// Toggle for the watch directory.
    pub watch_dir_enabled: Option<bool>,
    /// New download cap in kilobytes per second.
    pub speed_limit_down_kbps: Option<u32>,
    /// Toggle for the download cap.
    pub speed_limit_down_enabled: Option<bool>,
    /// New upload cap in kilobytes per second.
    pub speed_limit_up_kbps: Option<u32>,
    /// Toggle for the upload cap.
    pub speed_limit_up_enabled: Option<bool>,
    /// New alternate download cap.
    pub alt_speed_down_kbps: Option<u32>,
    /// New alternate upload cap.
    pub alt_speed_up_kbps: Option<u32>,
    /// Toggle for the alternate caps.
    pub alt_speed_enabled: Option<bool>,
    /// New schedule start.
    pub alt_speed_time_begin: Option<u32>,
    /// New schedule end.
    pub alt_speed_time_end: Option<u32>,
    /// Toggle for the schedule.
    pub alt_speed_time_enabled: Option<bool>,
    /// New days-of-week bitmask.
    pub alt_speed_time_day: Option<u8>,
    /// New global peer limit.
    pub peer_limit: Option<u32>,
    /// New per-torrent peer limit.
    pub peer_limit_per_torrent: Option<u32>,
    /// New encryption policy.
    pub encryption: Option<EncryptionMode>,
    /// Toggle for the DHT.
    pub dht_enabled: Option<bool>,
    /// Toggle for peer exchange.
    pub pex_enabled: Option<bool>,
    /// Toggle for local peer discovery.
    pub lpd_enabled: Option<bool>,
    /// Toggle for µTP.
    pub utp_enabled: Option<bool>,
    /// New download queue size.
    pub download_queue_size: Option<u32>,
    /// New seed queue size.
    pub seed_queue_size: Option<u32>,
    /// Queue-stalled passthrough toggle.
    pub queue_stalled_enabled: Option<bool>,
    /// New seed ratio limit.
    pub seed_ratio_limit: Option<f64>,
    /// Toggle for the ratio limit.
    pub seed_ratio_limit_enabled: Option<bool>,
    /// New idle limit in minutes.
    pub seed_idle_limit: Option<u32>,
    /// Toggle for the idle limit.
    pub seed_idle_limit_enabled: Option<bool>,
    /// New proxy protocol.
    pub proxy_type: Option<ProxyType>,
    /// New proxy host.
    pub proxy_hostname: Option<String>,
    /// New proxy port.
    pub proxy_port: Option<u16>,
    /// Toggle for proxy credentials.
    pub proxy_auth_enabled: Option<bool>,
    /// New proxy username.
    pub proxy_username: Option<String>,
    /// New proxy password.
    pub proxy_password: Option<String>,
    /// Toggle for proxying peer connections.
    pub proxy_peer_connections: Option<bool>,
}

macro_rules! merge {
    ($update:ident, $settings:ident, $($field:ident),+ $(,)?) => {
        $(if let Some(value) = $update.$field.take() {
            $settings.$field = value;
        })+
    };
}

impl SettingsUpdate {
    /// Whether the update carries no changes at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Merge the populated fields into `settings`, leaving the rest alone.
    pub fn apply(mut self, settings: &mut SessionSettings) {
        merge!(
            self,
            settings,
            listen_interface,
            rpc_bind,
            incomplete_dir_enabled,
            watch_dir_enabled,
            speed_limit_down_kbps,
            speed_limit_down_enabled,
            speed_limit_up_kbps,
            speed_limit_up_enabled,
            alt_speed_down_kbps,
            alt_speed_up_kbps,
            alt_speed_enabled,
            alt_speed_time_begin,
            alt_speed_time_end,
            alt_speed_time_enabled,
            alt_speed_time_day,
            peer_limit,
            peer_limit_per_torrent,
            encryption,
            dht_enabled,
            pex_enabled,
            lpd_enabled,
            utp_enabled,
            download_queue_size,
            seed_queue_size,
            queue_stalled_enabled,
            seed_ratio_limit,
            seed_ratio_limit_enabled,
            seed_idle_limit,
            seed_idle_limit_enabled,
            proxy_type,
            proxy_hostname,
            proxy_port,
            proxy_auth_enabled,
            proxy_username,
            proxy_password,
            proxy_peer_connections,
        );
        if let Some(path) = self.download_path.take() {
            settings.download_path = Some(path);
        }
        if let Some(path) = self.incomplete_dir.take() {
            settings.incomplete_dir = Some(path);
        }
        if let Some(path) = self.watch_dir.take() {
            settings.watch_dir = Some(path);
        }
    }
}
