//! Configuration types for the bridge
//!
//! One [`NetworkConfig`] per radio network, plus shared health, dedup and
//! router settings. Transports are written as strings:
//!
//! | Form | Meaning |
//! |------|---------|
//! | `/dev/ttyUSB0`, `COM3`, `./pty` | fixed serial path |
//! | `tcp://10.0.0.5:4403`, `10.0.0.5:4403` | fixed TCP endpoint |
//! | `auto`, `auto:product=T-Echo,serial=F00D` | USB auto-detection |

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use meshbridge_core::{NetworkId, NodeId};

use crate::detect::{self, AutoDetectQuery};
use crate::error::{BridgeError, Result};

/// Maximum payload size for Meshtastic LoRa packets
pub const LORA_MAX_PAYLOAD: usize = 237;

/// Maximum text length a MeshCore companion radio accepts
pub const MESHCORE_MAX_TEXT: usize = 160;

/// Meshtastic stream framing magic (first 2 bytes)
pub const MESHTASTIC_MAGIC: u16 = 0x94C3;

/// Default baud rate for serial radios
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Default connection timeout
pub const DEFAULT_TIMEOUT_MS: u64 = 10000;

/// Meshtastic firmware TCP API port
pub const MESHTASTIC_TCP_PORT: u16 = 4403;

/// MeshCore companion TCP port
pub const MESHCORE_TCP_PORT: u16 = 5000;

/// Largest text a network accepts in one packet, in bytes
pub fn max_text_bytes(network: NetworkId) -> usize {
    match network {
        NetworkId::Meshtastic => LORA_MAX_PAYLOAD,
        NetworkId::MeshCore => MESHCORE_MAX_TEXT,
    }
}

/// Where a network's radio is attached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TransportSpec {
    /// Fixed serial device path
    Serial(PathBuf),
    /// Fixed TCP endpoint
    Tcp {
        /// Host name or address
        host: String,
        /// Port number
        port: u16,
    },
    /// Serial device chosen by USB attributes at connect time
    Auto(AutoDetectQuery),
}

impl TransportSpec {
    /// TCP endpoint shorthand
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        TransportSpec::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Serial path shorthand
    pub fn serial(path: impl Into<PathBuf>) -> Self {
        TransportSpec::Serial(path.into())
    }

    /// Whether the device is found by auto-detection
    pub fn is_auto(&self) -> bool {
        matches!(self, TransportSpec::Auto(_))
    }

    /// Whether the transport is a network socket
    pub fn is_tcp(&self) -> bool {
        matches!(self, TransportSpec::Tcp { .. })
    }

    /// Host to target for remote recovery, if the transport has one
    pub fn remote_host(&self) -> Option<(&str, u16)> {
        match self {
            TransportSpec::Tcp { host, port } => Some((host.as_str(), *port)),
            _ => None,
        }
    }

    /// Identity of the physical resource this transport occupies.
    ///
    /// Serial paths are canonicalized when they exist so that a symlink and
    /// its target collide. Auto specs have no resource until resolved.
    pub fn resource_key(&self) -> Option<String> {
        match self {
            TransportSpec::Serial(path) => Some(
                std::fs::canonicalize(path)
                    .unwrap_or_else(|_| path.clone())
                    .to_string_lossy()
                    .to_string(),
            ),
            TransportSpec::Tcp { host, port } => {
                Some(format!("tcp://{}:{}", host.to_ascii_lowercase(), port))
            }
            TransportSpec::Auto(_) => None,
        }
    }

    /// Turn an auto spec into the serial path it selects right now
    pub fn resolve(&self) -> Result<TransportSpec> {
        match self {
            TransportSpec::Auto(query) => detect::resolve_port(query).map(TransportSpec::Serial),
            fixed => Ok(fixed.clone()),
        }
    }
}

fn looks_like_serial_path(s: &str) -> bool {
    s.starts_with('/')
        || s.starts_with('.')
        || s.contains('\\')
        || is_com_port(s)
}

fn is_com_port(s: &str) -> bool {
    match (s.get(..3), s.get(3..)) {
        (Some(head), Some(num)) => {
            head.eq_ignore_ascii_case("com")
                && !num.is_empty()
                && num.chars().all(|c| c.is_ascii_digit())
        }
        _ => false,
    }
}

fn parse_host_port(spec: &str, rest: &str) -> Result<TransportSpec> {
    let invalid = |reason: &str| BridgeError::InvalidTransport {
        spec: spec.to_string(),
        reason: reason.to_string(),
    };
    let (host, port) = rest
        .rsplit_once(':')
        .ok_or_else(|| invalid("expected host:port"))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(invalid("empty host"));
    }
    let port: u16 = port.parse().map_err(|_| invalid("invalid port"))?;
    if port == 0 {
        return Err(invalid("port must be non-zero"));
    }
    Ok(TransportSpec::tcp(host, port))
}

impl FromStr for TransportSpec {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        let spec = s.trim();
        if spec.is_empty() {
            return Err(BridgeError::InvalidTransport {
                spec: s.to_string(),
                reason: "empty".to_string(),
            });
        }
        if spec == "auto" || spec.starts_with("auto:") {
            return spec
                .parse::<AutoDetectQuery>()
                .map(TransportSpec::Auto)
                .map_err(|reason| BridgeError::InvalidTransport {
                    spec: spec.to_string(),
                    reason,
                });
        }
        if let Some(rest) = spec.strip_prefix("tcp://") {
            return parse_host_port(spec, rest.trim_end_matches('/'));
        }
        if looks_like_serial_path(spec) {
            return Ok(TransportSpec::Serial(PathBuf::from(spec)));
        }
        parse_host_port(spec, spec)
    }
}

impl TryFrom<String> for TransportSpec {
    type Error = BridgeError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<TransportSpec> for String {
    fn from(spec: TransportSpec) -> Self {
        spec.to_string()
    }
}

impl fmt::Display for TransportSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportSpec::Serial(path) => write!(f, "{}", path.display()),
            TransportSpec::Tcp { host, port } if host.contains(':') => {
                write!(f, "tcp://[{host}]:{port}")
            }
            TransportSpec::Tcp { host, port } => write!(f, "tcp://{host}:{port}"),
            TransportSpec::Auto(query) => write!(f, "{query}"),
        }
    }
}

/// Settings for one radio network
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Which network this radio belongs to
    pub network: NetworkId,

    /// Where the radio is attached
    pub transport: TransportSpec,

    /// Baud rate for serial transports
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Local node id, when known ahead of the radio reporting it
    #[serde(default, with = "node_id_serde")]
    pub local_node_id: Option<NodeId>,

    /// Whether channel broadcasts on this network are dispatched
    #[serde(default = "default_true")]
    pub accept_broadcasts: bool,

    /// Channel used for broadcasts that do not name one
    #[serde(default)]
    pub default_channel: u8,

    /// Allow rebooting a TCP-attached radio remotely after repeated failures
    #[serde(default = "default_true")]
    pub remote_recovery: bool,
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_true() -> bool {
    true
}

impl NetworkConfig {
    /// Settings with defaults for a network and transport
    pub fn new(network: NetworkId, transport: TransportSpec) -> Self {
        Self {
            network,
            transport,
            baud_rate: DEFAULT_BAUD_RATE,
            local_node_id: None,
            accept_broadcasts: true,
            default_channel: 0,
            remote_recovery: true,
        }
    }

    /// Set the local node id
    pub fn with_local_node_id(mut self, id: NodeId) -> Self {
        self.local_node_id = Some(id);
        self
    }

    /// Set broadcast acceptance
    pub fn accept_broadcasts(mut self, accept: bool) -> Self {
        self.accept_broadcasts = accept;
        self
    }
}

/// Connection health and recovery timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Silence longer than this marks a connection degraded
    #[serde(with = "humantime_serde", default = "default_silence_timeout")]
    pub silence_timeout: Duration,

    /// Supervisor tick
    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub poll_interval: Duration,

    /// Pause between reconnect attempts
    #[serde(with = "humantime_serde", default = "default_reconnect_delay")]
    pub reconnect_delay: Duration,

    /// Attempts per reconnect cycle
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Deadline for one close-and-reopen attempt
    #[serde(with = "humantime_serde", default = "default_reconnect_timeout")]
    pub reconnect_timeout: Duration,

    /// Deadline for establishing a connection
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,

    /// Proactive reconnect period (disabled when absent)
    #[serde(with = "humantime_serde::option", default)]
    pub scheduled_reconnect: Option<Duration>,

    /// Consecutive failed reconnects before remote recovery
    #[serde(default = "default_escalate_after")]
    pub escalate_after: u32,

    /// Deadline for delivering the reboot directive
    #[serde(with = "humantime_serde", default = "default_reboot_timeout")]
    pub reboot_timeout: Duration,

    /// Wait after a reboot directive before the final reconnect
    #[serde(with = "humantime_serde", default = "default_reboot_settle")]
    pub reboot_settle: Duration,

    /// Upper bound on one blocking read
    #[serde(with = "humantime_serde", default = "default_read_poll")]
    pub read_poll: Duration,
}

fn default_silence_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_reconnect_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_max_reconnect_attempts() -> u32 {
    3
}

fn default_reconnect_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_connect_timeout() -> Duration {
    Duration::from_millis(DEFAULT_TIMEOUT_MS)
}

fn default_escalate_after() -> u32 {
    2
}

fn default_reboot_timeout() -> Duration {
    Duration::from_secs(20)
}

fn default_reboot_settle() -> Duration {
    Duration::from_secs(45)
}

fn default_read_poll() -> Duration {
    Duration::from_millis(250)
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            silence_timeout: default_silence_timeout(),
            poll_interval: default_poll_interval(),
            reconnect_delay: default_reconnect_delay(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_timeout: default_reconnect_timeout(),
            connect_timeout: default_connect_timeout(),
            scheduled_reconnect: None,
            escalate_after: default_escalate_after(),
            reboot_timeout: default_reboot_timeout(),
            reboot_settle: default_reboot_settle(),
            read_poll: default_read_poll(),
        }
    }
}

/// Broadcast loop suppression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupConfig {
    /// How long a self-emitted broadcast suppresses its echo
    #[serde(with = "humantime_serde", default = "default_dedup_window")]
    pub window: Duration,

    /// Maximum distinct texts tracked
    #[serde(default = "default_dedup_capacity")]
    pub capacity: usize,
}

fn default_dedup_window() -> Duration {
    Duration::from_secs(60)
}

fn default_dedup_capacity() -> usize {
    256
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            window: default_dedup_window(),
            capacity: default_dedup_capacity(),
        }
    }
}

/// Router queue sizing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Capacity of the inbound packet queue shared by all readers
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    /// Capacity of the bridge command queue
    #[serde(default = "default_queue_size")]
    pub command_queue_size: usize,
}

fn default_queue_size() -> usize {
    100
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            queue_size: default_queue_size(),
            command_queue_size: default_queue_size(),
        }
    }
}

/// Main configuration for the bridge
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// One entry per radio network
    #[serde(default)]
    pub networks: Vec<NetworkConfig>,

    /// Health and recovery timing
    #[serde(default)]
    pub health: HealthConfig,

    /// Broadcast loop suppression
    #[serde(default)]
    pub dedup: DedupConfig,

    /// Router queue sizing
    #[serde(default)]
    pub router: RouterConfig,

    /// SQLite contact database (in-memory contacts when absent)
    #[serde(default)]
    pub contacts_db: Option<PathBuf>,
}

impl BridgeConfig {
    /// Parse a JSON configuration document
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| BridgeError::InvalidConfig(e.to_string()))
    }

    /// Load a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    /// Settings for one network
    pub fn network(&self, id: NetworkId) -> Option<&NetworkConfig> {
        self.networks.iter().find(|n| n.network == id)
    }

    /// Check everything that can be checked without touching hardware
    pub fn validate(&self) -> Result<()> {
        if self.networks.is_empty() {
            return Err(BridgeError::InvalidConfig(
                "at least one network must be configured".to_string(),
            ));
        }

        let mut seen = Vec::with_capacity(self.networks.len());
        for net in &self.networks {
            if seen.contains(&net.network) {
                return Err(BridgeError::DuplicateNetwork(net.network));
            }
            seen.push(net.network);
        }

        let h = &self.health;
        if h.poll_interval.is_zero() || h.read_poll.is_zero() {
            return Err(BridgeError::InvalidConfig(
                "poll intervals must be non-zero".to_string(),
            ));
        }
        if h.max_reconnect_attempts == 0 {
            return Err(BridgeError::InvalidConfig(
                "max_reconnect_attempts must be at least 1".to_string(),
            ));
        }
        if h.silence_timeout <= h.read_poll {
            return Err(BridgeError::InvalidConfig(
                "silence_timeout must exceed read_poll".to_string(),
            ));
        }
        if self.dedup.capacity == 0 || self.router.queue_size == 0 {
            return Err(BridgeError::InvalidConfig(
                "dedup capacity and queue sizes must be non-zero".to_string(),
            ));
        }

        check_conflicts(self.networks.iter().map(|n| (n.network, &n.transport)))
    }
}

/// Fail when two networks occupy the same device or endpoint.
///
/// Unresolved auto specs are skipped; run this again once they resolve.
pub fn check_conflicts<'a>(
    transports: impl IntoIterator<Item = (NetworkId, &'a TransportSpec)>,
) -> Result<()> {
    let mut claimed: HashMap<String, NetworkId> = HashMap::new();
    for (network, spec) in transports {
        let Some(key) = spec.resource_key() else {
            continue;
        };
        if let Some(first) = claimed.get(&key) {
            return Err(BridgeError::PortConflict {
                resource: key,
                first: *first,
                second: network,
            });
        }
        claimed.insert(key, network);
    }
    Ok(())
}

/// Builder for BridgeConfig
#[derive(Debug, Default)]
pub struct BridgeConfigBuilder {
    config: BridgeConfig,
}

impl BridgeConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a network
    pub fn network(mut self, net: NetworkConfig) -> Self {
        self.config.networks.retain(|n| n.network != net.network);
        self.config.networks.push(net);
        self
    }

    /// Attach a Meshtastic radio
    pub fn meshtastic(self, transport: TransportSpec) -> Self {
        self.network(NetworkConfig::new(NetworkId::Meshtastic, transport))
    }

    /// Attach a MeshCore radio
    pub fn meshcore(self, transport: TransportSpec) -> Self {
        self.network(NetworkConfig::new(NetworkId::MeshCore, transport))
    }

    /// Set the silence timeout
    pub fn silence_timeout(mut self, timeout: Duration) -> Self {
        self.config.health.silence_timeout = timeout;
        self
    }

    /// Set the supervisor tick
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.health.poll_interval = interval;
        self
    }

    /// Enable proactive reconnects
    pub fn scheduled_reconnect(mut self, every: Duration) -> Self {
        self.config.health.scheduled_reconnect = Some(every);
        self
    }

    /// Set reconnect attempts per cycle
    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.config.health.max_reconnect_attempts = attempts;
        self
    }

    /// Replace all health settings
    pub fn health(mut self, health: HealthConfig) -> Self {
        self.config.health = health;
        self
    }

    /// Set the broadcast dedup window
    pub fn dedup_window(mut self, window: Duration) -> Self {
        self.config.dedup.window = window;
        self
    }

    /// Persist contacts to a SQLite file
    pub fn contacts_db(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.contacts_db = Some(path.into());
        self
    }

    /// Build the configuration
    pub fn build(self) -> BridgeConfig {
        self.config
    }
}

// Custom serde module for Duration with humantime
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use serde::{self, Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(d) => serializer.serialize_str(&humantime::format_duration(*d).to_string()),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Option::<String>::deserialize(deserializer)?
                .map(|s| humantime::parse_duration(&s).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

// Node ids as either a JSON number or a "!143bcd7f" / "0x..." string
mod node_id_serde {
    use meshbridge_core::node::{format_node_id, parse_node_id};
    use meshbridge_core::NodeId;
    use serde::{self, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u32),
        Text(String),
    }

    pub fn serialize<S>(id: &Option<NodeId>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match id {
            Some(id) => serializer.serialize_str(&format_node_id(*id)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NodeId>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<Raw>::deserialize(deserializer)? {
            None => Ok(None),
            Some(Raw::Number(n)) => Ok(Some(n)),
            Some(Raw::Text(s)) => parse_node_id(&s).map(Some).map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_health() {
        let health = HealthConfig::default();
        assert_eq!(health.silence_timeout, Duration::from_secs(120));
        assert_eq!(health.poll_interval, Duration::from_secs(30));
        assert_eq!(health.reconnect_delay, Duration::from_secs(2));
        assert_eq!(health.max_reconnect_attempts, 3);
        assert_eq!(health.escalate_after, 2);
        assert_eq!(health.reboot_timeout, Duration::from_secs(20));
        assert_eq!(health.reboot_settle, Duration::from_secs(45));
        assert!(health.scheduled_reconnect.is_none());
    }

    #[test]
    fn test_parse_transport_forms() {
        assert_eq!(
            "/dev/ttyUSB0".parse::<TransportSpec>().unwrap(),
            TransportSpec::serial("/dev/ttyUSB0")
        );
        assert_eq!(
            "COM3".parse::<TransportSpec>().unwrap(),
            TransportSpec::serial("COM3")
        );
        assert_eq!(
            "tcp://10.0.0.5:4403".parse::<TransportSpec>().unwrap(),
            TransportSpec::tcp("10.0.0.5", 4403)
        );
        assert_eq!(
            "radio.local:5000".parse::<TransportSpec>().unwrap(),
            TransportSpec::tcp("radio.local", 5000)
        );
        assert!("auto:product=T-Echo"
            .parse::<TransportSpec>()
            .unwrap()
            .is_auto());
    }

    #[test]
    fn test_parse_transport_rejects_garbage() {
        assert!("".parse::<TransportSpec>().is_err());
        assert!("tcp://host".parse::<TransportSpec>().is_err());
        assert!("host:notaport".parse::<TransportSpec>().is_err());
        assert!("auto:shape=round".parse::<TransportSpec>().is_err());
        assert!("radio".parse::<TransportSpec>().is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let json = r#"{
            "networks": [
                {"network": "meshtastic", "transport": "tcp://10.0.0.5:4403", "local_node_id": "!a1b2c3d4"},
                {"network": "meshcore", "transport": "auto:vendor_id=239a", "accept_broadcasts": false}
            ],
            "health": {"silence_timeout": "2m", "scheduled_reconnect": "3m"},
            "dedup": {"window": "90s"}
        }"#;
        let config = BridgeConfig::from_json(json).unwrap();
        assert_eq!(config.networks.len(), 2);
        let mt = config.network(NetworkId::Meshtastic).unwrap();
        assert_eq!(mt.local_node_id, Some(0xa1b2c3d4));
        assert!(mt.accept_broadcasts);
        assert!(!config.network(NetworkId::MeshCore).unwrap().accept_broadcasts);
        assert_eq!(config.health.silence_timeout, Duration::from_secs(120));
        assert_eq!(
            config.health.scheduled_reconnect,
            Some(Duration::from_secs(180))
        );
        assert_eq!(config.dedup.window, Duration::from_secs(90));
        assert!(config.validate().is_ok());

        let back = serde_json::to_string(&config).unwrap();
        assert!(back.contains("tcp://10.0.0.5:4403"));
        assert!(back.contains("auto:vendor_id=239a"));
    }

    #[test]
    fn test_duplicate_network_rejected() {
        let config = BridgeConfigBuilder::new()
            .meshtastic(TransportSpec::serial("/dev/ttyUSB0"))
            .build();
        let mut config = config;
        config.networks.push(NetworkConfig::new(
            NetworkId::Meshtastic,
            TransportSpec::serial("/dev/ttyUSB1"),
        ));
        assert!(matches!(
            config.validate(),
            Err(BridgeError::DuplicateNetwork(NetworkId::Meshtastic))
        ));
    }

    #[test]
    fn test_port_conflict_names_resource() {
        let config = BridgeConfigBuilder::new()
            .meshtastic(TransportSpec::serial("/dev/ttyUSB7"))
            .meshcore(TransportSpec::serial("/dev/ttyUSB7"))
            .build();
        match config.validate() {
            Err(BridgeError::PortConflict {
                resource,
                first,
                second,
            }) => {
                assert!(resource.contains("ttyUSB7"));
                assert_eq!(first, NetworkId::Meshtastic);
                assert_eq!(second, NetworkId::MeshCore);
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_tcp_conflict_ignores_host_case() {
        let a = TransportSpec::tcp("Radio.Local", 4403);
        let b = TransportSpec::tcp("radio.local", 4403);
        let c = TransportSpec::tcp("radio.local", 5000);
        assert!(check_conflicts([(NetworkId::Meshtastic, &a), (NetworkId::MeshCore, &b)]).is_err());
        assert!(check_conflicts([(NetworkId::Meshtastic, &a), (NetworkId::MeshCore, &c)]).is_ok());
    }

    #[test]
    fn test_auto_specs_skip_conflict_check() {
        let auto: TransportSpec = "auto".parse().unwrap();
        assert!(auto.resource_key().is_none());
        assert!(check_conflicts([(NetworkId::Meshtastic, &auto), (NetworkId::MeshCore, &auto)]).is_ok());
    }

    #[test]
    fn test_empty_config_invalid() {
        assert!(matches!(
            BridgeConfig::default().validate(),
            Err(BridgeError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_builder_replaces_network() {
        let config = BridgeConfigBuilder::new()
            .meshcore(TransportSpec::serial("/dev/ttyACM0"))
            .meshcore(TransportSpec::tcp("10.0.0.9", MESHCORE_TCP_PORT))
            .scheduled_reconnect(Duration::from_secs(180))
            .build();
        assert_eq!(config.networks.len(), 1);
        assert!(config.networks[0].transport.is_tcp());
        assert_eq!(
            config.networks[0].transport.remote_host(),
            Some(("10.0.0.9", 5000))
        );
    }
}
