use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

fn self_hostname() -> String {
    "localhost".to_string()
}
const fn ping_interval() -> u32 {
    120
}
const fn inbound_rate_limit_percent() -> u8 {
    100
}
const fn outbound_rate_limit_percent() -> u8 {
    30
}
fn selected_network() -> String {
    "mainnet".to_string()
}
fn dns_servers() -> Vec<String> {
    vec![
        "dns-introducer.evergreen.net".to_string(),
        "seeder.evergreen-network.org".to_string(),
    ]
}
const fn full_node_port() -> u16 {
    9733
}
fn full_node_db_path() -> String {
    "db/blockchain_v1_CHALLENGE".to_string()
}
fn full_node_peer_db_path() -> String {
    "db/peer_table_node".to_string()
}
const fn full_node_db_readers() -> usize {
    4
}
const fn full_node_sync_blocks_behind_threshold() -> u32 {
    300
}
const fn full_node_short_sync_blocks_behind_threshold() -> u32 {
    20
}
const fn full_node_bad_peak_cache_size() -> usize {
    100
}
const fn full_node_peer_connect_interval() -> u64 {
    30
}
const fn full_node_peer_connect_timeout() -> u64 {
    30
}
const fn full_node_target_peer_count() -> usize {
    80
}
const fn full_node_target_outbound_peer_count() -> usize {
    8
}
const fn full_node_max_inbound_wallet() -> usize {
    20
}
const fn full_node_max_inbound_farmer() -> usize {
    10
}
const fn full_node_max_inbound_timelord() -> usize {
    5
}
const fn full_node_recent_peer_threshold() -> u64 {
    6000
}
const fn full_node_target_uncompact_proofs() -> usize {
    100
}
const fn full_node_weight_proof_timeout() -> u64 {
    360
}
const fn full_node_max_sync_wait() -> u64 {
    30
}
const fn full_node_max_subscribe_items() -> usize {
    200_000
}
const fn full_node_max_subscribe_response_items() -> usize {
    100_000
}
const fn full_node_trusted_max_subscribe_items() -> usize {
    2_000_000
}
const fn full_node_trusted_max_subscribe_response_items() -> usize {
    500_000
}
const fn full_node_max_duplicate_unfinished_blocks() -> usize {
    3
}
const fn full_node_pending_block_ttl() -> u64 {
    60
}
const fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DbSyncMode {
    On,
    Full,
    Off,
    #[default]
    Auto,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkOverride {
    pub address_prefix: Option<String>,
    pub default_full_node_port: Option<u16>,
}

#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkOverrides {
    #[serde(default)]
    pub config: HashMap<String, NetworkOverride>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSettings {
    pub log_stdout: bool,
    pub log_level: String,
    pub log_filename: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        LoggingSettings {
            log_stdout: true,
            log_level: "INFO".to_string(),
            log_filename: "log/debug.log".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullNodeConfig {
    #[serde(default = "full_node_port")]
    pub port: u16,
    #[serde(default = "full_node_db_path")]
    pub database_path: String,
    #[serde(default = "full_node_peer_db_path")]
    pub peer_db_path: String,
    #[serde(default)]
    pub db_sync: DbSyncMode,
    #[serde(default = "full_node_db_readers")]
    pub db_readers: usize,
    #[serde(default = "full_node_sync_blocks_behind_threshold")]
    pub sync_blocks_behind_threshold: u32,
    #[serde(default = "full_node_short_sync_blocks_behind_threshold")]
    pub short_sync_blocks_behind_threshold: u32,
    #[serde(default = "full_node_bad_peak_cache_size")]
    pub bad_peak_cache_size: usize,
    #[serde(default)]
    pub reserved_cores: usize,
    #[serde(default)]
    pub single_threaded: bool,
    #[serde(default = "full_node_peer_connect_interval")]
    pub peer_connect_interval: u64,
    #[serde(default = "full_node_peer_connect_timeout")]
    pub peer_connect_timeout: u64,
    #[serde(default = "full_node_target_peer_count")]
    pub target_peer_count: usize,
    #[serde(default = "full_node_target_outbound_peer_count")]
    pub target_outbound_peer_count: usize,
    #[serde(default = "full_node_max_inbound_wallet")]
    pub max_inbound_wallet: usize,
    #[serde(default = "full_node_max_inbound_farmer")]
    pub max_inbound_farmer: usize,
    #[serde(default = "full_node_max_inbound_timelord")]
    pub max_inbound_timelord: usize,
    #[serde(default = "full_node_recent_peer_threshold")]
    pub recent_peer_threshold: u64,
    #[serde(default)]
    pub send_uncompact_interval: u64,
    #[serde(default = "full_node_target_uncompact_proofs")]
    pub target_uncompact_proofs: usize,
    /// Known-risky; nothing in the node enables this silently.
    #[serde(default)]
    pub sanitize_weight_proof_only: bool,
    /// Known-risky; nothing in the node enables this silently.
    #[serde(default)]
    pub use_delta_sync: bool,
    #[serde(default = "full_node_weight_proof_timeout")]
    pub weight_proof_timeout: u64,
    #[serde(default = "full_node_max_sync_wait")]
    pub max_sync_wait: u64,
    #[serde(default = "full_node_max_subscribe_items")]
    pub max_subscribe_items: usize,
    #[serde(default = "full_node_max_subscribe_response_items")]
    pub max_subscribe_response_items: usize,
    #[serde(default = "full_node_trusted_max_subscribe_items")]
    pub trusted_max_subscribe_items: usize,
    #[serde(default = "full_node_trusted_max_subscribe_response_items")]
    pub trusted_max_subscribe_response_items: usize,
    #[serde(default = "full_node_max_duplicate_unfinished_blocks")]
    pub max_duplicate_unfinished_blocks: usize,
    #[serde(default = "full_node_pending_block_ttl")]
    pub pending_block_ttl: u64,
    #[serde(default = "dns_servers")]
    pub dns_servers: Vec<String>,
    #[serde(default = "default_true")]
    pub enable_upnp: bool,
    #[serde(default)]
    pub trusted_peers: HashMap<String, String>,
    #[serde(default = "selected_network")]
    pub selected_network: String,
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl Default for FullNodeConfig {
    fn default() -> Self {
        FullNodeConfig {
            port: full_node_port(),
            database_path: full_node_db_path(),
            peer_db_path: full_node_peer_db_path(),
            db_sync: DbSyncMode::default(),
            db_readers: full_node_db_readers(),
            sync_blocks_behind_threshold: full_node_sync_blocks_behind_threshold(),
            short_sync_blocks_behind_threshold: full_node_short_sync_blocks_behind_threshold(),
            bad_peak_cache_size: full_node_bad_peak_cache_size(),
            reserved_cores: 0,
            single_threaded: false,
            peer_connect_interval: full_node_peer_connect_interval(),
            peer_connect_timeout: full_node_peer_connect_timeout(),
            target_peer_count: full_node_target_peer_count(),
            target_outbound_peer_count: full_node_target_outbound_peer_count(),
            max_inbound_wallet: full_node_max_inbound_wallet(),
            max_inbound_farmer: full_node_max_inbound_farmer(),
            max_inbound_timelord: full_node_max_inbound_timelord(),
            recent_peer_threshold: full_node_recent_peer_threshold(),
            send_uncompact_interval: 0,
            target_uncompact_proofs: full_node_target_uncompact_proofs(),
            sanitize_weight_proof_only: false,
            use_delta_sync: false,
            weight_proof_timeout: full_node_weight_proof_timeout(),
            max_sync_wait: full_node_max_sync_wait(),
            max_subscribe_items: full_node_max_subscribe_items(),
            max_subscribe_response_items: full_node_max_subscribe_response_items(),
            trusted_max_subscribe_items: full_node_trusted_max_subscribe_items(),
            trusted_max_subscribe_response_items: full_node_trusted_max_subscribe_response_items(),
            max_duplicate_unfinished_blocks: full_node_max_duplicate_unfinished_blocks(),
            pending_block_ttl: full_node_pending_block_ttl(),
            dns_servers: dns_servers(),
            enable_upnp: true,
            trusted_peers: HashMap::new(),
            selected_network: selected_network(),
            logging: LoggingSettings::default(),
        }
    }
}

/// The whole configuration tree, keyed by service. Loaded once at startup
/// and shared immutably; a reload constructs a fresh value and swaps the
/// `Arc`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "self_hostname")]
    pub self_hostname: String,
    #[serde(default = "ping_interval")]
    pub ping_interval: u32,
    #[serde(default = "inbound_rate_limit_percent")]
    pub inbound_rate_limit_percent: u8,
    #[serde(default = "outbound_rate_limit_percent")]
    pub outbound_rate_limit_percent: u8,
    #[serde(default = "selected_network")]
    pub selected_network: String,
    #[serde(default)]
    pub network_overrides: NetworkOverrides,
    #[serde(default)]
    pub full_node: FullNodeConfig,
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            self_hostname: self_hostname(),
            ping_interval: ping_interval(),
            inbound_rate_limit_percent: inbound_rate_limit_percent(),
            outbound_rate_limit_percent: outbound_rate_limit_percent(),
            selected_network: selected_network(),
            network_overrides: NetworkOverrides::default(),
            full_node: FullNodeConfig::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, std::io::Error> {
        let contents = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&contents).map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("failed to parse {}: {e}", path.display()),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.full_node.port, 9733);
        assert_eq!(config.full_node.sync_blocks_behind_threshold, 300);
        assert_eq!(config.full_node.short_sync_blocks_behind_threshold, 20);
        assert_eq!(config.full_node.max_sync_wait, 30);
        // risky toggles ship disabled
        assert!(!config.full_node.sanitize_weight_proof_only);
        assert!(!config.full_node.use_delta_sync);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let config: Config = serde_yaml::from_str(
            "full_node:\n  port: 19733\n  reserved_cores: 2\nselected_network: testnet\n",
        )
        .unwrap();
        assert_eq!(config.full_node.port, 19733);
        assert_eq!(config.full_node.reserved_cores, 2);
        assert_eq!(config.selected_network, "testnet");
        assert_eq!(config.full_node.target_peer_count, 80);
        assert_eq!(config.full_node.db_sync, DbSyncMode::Auto);
    }

    #[test]
    fn test_db_sync_mode_parses_lowercase() {
        let config: Config =
            serde_yaml::from_str("full_node:\n  db_sync: full\n").unwrap();
        assert_eq!(config.full_node.db_sync, DbSyncMode::Full);
    }
}
