//! swarm.toml configuration parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::parse_duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmConfig {
    pub node: NodeConfig,
    pub security: SecurityConfig,
    pub dispatcher: DispatcherConfig,
    pub scheduler: SchedulerConfig,
    pub storage: StorageConfig,
    pub compute: ComputeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Identity used as sender on the bus and signer on the ledger.
    pub identity: String,
    /// Address of the bus hub.
    pub bus_addr: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            identity: "anonymous".to_string(),
            bus_addr: "127.0.0.1:7450".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub enabled: bool,
    /// Directory of `<identity>.cert` files forming the whitelist.
    pub cert_dir: Option<PathBuf>,
    /// Hex-encoded ed25519 secret key for this node.
    pub key_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub ack_timeout: String,
    pub compute_timeout: String,
    pub heartbeat_interval: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            ack_timeout: "4s".to_string(),
            compute_timeout: "30s".to_string(),
            heartbeat_interval: "60s".to_string(),
        }
    }
}

impl DispatcherConfig {
    pub fn ack_timeout(&self) -> Duration {
        parse_duration(&self.ack_timeout).unwrap_or(Duration::from_secs(4))
    }

    pub fn compute_timeout(&self) -> Duration {
        parse_duration(&self.compute_timeout).unwrap_or(Duration::from_secs(30))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        parse_duration(&self.heartbeat_interval).unwrap_or(Duration::from_secs(60))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Ledger account this worker claims under.
    pub account: String,
    /// Model keys this worker can serve.
    pub capabilities: Vec<String>,
    /// If non-empty, only these model keys are considered.
    pub allow_list: Vec<String>,
    pub deny_list: Vec<String>,
    /// Identities this worker refuses to race against.
    pub non_compete: Vec<String>,
    /// Maximum competing claims a job may already have.
    pub max_concurrent: usize,
    /// Jobs this worker runs at once.
    pub max_inflight: usize,
    pub refresh_interval: String,
    pub poll_interval: String,
    /// Consecutive refresh failures before the loop gives up.
    pub max_ledger_failures: u32,
    pub ledger_path: PathBuf,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            account: "anonymous".to_string(),
            capabilities: Vec::new(),
            allow_list: Vec::new(),
            deny_list: Vec::new(),
            non_compete: Vec::new(),
            max_concurrent: 3,
            max_inflight: 1,
            refresh_interval: "2s".to_string(),
            poll_interval: "1s".to_string(),
            max_ledger_failures: 10,
            ledger_path: PathBuf::from("ledger.redb"),
        }
    }
}

impl SchedulerConfig {
    pub fn refresh_interval(&self) -> Duration {
        parse_duration(&self.refresh_interval).unwrap_or(Duration::from_secs(2))
    }

    pub fn poll_interval(&self) -> Duration {
        parse_duration(&self.poll_interval).unwrap_or(Duration::from_secs(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// `host:port` of the blob store HTTP API.
    pub api_url: String,
    /// Mirror templates, `{cid}` is substituted.
    pub gateways: Vec<String>,
    pub pin_ttl: String,
    pub fetch_attempts: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            api_url: "127.0.0.1:5001".to_string(),
            gateways: vec!["127.0.0.1:8080/ipfs/{cid}".to_string()],
            pin_ttl: "5m".to_string(),
            fetch_attempts: 3,
        }
    }
}

impl StorageConfig {
    pub fn pin_ttl(&self) -> Duration {
        parse_duration(&self.pin_ttl).unwrap_or(Duration::from_secs(300))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputeConfig {
    pub model_cache_capacity: usize,
    /// External process implementing the compute hook.
    pub command: Option<PathBuf>,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            model_cache_capacity: 1,
            command: None,
        }
    }
}

impl SwarmConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: SwarmConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject durations that would otherwise silently fall back to defaults.
    pub fn validate(&self) -> anyhow::Result<()> {
        let durations = [
            ("dispatcher.ack_timeout", &self.dispatcher.ack_timeout),
            ("dispatcher.compute_timeout", &self.dispatcher.compute_timeout),
            ("dispatcher.heartbeat_interval", &self.dispatcher.heartbeat_interval),
            ("scheduler.refresh_interval", &self.scheduler.refresh_interval),
            ("scheduler.poll_interval", &self.scheduler.poll_interval),
            ("storage.pin_ttl", &self.storage.pin_ttl),
        ];
        for (key, value) in durations {
            if parse_duration(value).is_none() {
                anyhow::bail!("invalid duration for {key}: {value:?}");
            }
        }
        if self.security.enabled && self.security.cert_dir.is_none() {
            anyhow::bail!("security.enabled requires security.cert_dir");
        }
        if self.compute.model_cache_capacity == 0 {
            anyhow::bail!("compute.model_cache_capacity must be at least 1");
        }
        if self.scheduler.max_inflight == 0 {
            anyhow::bail!("scheduler.max_inflight must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = SwarmConfig::from_toml("").unwrap();
        assert_eq!(config.dispatcher.ack_timeout(), Duration::from_secs(4));
        assert_eq!(config.dispatcher.compute_timeout(), Duration::from_secs(30));
        assert_eq!(config.dispatcher.heartbeat_interval(), Duration::from_secs(60));
        assert_eq!(config.scheduler.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.scheduler.max_concurrent, 3);
        assert!(!config.security.enabled);
    }

    #[test]
    fn parses_scheduler_section() {
        let toml_str = r#"
[node]
identity = "worker-a"

[scheduler]
account = "worker-a"
capabilities = ["sd-1.5", "sdxl"]
deny_list = ["sdxl"]
non_compete = ["worker-b"]
max_concurrent = 2
refresh_interval = "500ms"
"#;
        let config = SwarmConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.node.identity, "worker-a");
        assert_eq!(config.scheduler.capabilities.len(), 2);
        assert_eq!(config.scheduler.non_compete, vec!["worker-b".to_string()]);
        assert_eq!(config.scheduler.refresh_interval(), Duration::from_millis(500));
    }

    #[test]
    fn bad_duration_is_rejected() {
        let err = SwarmConfig::from_toml("[dispatcher]\nack_timeout = \"soon\"\n").unwrap_err();
        assert!(err.to_string().contains("ack_timeout"));
    }

    #[test]
    fn security_requires_cert_dir() {
        assert!(SwarmConfig::from_toml("[security]\nenabled = true\n").is_err());
    }

    #[test]
    fn round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("swarm.toml");
        let mut config = SwarmConfig::default();
        config.storage.fetch_attempts = 7;
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();

        let loaded = SwarmConfig::from_file(&path).unwrap();
        assert_eq!(loaded.storage.fetch_attempts, 7);
    }
}
