//! Bootstrap options of a [`NacosClient`](crate::NacosClient).
//!
//! Read from a file with a top-level `nacos` key, in any format the
//! `config` crate understands (picked by file extension):
//!
//! ```yaml
//! nacos:
//!   server:
//!     server-addr:
//!       - 10.0.0.1:8848
//!       - 10.0.0.2:8848
//!     lb-strategy: round-robin
//!   config:
//!     namespace: dev
//!     snapshot-dir: /var/lib/app/nacos
//!     config-ids:
//!       - app.yaml
//!   discovery:
//!     service-name: order-service
//!     port: 8080
//! ```
use crate::error::{NacosError, Result};
use crate::lb::{DEFAULT_WEIGHT, HEALTH_PATH, LoadBalanceStrategy};
use crate::protocol::{DEFAULT_GROUP, DEFAULT_NAMESPACE, ServiceInstance};
use crate::utils;
use anyhow::Context;
use derive_builder::Builder;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Files tried, in order, when no bootstrap file is given.
pub const DEFAULT_BOOTSTRAP_FILES: [&str; 2] = ["bootstrap.yaml", "bootstrap.yml"];

/// The top-level key in a bootstrap file is `nacos`
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct NacosConfigWrapper {
    pub(crate) nacos: NacosConfig,
}

#[derive(Debug, Clone, Deserialize, Builder)]
#[serde(rename_all = "kebab-case")]
pub struct NacosConfig {
    /// Registry front-end servers
    pub server: ServerConfig,
    /// Configuration files
    #[serde(default)]
    #[builder(setter(strip_option), default)]
    pub config: Option<ConfigConfig>,
    /// Registration of this process
    #[serde(default)]
    #[builder(setter(strip_option), default)]
    pub discovery: Option<DiscoveryConfig>,
}

impl NacosConfig {
    /// Reads `path`. The format follows the file extension.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let wrapper: NacosConfigWrapper = ::config::Config::builder()
            .add_source(::config::File::from(path))
            .build()
            .and_then(|c| c.try_deserialize())
            .with_context(|| format!("parse bootstrap config {} failed", path.display()))?;
        log::info!("loaded bootstrap config from {}", path.display());
        Ok(wrapper.nacos)
    }

    /// Reads the first existing file of [`DEFAULT_BOOTSTRAP_FILES`].
    pub fn from_default_file() -> anyhow::Result<Self> {
        let file = DEFAULT_BOOTSTRAP_FILES
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
            .with_context(|| format!("none of {:?} found", DEFAULT_BOOTSTRAP_FILES))?;
        Self::from_file(file)
    }
}

#[derive(Debug, Default, Deserialize, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum ServerAddr {
    Single(String),
    Cluster(Vec<String>),
    #[default]
    Unset,
}

impl ServerAddr {
    /// Every address; a single value may list several separated by `,`.
    pub fn addresses(&self) -> Vec<String> {
        match self {
            ServerAddr::Single(s) => s
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            ServerAddr::Cluster(list) => list
                .iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            ServerAddr::Unset => vec![],
        }
    }
}

impl From<&str> for ServerAddr {
    fn from(value: &str) -> Self {
        ServerAddr::Single(value.to_string())
    }
}
impl From<Vec<&str>> for ServerAddr {
    fn from(value: Vec<&str>) -> Self {
        ServerAddr::Cluster(value.into_iter().map(|s| s.to_string()).collect())
    }
}
impl From<Vec<String>> for ServerAddr {
    fn from(value: Vec<String>) -> Self {
        ServerAddr::Cluster(value)
    }
}

#[derive(Debug, Clone, Deserialize, Builder)]
#[serde(rename_all = "kebab-case")]
pub struct ServerConfig {
    /// Registry address, e.g.: `127.0.0.1:8848`
    #[builder(setter(into))]
    pub server_addr: ServerAddr,
    #[serde(default)]
    #[builder(default)]
    pub lb_strategy: LoadBalanceStrategy,
    /// Address server refreshing the server list, e.g.: `10.0.0.9:8080`
    #[serde(default)]
    #[builder(setter(into, strip_option), default)]
    pub endpoint: Option<String>,
    #[serde(default = "ServerConfig::default_weight")]
    #[builder(default = "ServerConfig::default_weight()")]
    pub weight: u32,
    #[serde(default = "ServerConfig::default_health_path")]
    #[builder(setter(into), default = "ServerConfig::default_health_path()")]
    pub health_path: String,
    #[serde(default = "ServerConfig::default_health_check_interval_ms")]
    #[builder(default = "ServerConfig::default_health_check_interval_ms()")]
    pub health_check_interval_ms: u64,
    #[serde(default = "ServerConfig::default_health_check_timeout_ms")]
    #[builder(default = "ServerConfig::default_health_check_timeout_ms()")]
    pub health_check_timeout_ms: u64,
    #[serde(default = "ServerConfig::default_connect_timeout_ms")]
    #[builder(default = "ServerConfig::default_connect_timeout_ms()")]
    pub connect_timeout_ms: u64,
    #[serde(default = "ServerConfig::default_request_timeout_ms")]
    #[builder(default = "ServerConfig::default_request_timeout_ms()")]
    pub request_timeout_ms: u64,
    /// How long the server may hold a config listen call
    #[serde(default = "ServerConfig::default_long_poll_timeout_ms")]
    #[builder(default = "ServerConfig::default_long_poll_timeout_ms()")]
    pub long_poll_timeout_ms: u64,
}

impl ServerConfig {
    fn default_weight() -> u32 {
        DEFAULT_WEIGHT
    }
    fn default_health_path() -> String {
        HEALTH_PATH.to_string()
    }
    fn default_health_check_interval_ms() -> u64 {
        10_000
    }
    fn default_health_check_timeout_ms() -> u64 {
        3_000
    }
    fn default_connect_timeout_ms() -> u64 {
        3_000
    }
    fn default_request_timeout_ms() -> u64 {
        5_000
    }
    fn default_long_poll_timeout_ms() -> u64 {
        30_000
    }

    /// Configured addresses, rejecting an empty list.
    pub fn addresses(&self) -> Result<Vec<String>> {
        let addresses = self.server_addr.addresses();
        if addresses.is_empty() {
            return Err(NacosError::Config("server-addr is not set".to_string()));
        }
        Ok(addresses)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn long_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.long_poll_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Builder)]
#[serde(rename_all = "kebab-case")]
pub struct ConfigConfig {
    /// Namespace, default: public
    #[serde(default = "default_namespace")]
    #[builder(setter(into), default = "default_namespace()")]
    pub namespace: String,
    /// Group of `config-ids`, default: DEFAULT_GROUP
    #[serde(default = "default_group")]
    #[builder(setter(into), default = "default_group()")]
    pub group: String,
    /// Where fetched files are mirrored for offline starts
    #[builder(setter(into))]
    pub snapshot_dir: PathBuf,
    /// Files loaded by [`NacosClient::load_configs`](crate::NacosClient::load_configs),
    /// e.g.: `["app.yaml"]`
    #[serde(default)]
    #[builder(default)]
    pub config_ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Builder)]
#[serde(rename_all = "kebab-case")]
pub struct DiscoveryConfig {
    /// Service name, default: the process name
    #[serde(default = "utils::current_process_name")]
    #[builder(setter(into), default = "utils::current_process_name()")]
    pub service_name: String,
    /// Namespace, default: public
    #[serde(default = "default_namespace")]
    #[builder(setter(into), default = "default_namespace()")]
    pub namespace: String,
    #[serde(default = "default_group")]
    #[builder(setter(into), default = "default_group()")]
    pub group: String,
    #[serde(default)]
    #[builder(setter(into), default)]
    pub cluster: String,
    /// Advertised address, default: `LOCAL_IP` or the outbound interface
    #[serde(default)]
    #[builder(setter(into, strip_option), default)]
    pub ip: Option<String>,
    pub port: u16,
    #[serde(default = "DiscoveryConfig::default_weight")]
    #[builder(default = "DiscoveryConfig::default_weight()")]
    pub weight: f64,
    /// Kept alive by heartbeats instead of persisted by the registry
    #[serde(default = "DiscoveryConfig::default_ephemeral")]
    #[builder(default = "DiscoveryConfig::default_ephemeral()")]
    pub ephemeral: bool,
    #[serde(default)]
    #[builder(default)]
    pub metadata: BTreeMap<String, String>,
}

impl DiscoveryConfig {
    fn default_weight() -> f64 {
        1.0
    }
    fn default_ephemeral() -> bool {
        true
    }

    /// The instance this process registers as.
    pub fn instance(&self) -> ServiceInstance {
        let ip = self
            .ip
            .clone()
            .filter(|ip| !ip.trim().is_empty())
            .unwrap_or_else(utils::local_ip);
        let mut instance = ServiceInstance::new(&self.service_name, ip, self.port);
        instance.namespace_id = self.namespace.clone();
        instance.group_name = self.group.clone();
        instance.cluster_name = self.cluster.clone();
        instance.weight = self.weight;
        instance.ephemeral = self.ephemeral;
        instance.metadata = self.metadata.clone();
        instance
    }
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_group() -> String {
    DEFAULT_GROUP.to_string()
}
