use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

mod listen_key;
pub(crate) mod request;

pub use listen_key::{ListenKey, parse_listen_key, parse_listen_keys};
pub use request::*;

/// Separator between group and service name in qualified service names.
pub const SPLITTER: &str = "@@";
pub const DEFAULT_GROUP: &str = "DEFAULT_GROUP";
pub const DEFAULT_NAMESPACE: &str = "public";

/// `group@@service`, or the bare name when the group is empty.
pub fn grouped_service_name(group: &str, service: &str) -> String {
    if group.is_empty() {
        service.to_string()
    } else {
        format!("{}{}{}", group, SPLITTER, service)
    }
}

/// Splits `group@@service` into its parts, defaulting the group.
pub fn split_service_name(name: &str) -> (&str, &str) {
    match name.split_once(SPLITTER) {
        Some((group, service)) => (group, service),
        None => (DEFAULT_GROUP, name),
    }
}

/// One registered endpoint of a service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceInstance {
    pub instance_id: String,
    pub ip: String,
    pub port: u16,
    pub namespace_id: String,
    pub service_name: String,
    pub group_name: String,
    pub cluster_name: String,
    pub weight: f64,
    pub healthy: bool,
    pub enabled: bool,
    pub ephemeral: bool,
    pub metadata: BTreeMap<String, String>,
}

impl Default for ServiceInstance {
    fn default() -> Self {
        Self {
            instance_id: String::new(),
            ip: String::new(),
            port: 0,
            namespace_id: String::new(),
            service_name: String::new(),
            group_name: String::new(),
            cluster_name: String::new(),
            weight: 1.0,
            healthy: true,
            enabled: true,
            ephemeral: true,
            metadata: BTreeMap::new(),
        }
    }
}

impl ServiceInstance {
    pub fn new(service_name: impl Into<String>, ip: impl Into<String>, port: u16) -> Self {
        Self {
            service_name: service_name.into(),
            ip: ip.into(),
            port,
            ..Default::default()
        }
    }

    /// Whether both describe the same registration.
    pub fn same_identity(&self, other: &ServiceInstance) -> bool {
        self.ip == other.ip
            && self.port == other.port
            && self.cluster_name == other.cluster_name
            && self.service_name == other.service_name
    }

    pub fn is_routable(&self) -> bool {
        self.healthy && self.enabled
    }

    /// Fills in the query scope a registry host entry does not carry.
    pub(crate) fn scoped(mut self, namespace_id: &str, group_name: &str) -> Self {
        let (_, service) = split_service_name(&self.service_name);
        self.service_name = service.to_string();
        self.namespace_id = namespace_id.to_string();
        self.group_name = group_name.to_string();
        self
    }
}

/// Response of the instance list endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceInstanceListResult {
    pub dom: String,
    pub name: String,
    pub cache_millis: i64,
    pub hosts: Vec<ServiceInstance>,
    #[serde(rename = "checkSum")]
    pub checksum: String,
    pub last_ref_time: i64,
    pub env: String,
    pub clusters: String,
    pub metadata: BTreeMap<String, String>,
}

/// Beat payload, sent JSON encoded in the `beat` query parameter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeatInfo {
    pub service_name: String,
    pub ip: String,
    pub port: u16,
    pub cluster: String,
    pub weight: f64,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub metadata: BTreeMap<String, String>,
}

impl From<&ServiceInstance> for BeatInfo {
    fn from(instance: &ServiceInstance) -> Self {
        Self {
            service_name: grouped_service_name(&instance.group_name, &instance.service_name),
            ip: instance.ip.clone(),
            port: instance.port,
            cluster: instance.cluster_name.clone(),
            weight: instance.weight,
            metadata: instance.metadata.clone(),
        }
    }
}

/// Beat code meaning the registry no longer knows the instance.
pub const BEAT_RESOURCE_NOT_FOUND: i32 = 20404;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BeatResult {
    /// Next beat interval in milliseconds, 0 when the server did not say
    pub client_beat_interval: i64,
    pub code: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceDetail {
    pub name: String,
    pub group_name: String,
    pub namespace_id: String,
    pub protect_threshold: f64,
    pub metadata: BTreeMap<String, String>,
    pub selector: Option<serde_json::Value>,
    pub clusters: Vec<ClusterDetail>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterDetail {
    pub name: String,
    pub health_checker: Option<serde_json::Value>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceList {
    pub count: usize,
    pub doms: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryServers {
    pub servers: Vec<RegistryServer>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegistryServer {
    pub ip: String,
    pub serve_port: u16,
    pub site: String,
    pub weight: i64,
    #[serde(rename = "ad_weight")]
    pub ad_weight: i64,
    pub alive: bool,
    pub last_ref_time: i64,
    pub last_ref_time_str: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegistryLeader {
    pub heartbeat_due_ms: i64,
    pub leader_due_ms: i64,
    pub term: i64,
    pub ip: String,
    pub vote_for: String,
    /// LEADER, FOLLOWER or CANDIDATE
    pub state: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegistryMetrics {
    pub status: String,
    pub server_count: usize,
    pub service_count: usize,
    pub instance_count: usize,
    pub responsible_service_count: usize,
    pub responsible_instance_count: usize,
    pub load: f64,
    pub cpu: f64,
    pub mem: f64,
}

/// Response of the instance detail endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstanceDetail {
    pub instance_id: String,
    pub ip: String,
    pub port: u16,
    /// `group@@service`
    pub service: String,
    pub cluster_name: String,
    pub weight: f64,
    pub healthy: bool,
    pub enabled: bool,
    pub metadata: BTreeMap<String, String>,
}

/// Lower and upper probe delay bounds of one health check kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckParams {
    pub max: i64,
    pub min: i64,
    pub factor: f64,
}

/// Runtime switches of the registry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegistrySwitches {
    pub name: String,
    pub masters: Option<Vec<String>>,
    pub add_weight_map: BTreeMap<String, String>,
    pub default_push_cache_millis: i64,
    pub client_beat_interval: i64,
    pub default_cache_millis: i64,
    pub distro_threshold: f64,
    pub health_check_enabled: bool,
    pub distro_enabled: bool,
    pub enable_standalone: bool,
    pub push_enabled: bool,
    pub check_times: i64,
    pub http_health_params: HealthCheckParams,
    pub tcp_health_params: HealthCheckParams,
    #[serde(rename = "mysqlHealthParams")]
    pub mysql_health_params: HealthCheckParams,
    pub incremental_list: Vec<String>,
    pub server_status_synchronization_period_millis: i64,
    pub service_status_synchronization_period_millis: i64,
    #[serde(rename = "disableAddIP")]
    pub disable_add_ip: bool,
    pub send_beat_only: bool,
    pub limited_url_map: BTreeMap<String, i64>,
    pub distro_server_expired_millis: i64,
    pub push_go_version: String,
    pub push_java_version: String,
    pub push_python_version: String,
    pub push_c_version: String,
    pub enable_authentication: bool,
    pub overridden_server_status: Option<String>,
    pub default_instance_ephemeral: bool,
    pub health_check_white_list: Vec<String>,
    pub checksum: Option<String>,
}

/// A service with its instances grouped by cluster, as listed by the
/// catalog endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CatalogService {
    pub service_name: String,
    pub group_name: String,
    pub cluster_map: BTreeMap<String, CatalogCluster>,
    pub metadata: BTreeMap<String, String>,
}

impl CatalogService {
    pub fn instance_count(&self) -> usize {
        self.cluster_map.values().map(|c| c.hosts.len()).sum()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogCluster {
    pub hosts: Vec<CatalogHost>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogHost {
    pub ip: String,
    pub port: u16,
    pub weight: f64,
    pub valid: bool,
    pub enabled: bool,
    pub metadata: BTreeMap<String, String>,
}

/// How the registry probes the instances of a persistent cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HealthChecker {
    #[default]
    #[serde(rename = "NONE")]
    None,
    #[serde(rename = "TCP")]
    Tcp,
    #[serde(rename = "HTTP", rename_all = "camelCase")]
    Http {
        path: String,
        headers: String,
        expected_response_code: u16,
    },
    #[serde(rename = "MYSQL")]
    Mysql { user: String, pwd: String, cmd: String },
}
