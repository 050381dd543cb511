//! # Registry front-end load balancing
//!
//! Every outbound registry call first asks a [`LoadBalancer`] for one live
//! front-end server.
//!
//! ## [`DirectProxy`]
//! Always the single configured server, no health awareness.
//!
//! ## [`WeightRoundRobin`]
//! Smooth weighted round robin over the servers the [`HealthChecker`]
//! currently reports as passing.
//!
//! ## Server list refresh
//! With an address server configured, [`endpoint::EndpointRefresher`]
//! periodically swaps the whole server list.
//!
//! # Usage
//! ```rust,ignore
//! let servers = vec![Server::new("10.0.0.1:8848", 100)?, Server::new("10.0.0.2:8848", 100)?];
//! let lb = WeightRoundRobin::new(servers);
//! lb.start_health_check(HealthChecker::new(transport, HEALTH_PATH));
//! let server = lb.select_one().ok_or(NacosError::NoServerAvailable)?;
//! ```
pub mod endpoint;
mod direct;
mod health;
mod weight_round;

use crate::error::{NacosError, Result};
pub use direct::DirectProxy;
pub use health::{HealthChecker, HealthTracker};
use serde::Deserialize;
pub use weight_round::WeightRoundRobin;

/// Liveness path probed on every registry front-end.
pub const HEALTH_PATH: &str = "nacos/v1/console/health/liveness";
/// Weight given to servers whose weight is not configured.
pub const DEFAULT_WEIGHT: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Passing,
    Critical,
}

/// One HTTP endpoint of the registry cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Server {
    /// Normalized base url, always `http(s)://host:port/`
    base_url: String,
    pub weight: u32,
    pub state: HealthState,
}

impl Server {
    /// Accepts `host:port` or a full url. Weight 0 is raised to 1.
    pub fn new(address: &str, weight: u32) -> Result<Self> {
        let address = address.trim();
        if address.is_empty() {
            return Err(NacosError::Config("empty registry address".to_string()));
        }
        let with_scheme = if address.starts_with("http://") || address.starts_with("https://") {
            address.to_string()
        } else {
            format!("http://{}", address)
        };
        let url = url::Url::parse(&with_scheme)
            .map_err(|e| NacosError::Config(format!("invalid server address {}: {}", address, e)))?;
        if url.host_str().is_none() {
            return Err(NacosError::Config(format!(
                "invalid server address {}: missing host",
                address
            )));
        }
        let mut base_url = url.to_string();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Ok(Self {
            base_url,
            weight: weight.max(1),
            state: HealthState::Passing,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `base_url` joined with a relative api path.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path.trim_start_matches('/'))
    }

    pub fn is_passing(&self) -> bool {
        self.state == HealthState::Passing
    }
}

/// Builds servers for a list of addresses with a shared weight.
pub fn servers_from(addresses: &[String], weight: u32) -> Result<Vec<Server>> {
    if addresses.is_empty() {
        return Err(NacosError::Config(
            "registry server list is empty, at least one address is required".to_string(),
        ));
    }
    addresses.iter().map(|a| Server::new(a, weight)).collect()
}

pub trait LoadBalancer: Send + Sync {
    /// One live server, or `None` when nothing is routable. Callers treat
    /// `None` as "unavailable" and must not spin on it.
    fn select_one(&self) -> Option<Server>;

    /// Snapshot of every known server, healthy or not.
    fn servers(&self) -> Vec<Server>;

    /// Atomically replaces the server list.
    fn refresh_servers(&self, servers: Vec<Server>);
}

/// Full url of `path` on a selected server.
pub fn select_url(lb: &dyn LoadBalancer, path: &str) -> Result<String> {
    lb.select_one()
        .map(|server| server.url(path))
        .ok_or(NacosError::NoServerAvailable)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadBalanceStrategy {
    /// Single server, no health checking
    Direct,
    /// Weighted round robin with active health checks
    #[default]
    RoundRobin,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_address_normalization() {
        let s = Server::new("127.0.0.1:8848", 100).unwrap();
        assert_eq!(s.base_url(), "http://127.0.0.1:8848/");
        assert_eq!(
            s.url("/nacos/v1/ns/instance"),
            "http://127.0.0.1:8848/nacos/v1/ns/instance"
        );
        let s = Server::new("https://nacos.example.com", 0).unwrap();
        assert_eq!(s.base_url(), "https://nacos.example.com/");
        assert_eq!(s.weight, 1);
        assert!(s.is_passing());
    }

    #[test]
    fn test_select_url() {
        let lb = DirectProxy::new(vec![Server::new("10.0.0.1:8848", 1).unwrap()]);
        assert_eq!(
            select_url(&lb, "nacos/v1/ns/instance").unwrap(),
            "http://10.0.0.1:8848/nacos/v1/ns/instance"
        );
        let empty = DirectProxy::new(vec![]);
        assert!(matches!(
            select_url(&empty, "x"),
            Err(NacosError::NoServerAvailable)
        ));
    }

    #[test]
    fn test_invalid_addresses() {
        assert!(matches!(Server::new("  ", 1), Err(NacosError::Config(_))));
        assert!(matches!(servers_from(&[], 1), Err(NacosError::Config(_))));
        assert!(matches!(
            Server::new("http://", 1),
            Err(NacosError::Config(_))
        ));
    }
}
