//! # Nacos Client
//!
//! Client side synchronization engine for a Nacos compatible naming and
//! configuration registry. A [`NacosClient`] keeps, for one application
//! process:
//!
//! - a continuously refreshed list of the live instances behind every service
//!   it queries, fed by polling and by UDP push invalidation;
//! - local mirrors of remote configuration files, refreshed by long polling and
//!   dispatching key level changes to listeners;
//! - the registration of the process itself, kept alive by heartbeats.
//!
//! Registry front-ends are picked by a weighted round robin balancer that
//! probes every server and skips the unhealthy ones.
//!
//! # Quick Start
//!
//! Add a `bootstrap.yaml` configuration file in your project's root directory:
//!
//! ```yaml
//! nacos:
//!   server:
//!     server-addr:
//!       - 127.0.0.1:8848
//!       - 127.0.0.1:8849
//!   config:
//!     snapshot-dir: ./nacos-snapshot
//!     config-ids:
//!       - app.yaml
//!   discovery:
//!     service-name: order-service
//!     port: 8080
//! ```
//!
//! Then create the client inside a Tokio runtime:
//!
//! ```rust,ignore
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = NacosClient::from_default_file()?;
//!
//!     // Configuration
//!     let files = client.load_configs().await?;
//!     println!("{:?}", files[0].get("server.port"));
//!
//!     // Registration
//!     let discovery = client.discovery_client()?;
//!     discovery.register().await?;
//!
//!     // Discovery
//!     let list = client
//!         .naming_service()
//!         .get_instances("user-service", &QueryOptions::default().watch(true))
//!         .await?;
//!     println!("{:?}", list.select_one());
//!     Ok(())
//! }
//! ```
//!
//! ## Namespace
//!
//! Namespaces isolate configurations and services. The default namespace is
//! `public`, sent to the registry as the empty namespace.
//!
//! ## Listen for Configuration Changes
//!
//! ```rust,ignore
//! let file = client.config_service()?.properties("DEFAULT_GROUP", "app.properties").await?;
//! file.listen_key("db.url", |_: &FileDesc, change: &Change| {
//!     println!("db.url changed: {:?}", change);
//! });
//! ```

use crate::conf::NacosConfig;
use crate::config::api::ConfigHttpClient;
use crate::config::{ConfigService, LocalLoader, MapFile};
use crate::lb::endpoint::EndpointRefresher;
use crate::lb::{
    DirectProxy, HealthChecker, LoadBalanceStrategy, LoadBalancer, WeightRoundRobin,
    servers_from,
};
use crate::naming::api::NamingHttpClient;
use crate::naming::{DiscoveryClient, NamingService, PushReceiver};
use crate::network::{HttpTransport, ReqwestTransport};
use crate::pool::TaskPool;
use anyhow::Context;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tokio::sync::watch;

pub mod conf;
pub mod config;
pub mod error;
pub mod lb;
pub mod naming;
pub mod network;
pub mod pool;
pub mod protocol;
#[cfg(test)]
mod testing;
mod utils;

pub use crate::config::{Change, EventType, FileDesc};
pub use error::{NacosError, Result};
pub use naming::QueryOptions;
pub use protocol::ServiceInstance;
#[cfg(feature = "tracing")]
pub use utils::init_log;

/// Owns everything shared by the naming and config sides of one process:
/// the HTTP transport, the balanced registry server list, the task pool and
/// the UDP push receiver.
pub struct NacosClient {
    config: NacosConfig,
    transport: Arc<dyn HttpTransport>,
    lb: Arc<dyn LoadBalancer>,
    round_robin: Option<Arc<WeightRoundRobin>>,
    pool: TaskPool,
    naming: OnceLock<Arc<NamingService>>,
    config_service: OnceLock<Arc<ConfigService>>,
    stop: watch::Sender<bool>,
}

impl NacosClient {
    /// Must be called within a Tokio runtime: health checks and the server
    /// list refresh start right away.
    pub fn new(config: NacosConfig) -> Result<Self> {
        let transport = ReqwestTransport::new(config.server.connect_timeout())?;
        Self::with_transport(config, Arc::new(transport))
    }

    pub fn with_transport(config: NacosConfig, transport: Arc<dyn HttpTransport>) -> Result<Self> {
        let servers = servers_from(&config.server.addresses()?, config.server.weight)?;
        let (stop, _) = watch::channel(false);

        let (lb, round_robin): (Arc<dyn LoadBalancer>, _) = match config.server.lb_strategy {
            LoadBalanceStrategy::Direct => {
                (Arc::new(DirectProxy::new(servers)) as Arc<dyn LoadBalancer>, None)
            }
            LoadBalanceStrategy::RoundRobin => {
                let round_robin = WeightRoundRobin::new(servers);
                round_robin.start_health_check(
                    HealthChecker::new(transport.clone(), &config.server.health_path)
                        .with_interval(config.server.health_check_interval())
                        .with_timeout(config.server.health_check_timeout()),
                );
                (round_robin.clone() as Arc<dyn LoadBalancer>, Some(round_robin))
            }
        };

        if let Some(endpoint) = &config.server.endpoint {
            let refresher =
                EndpointRefresher::new(endpoint, config.server.weight, transport.clone(), lb.clone());
            tokio::spawn(refresher.run(stop.subscribe()));
        }

        log::info!(
            "nacos client created with {} server(s), strategy {:?}",
            lb.servers().len(),
            config.server.lb_strategy
        );
        Ok(Self {
            config,
            transport,
            lb,
            round_robin,
            pool: TaskPool::default(),
            naming: OnceLock::new(),
            config_service: OnceLock::new(),
            stop,
        })
    }

    /// Client configured from a bootstrap file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let config = NacosConfig::from_file(path)?;
        Self::new(config).context("create nacos client failed")
    }

    /// Client configured from `bootstrap.yaml` or `bootstrap.yml`.
    pub fn from_default_file() -> anyhow::Result<Self> {
        let config = NacosConfig::from_default_file()?;
        Self::new(config).context("create nacos client failed")
    }

    pub fn config(&self) -> &NacosConfig {
        &self.config
    }

    pub fn load_balancer(&self) -> &Arc<dyn LoadBalancer> {
        &self.lb
    }

    /// The naming service, created with its push receiver on first use.
    pub fn naming_service(&self) -> Arc<NamingService> {
        self.naming
            .get_or_init(|| {
                let api = NamingHttpClient::new(
                    self.lb.clone(),
                    self.transport.clone(),
                    self.config.server.request_timeout(),
                );
                let namespace = self
                    .config
                    .discovery
                    .as_ref()
                    .map(|d| d.namespace.clone())
                    .unwrap_or_default();
                Arc::new(NamingService::new(api, PushReceiver::start(), namespace))
            })
            .clone()
    }

    /// The config service. Requires the `config` section.
    pub fn config_service(&self) -> Result<Arc<ConfigService>> {
        if let Some(service) = self.config_service.get() {
            return Ok(service.clone());
        }
        let config = self
            .config
            .config
            .as_ref()
            .ok_or_else(|| NacosError::Config("config section is not set".to_string()))?;
        let api = ConfigHttpClient::new(
            self.lb.clone(),
            self.transport.clone(),
            self.config.server.request_timeout(),
        )
        .with_long_poll_timeout(self.config.server.long_poll_timeout());
        let service = Arc::new(ConfigService::new(
            api,
            &config.namespace,
            LocalLoader::new(&config.snapshot_dir)?,
            self.pool.clone(),
        ));
        Ok(self.config_service.get_or_init(|| service).clone())
    }

    /// Loads every file of `config.config-ids` and starts watching them.
    /// `.yaml`/`.yml` files are flattened, anything else is read as
    /// properties.
    pub async fn load_configs(&self) -> Result<Vec<Arc<MapFile>>> {
        let service = self.config_service()?;
        let group = self
            .config
            .config
            .as_ref()
            .map(|c| c.group.clone())
            .unwrap_or_default();
        let config_ids = self
            .config
            .config
            .as_ref()
            .map(|c| c.config_ids.clone())
            .unwrap_or_default();
        let mut files = Vec::with_capacity(config_ids.len());
        for id in &config_ids {
            let file = if id.ends_with(".yaml") || id.ends_with(".yml") {
                service.yaml(&group, id).await?
            } else {
                service.properties(&group, id).await?
            };
            log::info!("config {} loaded", id);
            files.push(file);
        }
        service.watch();
        Ok(files)
    }

    /// Registration handle for this process. Requires the `discovery`
    /// section.
    pub fn discovery_client(&self) -> Result<DiscoveryClient> {
        let discovery = self
            .config
            .discovery
            .as_ref()
            .ok_or_else(|| NacosError::Config("discovery section is not set".to_string()))?;
        Ok(DiscoveryClient::new(
            self.naming_service(),
            discovery.instance(),
        ))
    }

    /// Stops every background loop owned by this client.
    pub fn shutdown(&self) {
        if self.stop.send_replace(true) {
            return;
        }
        if let Some(round_robin) = &self.round_robin {
            round_robin.stop_health_check();
        }
        if let Some(naming) = self.naming.get() {
            naming.stop();
        }
        if let Some(config) = self.config_service.get() {
            config.stop_watch();
        }
        self.pool.close();
        log::info!("nacos client shut down");
    }
}

impl Drop for NacosClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conf::{
        ConfigConfigBuilder, DiscoveryConfigBuilder, NacosConfigBuilder, ServerConfigBuilder,
    };
    use crate::testing::{FakeTransport, status};
    use parking_lot::Mutex;
    use std::time::Duration;
    use tokio::net::UdpSocket;

    const INSTANCE_LIST: &str = r#"{"name":"G@@S","clusters":"","cacheMillis":60000,"lastRefTime":1,
        "hosts":[{"ip":"10.0.0.1","port":8080,"weight":1.0,"healthy":true,"enabled":true}]}"#;

    fn server(strategy: LoadBalanceStrategy) -> conf::ServerConfig {
        ServerConfigBuilder::default()
            .server_addr(vec!["10.0.0.9:8848"])
            .lb_strategy(strategy)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_register_discover_and_push() {
        let registered = Arc::new(Mutex::new(false));
        let flag = registered.clone();
        let transport = Arc::new(FakeTransport::new(move |req| {
            if req.url.ends_with("/nacos/v1/ns/instance") {
                *flag.lock() = true;
                status(200, "ok")
            } else if req.url.ends_with("/instance/list") {
                status(200, INSTANCE_LIST)
            } else if req.url.ends_with("/instance/beat") {
                status(200, r#"{"clientBeatInterval":5000}"#)
            } else {
                status(200, "")
            }
        }));
        let config = NacosConfigBuilder::default()
            .server(server(LoadBalanceStrategy::Direct))
            .discovery(
                DiscoveryConfigBuilder::default()
                    .service_name("S")
                    .group("G")
                    .ip("10.0.0.1")
                    .port(8080)
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap();
        let client = NacosClient::with_transport(config, transport.clone()).unwrap();

        let discovery = client.discovery_client().unwrap();
        discovery.register().await.unwrap();
        assert!(*registered.lock());

        let naming = client.naming_service();
        let list = naming
            .get_instances("S", &QueryOptions::default().group("G").watch(true))
            .await
            .unwrap();
        assert_eq!(list.get_all().len(), 1);
        assert_eq!(list.get_all()[0].ip, "10.0.0.1");
        assert_eq!(list.get_all()[0].port, 8080);

        let mut port = None;
        for _ in 0..200 {
            port = naming.push_port();
            if port.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let port = port.unwrap();
        let data = r#"{"name":"G@@S","clusters":"","lastRefTime":2,
            "hosts":[{"ip":"10.0.0.2","port":9090,"healthy":true,"enabled":true}]}"#;
        let packet = serde_json::json!({"type": "dom", "data": data, "lastRefTime": 2});
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket
            .send_to(packet.to_string().as_bytes(), ("127.0.0.1", port))
            .await
            .unwrap();

        for _ in 0..200 {
            if list.last_ref_time() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(list.last_ref_time(), 2);
        assert_eq!(list.get_all()[0].ip, "10.0.0.2");

        list.stop_listen();
        list.stop_listen();
        assert!(list.is_stopped());
        discovery.deregister().await.unwrap();
        client.shutdown();
        client.shutdown();
    }

    #[tokio::test]
    async fn test_config_service_requires_section() {
        let config = NacosConfigBuilder::default()
            .server(server(LoadBalanceStrategy::Direct))
            .build()
            .unwrap();
        let client =
            NacosClient::with_transport(config, Arc::new(FakeTransport::unreachable())).unwrap();
        assert!(matches!(client.config_service(), Err(NacosError::Config(_))));
        assert!(matches!(client.discovery_client(), Err(NacosError::Config(_))));
    }

    #[tokio::test]
    async fn test_load_configs_picks_converter() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(FakeTransport::new(|req| {
            if req.url.ends_with("/listener") {
                Err(NacosError::Transport("refused".into()))
            } else if req.param("dataId") == Some("app.yaml") {
                status(200, "server:\n  port: 8080\n")
            } else {
                status(200, "db.url=jdbc:x\n")
            }
        }));
        let config = NacosConfigBuilder::default()
            .server(server(LoadBalanceStrategy::RoundRobin))
            .config(
                ConfigConfigBuilder::default()
                    .snapshot_dir(dir.path())
                    .config_ids(vec!["app.yaml".to_string(), "db.properties".to_string()])
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap();
        let client = NacosClient::with_transport(config, transport).unwrap();
        let files = client.load_configs().await.unwrap();
        assert_eq!(files[0].get_int("server.port").unwrap(), 8080);
        assert_eq!(files[1].get("db.url").unwrap(), "jdbc:x");
        assert!(Arc::ptr_eq(
            &client.config_service().unwrap(),
            &client.config_service().unwrap()
        ));
        client.shutdown();
    }

    #[tokio::test]
    async fn test_empty_server_list_is_fatal() {
        let config = NacosConfigBuilder::default()
            .server(
                ServerConfigBuilder::default()
                    .server_addr(conf::ServerAddr::Unset)
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap();
        let result = NacosClient::with_transport(config, Arc::new(FakeTransport::unreachable()));
        assert!(matches!(result, Err(NacosError::Config(_))));
    }
}
