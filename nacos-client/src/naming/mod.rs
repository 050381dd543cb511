//! # Naming
//!
//! Service registration and discovery against the registry.
//!
//! - [`NamingService`]: REST operations plus cached, self-refreshing
//!   [`ServerList`]s per service query.
//! - [`DiscoveryClient`]: registers the current process and keeps it alive
//!   with a [`HeartbeatKeeper`].
//! - [`PushReceiver`]: the UDP socket the registry pushes instance changes
//!   to, shared by every [`ServerList`] of a client.
//!
//! # Usage
//! ```rust,ignore
//! let naming = client.naming_service();
//! let list = naming
//!     .get_instances("order-service", &QueryOptions::default().group("prod").watch(true))
//!     .await?;
//! if let Some(instance) = list.select_one() {
//!     println!("calling {}:{}", instance.ip, instance.port);
//! }
//! ```
pub mod api;
mod beat;
mod discovery;
pub mod push;
mod server_list;

use crate::error::Result;
use crate::protocol::{
    CatalogQuery, CatalogService, ClusterRequest, DEFAULT_GROUP, InstanceDetail,
    InstanceHealthRequest, InstanceListQuery, RegistryLeader, RegistryMetrics, RegistryServers,
    RegistrySwitches, ServiceDetail, ServiceInstance, ServiceList, ServiceListQuery,
    ServiceRequest, SwitchUpdate,
};
use api::NamingHttpClient;
pub use beat::{DEFAULT_BEAT_INTERVAL, HeartbeatKeeper};
use dashmap::DashMap;
pub use discovery::DiscoveryClient;
pub use push::{PushMessage, PushReceiver};
pub use server_list::ServerList;
use std::sync::Arc;

/// Scope and behavior of an instance query.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Namespace id, the service's default namespace when empty
    pub namespace: String,
    /// Group, `DEFAULT_GROUP` when empty
    pub group: String,
    /// Comma separated cluster names
    pub cluster: String,
    /// Only list healthy instances
    pub healthy: bool,
    /// Subscribe to push notifications
    pub watch: bool,
}

impl QueryOptions {
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn cluster(mut self, cluster: impl Into<String>) -> Self {
        self.cluster = cluster.into();
        self
    }

    pub fn healthy(mut self, healthy: bool) -> Self {
        self.healthy = healthy;
        self
    }

    pub fn watch(mut self, watch: bool) -> Self {
        self.watch = watch;
        self
    }
}

pub struct NamingService {
    api: NamingHttpClient,
    push: Arc<PushReceiver>,
    namespace: String,
    lists: DashMap<String, Arc<ServerList>>,
}

impl NamingService {
    pub fn new(
        api: NamingHttpClient,
        push: Arc<PushReceiver>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            api,
            push,
            namespace: namespace.into(),
            lists: DashMap::new(),
        }
    }

    pub fn api(&self) -> &NamingHttpClient {
        &self.api
    }

    /// UDP port announced to the registry for pushes, once bound.
    pub fn push_port(&self) -> Option<u16> {
        self.push.port()
    }

    fn namespace_or_default(&self, namespace: &str) -> String {
        if namespace.is_empty() {
            self.namespace.clone()
        } else {
            namespace.to_string()
        }
    }

    /// `instance` with the service namespace and default group filled in.
    pub(crate) fn scoped(&self, instance: &ServiceInstance) -> ServiceInstance {
        let mut instance = instance.clone();
        if instance.namespace_id.is_empty() {
            instance.namespace_id = self.namespace.clone();
        }
        if instance.group_name.is_empty() {
            instance.group_name = DEFAULT_GROUP.to_string();
        }
        instance
    }

    pub async fn register_instance(&self, instance: &ServiceInstance) -> Result<()> {
        self.api.register_instance(&self.scoped(instance)).await
    }

    pub async fn deregister_instance(&self, instance: &ServiceInstance) -> Result<()> {
        self.api.deregister_instance(&self.scoped(instance)).await
    }

    pub async fn update_instance(&self, instance: &ServiceInstance) -> Result<()> {
        self.api.update_instance(&self.scoped(instance)).await
    }

    /// Registry side view of a registered instance.
    pub async fn get_instance(&self, instance: &ServiceInstance) -> Result<InstanceDetail> {
        self.api.get_instance(&self.scoped(instance)).await
    }

    /// Overrides the health flag of a registered instance.
    pub async fn set_instance_healthy(
        &self,
        instance: &ServiceInstance,
        healthy: bool,
    ) -> Result<()> {
        let request = InstanceHealthRequest::new(&self.scoped(instance), healthy);
        self.api.update_instance_health(&request).await
    }

    /// Cached [`ServerList`] for the query, created and seeded on first use.
    ///
    /// Lists are shared between callers with the same query; stopping one
    /// makes the next call create a fresh list.
    pub async fn get_instances(
        &self,
        service_name: &str,
        options: &QueryOptions,
    ) -> Result<Arc<ServerList>> {
        let query = InstanceListQuery {
            service_name: service_name.to_string(),
            group_name: if options.group.is_empty() {
                DEFAULT_GROUP.to_string()
            } else {
                options.group.clone()
            },
            namespace_id: if options.namespace.is_empty() {
                self.namespace.clone()
            } else {
                options.namespace.clone()
            },
            clusters: options.cluster.clone(),
            healthy_only: options.healthy,
            udp_port: None,
            client_ip: None,
        };
        let cache_key = format!(
            "{}##{}##{}##{}##{}##{}",
            query.namespace_id,
            query.group_name,
            query.service_name,
            query.clusters,
            options.healthy,
            options.watch
        );
        if let Some(list) = self.lists.get(&cache_key)
            && !list.is_stopped()
        {
            return Ok(list.clone());
        }
        let push = options.watch.then(|| self.push.clone());
        let list = ServerList::listen(self.api.clone(), query, push).await?;
        self.lists.insert(cache_key, list.clone());
        Ok(list)
    }

    pub async fn list_services(
        &self,
        namespace: &str,
        group: &str,
        page_no: u32,
        page_size: u32,
    ) -> Result<ServiceList> {
        let query = ServiceListQuery {
            page_no,
            page_size,
            group_name: group.to_string(),
            namespace_id: self.namespace_or_default(namespace),
        };
        self.api.list_services(&query).await
    }

    /// Number of services in a namespace.
    pub async fn services_count(&self, namespace: &str) -> Result<usize> {
        Ok(self.list_services(namespace, "", 1, 1).await?.count)
    }

    /// Every service of a namespace together with its instances.
    pub async fn all_services(&self, namespace: &str) -> Result<Vec<CatalogService>> {
        let query = CatalogQuery {
            namespace_id: self.namespace_or_default(namespace),
            with_instances: true,
        };
        self.api.catalog_services(&query).await
    }

    /// Updates the health check and metadata settings of a cluster.
    pub async fn update_cluster(&self, cluster: &ClusterRequest) -> Result<()> {
        let mut cluster = cluster.clone();
        cluster.namespace_id = self.namespace_or_default(&cluster.namespace_id);
        if cluster.group_name.is_empty() {
            cluster.group_name = DEFAULT_GROUP.to_string();
        }
        self.api.update_cluster(&cluster).await
    }

    pub async fn switches(&self) -> Result<RegistrySwitches> {
        self.api.switches().await
    }

    pub async fn update_switch(&self, entry: &str, value: &str) -> Result<()> {
        self.api.update_switch(&SwitchUpdate::new(entry, value)).await
    }

    pub async fn create_service(&self, service: &ServiceRequest) -> Result<()> {
        self.api.create_service(service).await
    }

    pub async fn update_service(&self, service: &ServiceRequest) -> Result<()> {
        self.api.update_service(service).await
    }

    pub async fn delete_service(&self, service: &ServiceRequest) -> Result<()> {
        self.api.delete_service(service).await
    }

    pub async fn get_service(&self, service: &ServiceRequest) -> Result<ServiceDetail> {
        self.api.get_service(service).await
    }

    pub async fn servers(&self) -> Result<RegistryServers> {
        self.api.servers().await
    }

    pub async fn leader(&self) -> Result<RegistryLeader> {
        self.api.leader().await
    }

    pub async fn metrics(&self) -> Result<RegistryMetrics> {
        self.api.metrics().await
    }

    /// Stops every [`ServerList`] created here and the push receiver.
    pub fn stop(&self) {
        for list in self.lists.iter() {
            list.stop_listen();
        }
        self.lists.clear();
        self.push.stop();
        log::info!("naming service stopped");
    }
}
