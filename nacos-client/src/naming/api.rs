//! Naming REST surface under `/nacos/v1/ns`.

use crate::error::{NacosError, Result};
use crate::lb::{self, LoadBalancer};
use crate::network::{HttpRequest, HttpResponse, HttpTransport};
use crate::protocol::{
    BeatResult, CatalogQuery, CatalogService, ClusterRequest, HeartbeatRequest, InstanceDetail,
    InstanceHealthRequest, InstanceListQuery, RegistryLeader, RegistryMetrics, RegistryServers,
    RegistrySwitches, ServiceDetail, ServiceInstance, ServiceInstanceListResult, ServiceList,
    ServiceListQuery, ServiceRequest, SwitchUpdate,
};
use std::sync::Arc;
use std::time::Duration;

const INSTANCE_PATH: &str = "nacos/v1/ns/instance";
const INSTANCE_LIST_PATH: &str = "nacos/v1/ns/instance/list";
const INSTANCE_BEAT_PATH: &str = "nacos/v1/ns/instance/beat";
const INSTANCE_HEALTH_PATH: &str = "nacos/v1/ns/health/instance";
const SERVICE_PATH: &str = "nacos/v1/ns/service";
const SERVICE_LIST_PATH: &str = "nacos/v1/ns/service/list";
const SERVERS_PATH: &str = "nacos/v1/ns/operator/servers";
const LEADER_PATH: &str = "nacos/v1/ns/raft/leader";
const METRICS_PATH: &str = "nacos/v1/ns/operator/metrics";
const SWITCHES_PATH: &str = "nacos/v1/ns/operator/switches";
const CATALOG_SERVICES_PATH: &str = "nacos/v1/ns/catalog/services";
const CLUSTER_PATH: &str = "nacos/v1/ns/cluster";

/// Requires the body of a successful mutation to be `ok`.
pub(crate) fn expect_ok(response: HttpResponse) -> Result<()> {
    let text = response.text();
    if text.trim() == "ok" {
        Ok(())
    } else {
        Err(NacosError::Rejected(text))
    }
}

#[derive(Clone)]
pub struct NamingHttpClient {
    lb: Arc<dyn LoadBalancer>,
    transport: Arc<dyn HttpTransport>,
    timeout: Duration,
}

impl NamingHttpClient {
    pub fn new(
        lb: Arc<dyn LoadBalancer>,
        transport: Arc<dyn HttpTransport>,
        timeout: Duration,
    ) -> Self {
        Self {
            lb,
            transport,
            timeout,
        }
    }

    async fn send(
        &self,
        request: impl FnOnce(String) -> HttpRequest,
        path: &str,
    ) -> Result<HttpResponse> {
        let url = lb::select_url(self.lb.as_ref(), path)?;
        let request = request(url).timeout(self.timeout);
        self.transport.execute(request).await?.error_for_status()
    }

    pub async fn register_instance(&self, instance: &ServiceInstance) -> Result<()> {
        log::info!(
            "register instance {}:{} of {}@{}",
            instance.ip,
            instance.port,
            instance.service_name,
            instance.group_name
        );
        let query = instance.to_query();
        expect_ok(self.send(|url| HttpRequest::post(url).query(query), INSTANCE_PATH).await?)
    }

    pub async fn deregister_instance(&self, instance: &ServiceInstance) -> Result<()> {
        log::info!(
            "deregister instance {}:{} of {}@{}",
            instance.ip,
            instance.port,
            instance.service_name,
            instance.group_name
        );
        let query = instance.to_query();
        expect_ok(self.send(|url| HttpRequest::delete(url).query(query), INSTANCE_PATH).await?)
    }

    pub async fn update_instance(&self, instance: &ServiceInstance) -> Result<()> {
        let query = instance.to_query();
        expect_ok(self.send(|url| HttpRequest::put(url).query(query), INSTANCE_PATH).await?)
    }

    pub async fn get_instance(&self, instance: &ServiceInstance) -> Result<InstanceDetail> {
        let query = instance.to_detail_query();
        self.send(|url| HttpRequest::get(url).query(query), INSTANCE_PATH)
            .await?
            .json()
    }

    pub async fn update_instance_health(&self, request: &InstanceHealthRequest) -> Result<()> {
        let query = request.to_query();
        expect_ok(
            self.send(|url| HttpRequest::put(url).query(query), INSTANCE_HEALTH_PATH)
                .await?,
        )
    }

    pub async fn list_instances(
        &self,
        query: &InstanceListQuery,
    ) -> Result<ServiceInstanceListResult> {
        let query = query.to_query();
        self.send(|url| HttpRequest::get(url).query(query), INSTANCE_LIST_PATH)
            .await?
            .json()
    }

    pub async fn beat(&self, request: &HeartbeatRequest) -> Result<BeatResult> {
        let query = request.to_query()?;
        self.send(|url| HttpRequest::put(url).query(query), INSTANCE_BEAT_PATH)
            .await?
            .json()
    }

    pub async fn create_service(&self, service: &ServiceRequest) -> Result<()> {
        let query = service.to_query();
        expect_ok(self.send(|url| HttpRequest::post(url).query(query), SERVICE_PATH).await?)
    }

    pub async fn delete_service(&self, service: &ServiceRequest) -> Result<()> {
        let query = service.to_query();
        expect_ok(self.send(|url| HttpRequest::delete(url).query(query), SERVICE_PATH).await?)
    }

    pub async fn update_service(&self, service: &ServiceRequest) -> Result<()> {
        let query = service.to_query();
        expect_ok(self.send(|url| HttpRequest::put(url).query(query), SERVICE_PATH).await?)
    }

    pub async fn get_service(&self, service: &ServiceRequest) -> Result<ServiceDetail> {
        let query = service.to_query();
        self.send(|url| HttpRequest::get(url).query(query), SERVICE_PATH)
            .await?
            .json()
    }

    pub async fn list_services(&self, query: &ServiceListQuery) -> Result<ServiceList> {
        let query = query.to_query();
        self.send(|url| HttpRequest::get(url).query(query), SERVICE_LIST_PATH)
            .await?
            .json()
    }

    /// Every service of a namespace, with instances when asked for.
    pub async fn catalog_services(&self, query: &CatalogQuery) -> Result<Vec<CatalogService>> {
        let query = query.to_query();
        self.send(|url| HttpRequest::get(url).query(query), CATALOG_SERVICES_PATH)
            .await?
            .json()
    }

    pub async fn update_cluster(&self, cluster: &ClusterRequest) -> Result<()> {
        log::info!(
            "update cluster {} of {}@{}",
            cluster.cluster_name,
            cluster.service_name,
            cluster.group_name
        );
        let query = cluster.to_query()?;
        expect_ok(self.send(|url| HttpRequest::put(url).query(query), CLUSTER_PATH).await?)
    }

    pub async fn switches(&self) -> Result<RegistrySwitches> {
        self.send(|url| HttpRequest::get(url), SWITCHES_PATH).await?.json()
    }

    pub async fn update_switch(&self, update: &SwitchUpdate) -> Result<()> {
        log::info!("update switch {}={}", update.entry, update.value);
        let query = update.to_query();
        expect_ok(self.send(|url| HttpRequest::put(url).query(query), SWITCHES_PATH).await?)
    }

    pub async fn servers(&self) -> Result<RegistryServers> {
        self.send(|url| HttpRequest::get(url), SERVERS_PATH).await?.json()
    }

    pub async fn leader(&self) -> Result<RegistryLeader> {
        self.send(|url| HttpRequest::get(url), LEADER_PATH).await?.json()
    }

    pub async fn metrics(&self) -> Result<RegistryMetrics> {
        self.send(|url| HttpRequest::get(url), METRICS_PATH).await?.json()
    }
}
