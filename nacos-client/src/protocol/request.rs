//! Request parameter sets with explicit query/form serialization.

use crate::error::Result;
use crate::protocol::{BeatInfo, HealthChecker, ServiceInstance, grouped_service_name};
use crate::utils;
use std::collections::BTreeMap;

type Params = Vec<(String, String)>;

fn push(params: &mut Params, name: &str, value: impl ToString) {
    params.push((name.to_string(), value.to_string()));
}

fn push_non_empty(params: &mut Params, name: &str, value: &str) {
    if !value.is_empty() {
        push(params, name, value);
    }
}

/// The public namespace is addressed with an empty tenant/namespace id.
pub fn normalize_namespace(namespace: &str) -> &str {
    if namespace.eq_ignore_ascii_case(super::DEFAULT_NAMESPACE) {
        ""
    } else {
        namespace
    }
}

impl ServiceInstance {
    /// Parameters of register, deregister and update calls.
    pub fn to_query(&self) -> Params {
        let mut params = vec![];
        push(&mut params, "ip", &self.ip);
        push(&mut params, "port", self.port);
        push_non_empty(&mut params, "namespaceId", normalize_namespace(&self.namespace_id));
        push(&mut params, "weight", self.weight);
        push(&mut params, "enabled", self.enabled);
        push(&mut params, "healthy", self.healthy);
        if !self.metadata.is_empty() {
            push(&mut params, "metadata", utils::metadata_to_string(&self.metadata));
        }
        push_non_empty(&mut params, "clusterName", &self.cluster_name);
        push(&mut params, "serviceName", &self.service_name);
        push_non_empty(&mut params, "groupName", &self.group_name);
        push(&mut params, "ephemeral", self.ephemeral);
        params
    }

    /// Parameters identifying the instance in a detail lookup.
    pub fn to_detail_query(&self) -> Params {
        let mut params = vec![];
        push(&mut params, "serviceName", &self.service_name);
        push_non_empty(&mut params, "groupName", &self.group_name);
        push_non_empty(&mut params, "namespaceId", normalize_namespace(&self.namespace_id));
        push_non_empty(&mut params, "cluster", &self.cluster_name);
        push(&mut params, "ip", &self.ip);
        push(&mut params, "port", self.port);
        push(&mut params, "ephemeral", self.ephemeral);
        params
    }
}

/// Query of the instance list endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceListQuery {
    pub service_name: String,
    pub group_name: String,
    pub namespace_id: String,
    pub clusters: String,
    pub healthy_only: bool,
    /// Subscription data, set when push notifications are wanted
    pub udp_port: Option<u16>,
    pub client_ip: Option<String>,
}

impl InstanceListQuery {
    pub fn to_query(&self) -> Params {
        let mut params = vec![];
        push(
            &mut params,
            "serviceName",
            grouped_service_name(&self.group_name, &self.service_name),
        );
        push_non_empty(&mut params, "namespaceId", normalize_namespace(&self.namespace_id));
        push_non_empty(&mut params, "clusters", &self.clusters);
        push(&mut params, "healthyOnly", self.healthy_only);
        if let Some(port) = self.udp_port {
            push(&mut params, "udpPort", port);
        }
        if let Some(ip) = &self.client_ip {
            push(&mut params, "clientIP", ip);
        }
        params
    }
}

#[derive(Debug, Clone, Default)]
pub struct HeartbeatRequest {
    pub service_name: String,
    pub group_name: String,
    pub namespace_id: String,
    pub beat: BeatInfo,
}

impl HeartbeatRequest {
    pub fn new(instance: &ServiceInstance) -> Self {
        Self {
            service_name: grouped_service_name(&instance.group_name, &instance.service_name),
            group_name: instance.group_name.clone(),
            namespace_id: instance.namespace_id.clone(),
            beat: BeatInfo::from(instance),
        }
    }

    pub fn to_query(&self) -> Result<Params> {
        let mut params = vec![];
        push(&mut params, "serviceName", &self.service_name);
        push_non_empty(&mut params, "groupName", &self.group_name);
        push_non_empty(&mut params, "namespaceId", normalize_namespace(&self.namespace_id));
        push(&mut params, "beat", serde_json::to_string(&self.beat)?);
        Ok(params)
    }
}

/// Parameters of service create, update, delete and get calls.
#[derive(Debug, Clone, Default)]
pub struct ServiceRequest {
    pub service_name: String,
    pub group_name: String,
    pub namespace_id: String,
    pub protect_threshold: f64,
    pub metadata: BTreeMap<String, String>,
    /// JSON encoded selector, e.g. `{"type":"none"}`
    pub selector: Option<String>,
}

impl ServiceRequest {
    pub fn new(service_name: impl Into<String>, group_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            group_name: group_name.into(),
            ..Default::default()
        }
    }

    pub fn to_query(&self) -> Params {
        let mut params = vec![];
        push(&mut params, "serviceName", &self.service_name);
        push_non_empty(&mut params, "groupName", &self.group_name);
        push_non_empty(&mut params, "namespaceId", normalize_namespace(&self.namespace_id));
        push(&mut params, "protectThreshold", self.protect_threshold);
        if !self.metadata.is_empty() {
            push(&mut params, "metadata", utils::metadata_to_string(&self.metadata));
        }
        if let Some(selector) = &self.selector {
            push(&mut params, "selector", selector);
        }
        params
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceListQuery {
    pub page_no: u32,
    pub page_size: u32,
    pub group_name: String,
    pub namespace_id: String,
}

impl Default for ServiceListQuery {
    fn default() -> Self {
        Self {
            page_no: 1,
            page_size: 10,
            group_name: String::new(),
            namespace_id: String::new(),
        }
    }
}

impl ServiceListQuery {
    pub fn to_query(&self) -> Params {
        let mut params = vec![];
        push(&mut params, "pageNo", self.page_no.max(1));
        push(&mut params, "pageSize", self.page_size.max(1));
        push_non_empty(&mut params, "groupName", &self.group_name);
        push_non_empty(&mut params, "namespaceId", normalize_namespace(&self.namespace_id));
        params
    }
}

/// Manual health override of one instance.
#[derive(Debug, Clone, Default)]
pub struct InstanceHealthRequest {
    pub ip: String,
    pub port: u16,
    pub namespace_id: String,
    pub service_name: String,
    pub group_name: String,
    pub cluster_name: String,
    pub healthy: bool,
}

impl InstanceHealthRequest {
    pub fn new(instance: &ServiceInstance, healthy: bool) -> Self {
        Self {
            ip: instance.ip.clone(),
            port: instance.port,
            namespace_id: instance.namespace_id.clone(),
            service_name: instance.service_name.clone(),
            group_name: instance.group_name.clone(),
            cluster_name: instance.cluster_name.clone(),
            healthy,
        }
    }

    pub fn to_query(&self) -> Params {
        let mut params = vec![];
        push(&mut params, "ip", &self.ip);
        push(&mut params, "port", self.port);
        push_non_empty(&mut params, "namespaceId", normalize_namespace(&self.namespace_id));
        push(&mut params, "serviceName", &self.service_name);
        push_non_empty(&mut params, "groupName", &self.group_name);
        push_non_empty(&mut params, "clusterName", &self.cluster_name);
        push(&mut params, "healthy", self.healthy);
        params
    }
}

/// Update of one registry switch.
#[derive(Debug, Clone, Default)]
pub struct SwitchUpdate {
    pub entry: String,
    pub value: String,
    /// Apply on the receiving server only
    pub debug: bool,
}

impl SwitchUpdate {
    pub fn new(entry: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            entry: entry.into(),
            value: value.into(),
            debug: false,
        }
    }

    pub fn to_query(&self) -> Params {
        let mut params = vec![];
        push(&mut params, "entry", &self.entry);
        push(&mut params, "value", &self.value);
        if self.debug {
            push(&mut params, "debug", true);
        }
        params
    }
}

/// Query of the catalog endpoint listing every service of a namespace.
#[derive(Debug, Clone, Default)]
pub struct CatalogQuery {
    pub namespace_id: String,
    pub with_instances: bool,
}

impl CatalogQuery {
    pub fn to_query(&self) -> Params {
        let mut params = vec![];
        push_non_empty(&mut params, "namespaceId", normalize_namespace(&self.namespace_id));
        push(&mut params, "withInstances", self.with_instances);
        params
    }
}

/// Settings of one cluster of a service.
#[derive(Debug, Clone, Default)]
pub struct ClusterRequest {
    pub namespace_id: String,
    pub service_name: String,
    pub group_name: String,
    pub cluster_name: String,
    pub metadata: BTreeMap<String, String>,
    pub check_port: u16,
    pub use_instance_port_for_check: bool,
    pub health_checker: HealthChecker,
}

impl ClusterRequest {
    pub fn new(
        service_name: impl Into<String>,
        group_name: impl Into<String>,
        cluster_name: impl Into<String>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            group_name: group_name.into(),
            cluster_name: cluster_name.into(),
            ..Default::default()
        }
    }

    /// `metadata` and `healthChecker` travel JSON encoded.
    pub fn to_query(&self) -> Result<Params> {
        let mut params = vec![];
        push_non_empty(&mut params, "namespaceId", normalize_namespace(&self.namespace_id));
        push(&mut params, "serviceName", &self.service_name);
        push_non_empty(&mut params, "groupName", &self.group_name);
        push(&mut params, "clusterName", &self.cluster_name);
        if !self.metadata.is_empty() {
            push(&mut params, "metadata", serde_json::to_string(&self.metadata)?);
        }
        push(&mut params, "checkPort", self.check_port);
        push(
            &mut params,
            "useInstancePort4Check",
            self.use_instance_port_for_check,
        );
        push(
            &mut params,
            "healthChecker",
            serde_json::to_string(&self.health_checker)?,
        );
        Ok(params)
    }
}

/// Identifies one config file. `tenant` is normalized on serialization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigQuery {
    pub tenant: String,
    pub data_id: String,
    pub group: String,
}

impl ConfigQuery {
    pub fn new(
        tenant: impl Into<String>,
        group: impl Into<String>,
        data_id: impl Into<String>,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            data_id: data_id.into(),
            group: group.into(),
        }
    }

    pub fn to_query(&self) -> Params {
        let mut params = vec![];
        push_non_empty(&mut params, "tenant", normalize_namespace(&self.tenant));
        push(&mut params, "dataId", &self.data_id);
        push(&mut params, "group", &self.group);
        params
    }

    /// Form body of a publish call.
    pub fn to_publish_form(&self, content: &str) -> Params {
        let mut params = self.to_query();
        push(&mut params, "content", content);
        params
    }
}
