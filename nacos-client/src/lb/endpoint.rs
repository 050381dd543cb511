//! Address-server driven refresh of the registry server list.

use crate::error::Result;
use crate::lb::{LoadBalancer, Server};
use crate::network::{HttpRequest, HttpTransport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub const REFRESH_INTERVAL: Duration = Duration::from_secs(30);

pub struct EndpointRefresher {
    endpoint: String,
    weight: u32,
    interval: Duration,
    transport: Arc<dyn HttpTransport>,
    lb: Arc<dyn LoadBalancer>,
}

impl EndpointRefresher {
    pub fn new(
        endpoint: impl Into<String>,
        weight: u32,
        transport: Arc<dyn HttpTransport>,
        lb: Arc<dyn LoadBalancer>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            weight,
            interval: REFRESH_INTERVAL,
            transport,
            lb,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    fn url(&self) -> String {
        let endpoint = self.endpoint.trim_end_matches('/');
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            format!("{}/nacos/serverlist", endpoint)
        } else {
            format!("http://{}/nacos/serverlist", endpoint)
        }
    }

    /// Fetches the current server list from the address server.
    pub async fn fetch(&self) -> Result<Vec<Server>> {
        let response = self
            .transport
            .execute(HttpRequest::get(self.url()))
            .await?
            .error_for_status()?;
        parse_server_list(&response.text(), self.weight)
    }

    /// Fetches once and swaps the balancer's list when the result is usable.
    pub async fn refresh(&self) {
        match self.fetch().await {
            Ok(servers) if servers.is_empty() => {
                log::warn!("address server {} returned no servers", self.endpoint);
            }
            Ok(servers) => {
                log::debug!("refreshed {} registry servers from {}", servers.len(), self.endpoint);
                self.lb.refresh_servers(servers);
            }
            Err(e) => log::error!("refresh server list from {} failed: {}", self.endpoint, e),
        }
    }

    /// Refreshes every interval until `stop` flips to true.
    pub async fn run(self, mut stop: watch::Receiver<bool>) {
        loop {
            self.refresh().await;
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = stop.changed() => {}
            }
            if *stop.borrow() {
                return;
            }
        }
    }
}

/// One address per line, blank lines ignored.
fn parse_server_list(body: &str, weight: u32) -> Result<Vec<Server>> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| Server::new(line, weight))
        .collect()
}
