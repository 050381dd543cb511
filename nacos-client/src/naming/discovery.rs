use crate::error::Result;
use crate::naming::{HeartbeatKeeper, NamingService};
use crate::protocol::ServiceInstance;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;

/// Registers the current process as an instance of a service.
pub struct DiscoveryClient {
    naming: Arc<NamingService>,
    instance: ServiceInstance,
    heartbeat: Mutex<Option<watch::Sender<bool>>>,
}

impl DiscoveryClient {
    pub fn new(naming: Arc<NamingService>, instance: ServiceInstance) -> Self {
        Self {
            naming,
            instance,
            heartbeat: Mutex::new(None),
        }
    }

    pub fn instance(&self) -> &ServiceInstance {
        &self.instance
    }

    pub fn naming(&self) -> &Arc<NamingService> {
        &self.naming
    }

    /// Registers the instance. Ephemeral instances also get a heartbeat.
    pub async fn register(&self) -> Result<()> {
        let instance = self.naming.scoped(&self.instance);
        self.naming.api().register_instance(&instance).await?;
        if instance.ephemeral {
            let (stop, stop_rx) = watch::channel(false);
            let keeper = HeartbeatKeeper::new(self.naming.api().clone(), instance);
            tokio::spawn(keeper.run(stop_rx));
            if let Some(previous) = self.heartbeat.lock().replace(stop) {
                previous.send_replace(true);
            }
        }
        log::info!(
            "registered {}:{} as {}",
            self.instance.ip,
            self.instance.port,
            self.instance.service_name
        );
        Ok(())
    }

    pub async fn set_healthy(&self, healthy: bool) -> Result<()> {
        self.naming.set_instance_healthy(&self.instance, healthy).await
    }

    /// Stops the heartbeat, then deregisters the instance.
    pub async fn deregister(&self) -> Result<()> {
        self.stop_heartbeat();
        self.naming.deregister_instance(&self.instance).await
    }

    fn stop_heartbeat(&self) {
        if let Some(stop) = self.heartbeat.lock().take() {
            stop.send_replace(true);
        }
    }
}

impl Drop for DiscoveryClient {
    fn drop(&mut self) {
        self.stop_heartbeat();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lb::{DirectProxy, Server};
    use crate::naming::PushReceiver;
    use crate::naming::api::NamingHttpClient;
    use crate::testing::{FakeTransport, status};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn client(transport: Arc<FakeTransport>, ephemeral: bool) -> DiscoveryClient {
        client_in(transport, ephemeral, "")
    }

    fn client_in(
        transport: Arc<FakeTransport>,
        ephemeral: bool,
        namespace: &str,
    ) -> DiscoveryClient {
        let lb = Arc::new(DirectProxy::new(vec![Server::new("10.0.0.1:8848", 1).unwrap()]));
        let api = NamingHttpClient::new(lb, transport, Duration::from_secs(5));
        let naming = Arc::new(NamingService::new(api, PushReceiver::detached(), namespace));
        let mut instance = ServiceInstance::new("S", "10.0.0.2", 8080);
        instance.ephemeral = ephemeral;
        DiscoveryClient::new(naming, instance)
    }

    fn ok_transport() -> Arc<FakeTransport> {
        Arc::new(FakeTransport::new(|req| {
            if req.url.ends_with("/instance/beat") {
                status(200, r#"{"clientBeatInterval":1000}"#)
            } else {
                status(200, "ok")
            }
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn test_ephemeral_register_beats_until_deregister() {
        let transport = ok_transport();
        let client = client(transport.clone(), true);
        client.register().await.unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(transport.count("/instance/beat"), 3);

        client.deregister().await.unwrap();
        tokio::time::sleep(Duration::from_millis(5000)).await;
        assert_eq!(transport.count("/instance/beat"), 3);
        let requests = transport.requests();
        assert_eq!(requests.last().unwrap().method, reqwest::Method::DELETE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_uses_registered_namespace() {
        let beats = Arc::new(AtomicUsize::new(0));
        let counter = beats.clone();
        let transport = Arc::new(FakeTransport::new(move |req| {
            if req.url.ends_with("/instance/beat") {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    status(200, r#"{"clientBeatInterval":1000,"code":20404}"#)
                } else {
                    status(200, r#"{"clientBeatInterval":1000}"#)
                }
            } else {
                status(200, "ok")
            }
        }));
        let client = client_in(transport.clone(), true, "dev");
        client.register().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        client.deregister().await.unwrap();

        let requests = transport.requests();
        let registers: Vec<_> = requests
            .iter()
            .filter(|r| r.method == reqwest::Method::POST && r.url.ends_with("/instance"))
            .collect();
        // initial registration plus the one answering code 20404
        assert_eq!(registers.len(), 2);
        assert!(registers.iter().all(|r| r.param("namespaceId") == Some("dev")));
        assert!(registers.iter().all(|r| r.param("groupName") == Some("DEFAULT_GROUP")));
        let beat_requests: Vec<_> = requests
            .iter()
            .filter(|r| r.url.ends_with("/instance/beat"))
            .collect();
        assert_eq!(beat_requests.len(), 2);
        assert!(beat_requests.iter().all(|r| r.param("namespaceId") == Some("dev")));
        assert_eq!(
            requests.last().unwrap().param("namespaceId"),
            Some("dev")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_instance_has_no_heartbeat() {
        let transport = ok_transport();
        let client = client(transport.clone(), false);
        client.register().await.unwrap();
        tokio::time::sleep(Duration::from_millis(3000)).await;
        assert_eq!(transport.count("/instance/beat"), 0);
        client.deregister().await.unwrap();
    }
}
