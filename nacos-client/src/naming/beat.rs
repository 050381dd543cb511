use crate::naming::api::NamingHttpClient;
use crate::protocol::{BEAT_RESOURCE_NOT_FOUND, HeartbeatRequest, ServiceInstance};
use crate::utils;
use std::time::Duration;
use tokio::sync::watch;

/// Interval used until the registry dictates one.
pub const DEFAULT_BEAT_INTERVAL: Duration = Duration::from_secs(5);
const MAX_RETRY_DELAY_SECS: u64 = 30;

/// Keeps an ephemeral instance alive with server-paced beats.
pub struct HeartbeatKeeper {
    api: NamingHttpClient,
    instance: ServiceInstance,
}

impl HeartbeatKeeper {
    pub fn new(api: NamingHttpClient, instance: ServiceInstance) -> Self {
        Self { api, instance }
    }

    /// Beats immediately, then after every interval the registry answers
    /// with, until `stop` flips to true.
    pub async fn run(self, mut stop: watch::Receiver<bool>) {
        loop {
            let Some(interval) = self.beat(&mut stop).await else {
                break;
            };
            if !utils::sleep_or_stop(interval, &mut stop).await {
                break;
            }
        }
        log::info!(
            "heartbeat of {}:{} stopped",
            self.instance.ip,
            self.instance.port
        );
    }

    /// Sends one beat, retrying with backoff until it is accepted.
    /// Returns the next interval, or `None` once stopped.
    async fn beat(&self, stop: &mut watch::Receiver<bool>) -> Option<Duration> {
        let request = HeartbeatRequest::new(&self.instance);
        let mut retries = 0;
        loop {
            match self.api.beat(&request).await {
                Ok(result) => {
                    if result.code == BEAT_RESOURCE_NOT_FOUND {
                        log::warn!(
                            "instance {}:{} unknown to the registry, register again",
                            self.instance.ip,
                            self.instance.port
                        );
                        if let Err(e) = self.api.register_instance(&self.instance).await {
                            log::error!("re-register failed: {}", e);
                        }
                    }
                    return Some(if result.client_beat_interval > 0 {
                        Duration::from_millis(result.client_beat_interval as u64)
                    } else {
                        DEFAULT_BEAT_INTERVAL
                    });
                }
                Err(e) => {
                    retries += 1;
                    let delay = utils::backoff(retries, 1, MAX_RETRY_DELAY_SECS);
                    log::error!("send heartbeat failed: {}, retry in {:?}", e, delay);
                    if !utils::sleep_or_stop(delay, stop).await {
                        return None;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lb::{DirectProxy, Server};
    use crate::testing::{FakeTransport, status};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn keeper(transport: Arc<FakeTransport>) -> HeartbeatKeeper {
        let lb = Arc::new(DirectProxy::new(vec![Server::new("10.0.0.1:8848", 1).unwrap()]));
        let api = NamingHttpClient::new(lb, transport, Duration::from_secs(5));
        HeartbeatKeeper::new(api, ServiceInstance::new("S", "10.0.0.2", 8080))
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_is_server_driven() {
        let transport = Arc::new(FakeTransport::new(|_| {
            status(200, r#"{"clientBeatInterval":2000}"#)
        }));
        let (stop, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(keeper(transport.clone()).run(stop_rx));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(transport.count("/instance/beat"), 1);
        tokio::time::sleep(Duration::from_millis(4000)).await;
        assert_eq!(transport.count("/instance/beat"), 3);
        stop.send_replace(true);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_backoff_until_success() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let transport = Arc::new(FakeTransport::new(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) < 3 {
                Err(crate::error::NacosError::Transport("refused".into()))
            } else {
                status(200, r#"{"clientBeatInterval":60000}"#)
            }
        }));
        let (stop, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(keeper(transport).run(stop_rx));
        // retries after 1s, 2s and 3s
        tokio::time::sleep(Duration::from_millis(5500)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        stop.send_replace(true);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_instance_is_registered_again() {
        let transport = Arc::new(FakeTransport::new(|req| {
            if req.url.ends_with("/instance/beat") {
                status(200, r#"{"clientBeatInterval":5000,"code":20404}"#)
            } else {
                status(200, "ok")
            }
        }));
        let (stop, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(keeper(transport.clone()).run(stop_rx));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(transport.count("/ns/instance"), 1);
        stop.send_replace(true);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_retry() {
        let (stop, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(keeper(Arc::new(FakeTransport::unreachable())).run(stop_rx));
        tokio::time::sleep(Duration::from_millis(100)).await;
        stop.send_replace(true);
        stop.send_replace(true);
        handle.await.unwrap();
    }
}
