use crate::lb::{HealthState, Server};
use crate::network::{HttpRequest, HttpTransport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Edge detector over probe results. Starts as passing.
#[derive(Debug, Clone, Copy)]
pub struct HealthTracker {
    state: HealthState,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self {
            state: HealthState::Passing,
        }
    }
}

impl HealthTracker {
    pub fn state(&self) -> HealthState {
        self.state
    }

    /// Records a probe result, returning the new state only on a transition.
    pub fn observe(&mut self, passing: bool) -> Option<HealthState> {
        let next = if passing {
            HealthState::Passing
        } else {
            HealthState::Critical
        };
        if next == self.state {
            return None;
        }
        self.state = next;
        Some(next)
    }
}

/// Fixed-interval HTTP liveness probe, one task per server.
#[derive(Clone)]
pub struct HealthChecker {
    transport: Arc<dyn HttpTransport>,
    health_path: String,
    interval: Duration,
    timeout: Duration,
}

impl HealthChecker {
    pub fn new(transport: Arc<dyn HttpTransport>, health_path: impl Into<String>) -> Self {
        Self {
            transport,
            health_path: health_path.into(),
            interval: DEFAULT_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// One GET on the health path. Anything but a 200 is a failure.
    pub async fn probe(&self, server: &Server) -> bool {
        let request = HttpRequest::get(server.url(&self.health_path)).timeout(self.timeout);
        match self.transport.execute(request).await {
            Ok(response) => response.is_success(),
            Err(e) => {
                log::debug!("health probe {} failed: {}", server.base_url(), e);
                false
            }
        }
    }

    /// Probes `server` every interval until `stop` flips to true.
    /// `on_transition` fires only when the state changes.
    pub async fn run<F>(&self, server: Server, mut stop: watch::Receiver<bool>, on_transition: F)
    where
        F: Fn(HealthState) + Send + Sync,
    {
        let mut tracker = HealthTracker::default();
        let mut ticker = tokio::time::interval(self.interval);
        // the first tick of an interval completes immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = stop.changed() => {}
            }
            if *stop.borrow() {
                log::debug!("health check of {} stopped", server.base_url());
                return;
            }
            let passing = self.probe(&server).await;
            if let Some(state) = tracker.observe(passing) {
                log::warn!("registry server {} is now {:?}", server.base_url(), state);
                on_transition(state);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeTransport, status};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_tracker_edges() {
        let mut tracker = HealthTracker::default();
        assert_eq!(tracker.observe(true), None);
        assert_eq!(tracker.observe(false), Some(HealthState::Critical));
        assert_eq!(tracker.observe(false), None);
        assert_eq!(tracker.observe(false), None);
        assert_eq!(tracker.observe(true), Some(HealthState::Passing));
        assert_eq!(tracker.state(), HealthState::Passing);
    }

    #[tokio::test]
    async fn test_probe_status() {
        let transport = Arc::new(FakeTransport::new(|req| {
            if req.url.starts_with("http://10.0.0.1") {
                status(200, "UP")
            } else {
                status(503, "DOWN")
            }
        }));
        let checker = HealthChecker::new(transport.clone(), super::super::HEALTH_PATH);
        assert!(checker.probe(&Server::new("10.0.0.1:8848", 1).unwrap()).await);
        assert!(!checker.probe(&Server::new("10.0.0.2:8848", 1).unwrap()).await);
        assert!(
            transport.requests()[0]
                .url
                .ends_with("nacos/v1/console/health/liveness")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_failures_fire_once() {
        let transport = Arc::new(FakeTransport::unreachable());
        let checker = HealthChecker::new(transport.clone(), "health")
            .with_interval(Duration::from_secs(1));
        let (stop_tx, stop_rx) = watch::channel(false);
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let server = Server::new("10.0.0.9:8848", 1).unwrap();
        let handle = tokio::spawn(async move {
            checker
                .run(server, stop_rx, move |state| {
                    assert_eq!(state, HealthState::Critical);
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .await;
        });
        tokio::time::sleep(Duration::from_millis(3500)).await;
        stop_tx.send_replace(true);
        handle.await.unwrap();
        assert_eq!(transport.count("health"), 3);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
