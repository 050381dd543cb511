use crate::lb::{HealthChecker, HealthState, LoadBalancer, Server};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::watch;

#[derive(Debug, Default)]
struct Cursor {
    servers: Vec<Server>,
    /// Passing subset of `servers`, rebuilt on every state change
    healthy: Vec<Server>,
    current_index: isize,
    current_weight: u32,
    gcd_weight: u32,
    max_weight: u32,
}

impl Cursor {
    fn new(servers: Vec<Server>) -> Self {
        let mut cursor = Cursor {
            servers,
            ..Default::default()
        };
        cursor.reset();
        cursor
    }

    /// Recomputes weights from the healthy set and restarts the cycle.
    fn reset(&mut self) {
        self.healthy = self
            .servers
            .iter()
            .filter(|s| s.is_passing())
            .cloned()
            .collect();
        self.gcd_weight = self.healthy.iter().map(|s| s.weight).fold(0, gcd);
        self.max_weight = self.healthy.iter().map(|s| s.weight).max().unwrap_or(0);
        self.current_index = -1;
        self.current_weight = 0;
    }

    fn next(&mut self) -> Option<Server> {
        let n = self.healthy.len();
        match n {
            0 => return None,
            1 => return self.healthy.first().cloned(),
            _ => {}
        }
        loop {
            self.current_index = (self.current_index + 1) % n as isize;
            if self.current_index == 0 {
                self.current_weight = if self.current_weight < self.gcd_weight {
                    self.max_weight - self.gcd_weight
                } else {
                    self.current_weight - self.gcd_weight
                };
            }
            let server = &self.healthy[self.current_index as usize];
            if server.weight > self.current_weight {
                return Some(server.clone());
            }
        }
    }
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 { a } else { gcd(b, a % b) }
}

/// Weighted round robin over the passing servers.
///
/// Every server gets picked `weight / gcd` times per cycle. Health checks
/// are optional and only run after [`WeightRoundRobin::start_health_check`].
pub struct WeightRoundRobin {
    cursor: Mutex<Cursor>,
    checker: Mutex<Option<HealthChecker>>,
    stop: Mutex<Option<watch::Sender<bool>>>,
    this: Weak<WeightRoundRobin>,
}

impl WeightRoundRobin {
    pub fn new(servers: Vec<Server>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            cursor: Mutex::new(Cursor::new(servers)),
            checker: Mutex::new(None),
            stop: Mutex::new(None),
            this: this.clone(),
        })
    }

    /// Spawns one probe task per server. Calling it again replaces the
    /// previous generation of probes.
    pub fn start_health_check(&self, checker: HealthChecker) {
        *self.checker.lock() = Some(checker);
        self.restart_health_check();
    }

    pub fn stop_health_check(&self) {
        if let Some(stop) = self.stop.lock().take() {
            stop.send_replace(true);
        }
        self.checker.lock().take();
    }

    fn restart_health_check(&self) {
        let Some(checker) = self.checker.lock().clone() else {
            return;
        };
        let (tx, rx) = watch::channel(false);
        if let Some(old) = self.stop.lock().replace(tx) {
            old.send_replace(true);
        }
        for server in self.servers() {
            let checker = checker.clone();
            let stop = rx.clone();
            let this = self.this.clone();
            let base_url = server.base_url().to_string();
            tokio::spawn(async move {
                checker
                    .run(server, stop, move |state| {
                        if let Some(lb) = this.upgrade() {
                            lb.set_state(&base_url, state);
                        }
                    })
                    .await;
            });
        }
    }

    /// Applies a health transition and restarts the selection cycle.
    pub fn set_state(&self, base_url: &str, state: HealthState) {
        let mut cursor = self.cursor.lock();
        let mut changed = false;
        for server in cursor.servers.iter_mut() {
            if server.base_url() == base_url && server.state != state {
                server.state = state;
                changed = true;
            }
        }
        if changed {
            cursor.reset();
            log::info!(
                "registry server {} marked {:?}, {} of {} passing",
                base_url,
                state,
                cursor.healthy.len(),
                cursor.servers.len()
            );
        }
    }
}

impl LoadBalancer for WeightRoundRobin {
    fn select_one(&self) -> Option<Server> {
        self.cursor.lock().next()
    }

    fn servers(&self) -> Vec<Server> {
        self.cursor.lock().servers.clone()
    }

    fn refresh_servers(&self, servers: Vec<Server>) {
        if servers.is_empty() {
            log::warn!("ignored empty registry server list");
            return;
        }
        *self.cursor.lock() = Cursor::new(servers);
        self.restart_health_check();
    }
}

impl Drop for WeightRoundRobin {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.get_mut().take() {
            stop.send_replace(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn servers(weights: &[u32]) -> Vec<Server> {
        weights
            .iter()
            .enumerate()
            .map(|(i, w)| Server::new(&format!("10.0.0.{}:8848", i + 1), *w).unwrap())
            .collect()
    }

    fn picks(lb: &WeightRoundRobin, n: usize) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for _ in 0..n {
            let s = lb.select_one().unwrap();
            *counts.entry(s.base_url().to_string()).or_insert(0) += 1;
        }
        counts
    }

    #[test]
    fn test_gcd() {
        assert_eq!(gcd(4, 6), 2);
        assert_eq!([4, 2, 6].into_iter().fold(0, gcd), 2);
        assert_eq!([5, 1, 1].into_iter().fold(0, gcd), 1);
    }

    #[test]
    fn test_full_cycle_matches_weights() {
        let lb = WeightRoundRobin::new(servers(&[5, 1, 1]));
        for _ in 0..3 {
            let counts = picks(&lb, 7);
            assert_eq!(counts["http://10.0.0.1:8848/"], 5);
            assert_eq!(counts["http://10.0.0.2:8848/"], 1);
            assert_eq!(counts["http://10.0.0.3:8848/"], 1);
        }
    }

    #[test]
    fn test_cycle_with_common_divisor() {
        let lb = WeightRoundRobin::new(servers(&[4, 2, 6]));
        let counts = picks(&lb, 6);
        assert_eq!(counts["http://10.0.0.1:8848/"], 2);
        assert_eq!(counts["http://10.0.0.2:8848/"], 1);
        assert_eq!(counts["http://10.0.0.3:8848/"], 3);
    }

    #[test]
    fn test_critical_servers_are_skipped() {
        let lb = WeightRoundRobin::new(servers(&[1, 1]));
        lb.set_state("http://10.0.0.1:8848/", HealthState::Critical);
        for _ in 0..4 {
            assert_eq!(
                lb.select_one().unwrap().base_url(),
                "http://10.0.0.2:8848/"
            );
        }
        lb.set_state("http://10.0.0.2:8848/", HealthState::Critical);
        assert!(lb.select_one().is_none());
        assert_eq!(lb.servers().len(), 2);

        lb.set_state("http://10.0.0.1:8848/", HealthState::Passing);
        assert_eq!(
            lb.select_one().unwrap().base_url(),
            "http://10.0.0.1:8848/"
        );
    }

    #[test]
    fn test_refresh_swaps_list() {
        let lb = WeightRoundRobin::new(servers(&[1]));
        lb.refresh_servers(vec![Server::new("10.1.0.1:8848", 3).unwrap()]);
        assert_eq!(lb.servers().len(), 1);
        assert_eq!(
            lb.select_one().unwrap().base_url(),
            "http://10.1.0.1:8848/"
        );
        lb.refresh_servers(vec![]);
        assert_eq!(lb.servers().len(), 1);
    }
}
