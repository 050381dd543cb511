use crate::lb::{LoadBalancer, Server};
use parking_lot::RwLock;

/// Always routes to the first configured server.
#[derive(Debug, Default)]
pub struct DirectProxy {
    server: RwLock<Option<Server>>,
}

impl DirectProxy {
    pub fn new(servers: Vec<Server>) -> Self {
        Self {
            server: RwLock::new(servers.into_iter().next()),
        }
    }
}

impl LoadBalancer for DirectProxy {
    fn select_one(&self) -> Option<Server> {
        self.server.read().clone()
    }

    fn servers(&self) -> Vec<Server> {
        self.server.read().iter().cloned().collect()
    }

    fn refresh_servers(&self, servers: Vec<Server>) {
        if let Some(first) = servers.into_iter().next() {
            *self.server.write() = Some(first);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lb::HealthState;

    #[test]
    fn test_direct_ignores_health() {
        let mut server = Server::new("10.0.0.1:8848", 1).unwrap();
        server.state = HealthState::Critical;
        let lb = DirectProxy::new(vec![server.clone()]);
        assert_eq!(lb.select_one(), Some(server));
    }

    #[test]
    fn test_direct_empty_and_refresh() {
        let lb = DirectProxy::new(vec![]);
        assert!(lb.select_one().is_none());
        let server = Server::new("10.0.0.2:8848", 1).unwrap();
        lb.refresh_servers(vec![server.clone()]);
        assert_eq!(lb.servers(), vec![server]);
        lb.refresh_servers(vec![]);
        assert!(lb.select_one().is_some());
    }
}
