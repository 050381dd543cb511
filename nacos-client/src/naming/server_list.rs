use crate::error::Result;
use crate::naming::api::NamingHttpClient;
use crate::naming::push::{PushMessage, PushReceiver, push_key};
use crate::protocol::{DEFAULT_GROUP, InstanceListQuery, ServiceInstance};
use crate::utils;
use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;

/// Poll interval before the first response is known.
pub const DEFAULT_CACHE_MILLIS: i64 = 10;
/// Poll interval used when the registry does not dictate a positive one.
pub const FALLBACK_CACHE_MILLIS: i64 = 10_000;
const POLL_ERROR_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct CacheState {
    instances: Vec<ServiceInstance>,
    last_ref_time: i64,
    cache_millis: i64,
}

/// Continuously refreshed instance list of one service query.
///
/// A polling loop re-lists the service every `cacheMillis`. With a push
/// receiver attached, pushed lists newer than the cached one replace it
/// right away. Both loops end on [`ServerList::stop_listen`] or when the
/// list is dropped.
pub struct ServerList {
    api: NamingHttpClient,
    query: InstanceListQuery,
    key: String,
    push: Option<Arc<PushReceiver>>,
    state: RwLock<CacheState>,
    stop: watch::Sender<bool>,
}

impl ServerList {
    /// Seeds the cache with one list call, then starts the loops.
    pub async fn listen(
        api: NamingHttpClient,
        query: InstanceListQuery,
        push: Option<Arc<PushReceiver>>,
    ) -> Result<Arc<Self>> {
        let group = if query.group_name.is_empty() {
            DEFAULT_GROUP
        } else {
            query.group_name.as_str()
        };
        let key = push_key(group, &query.service_name, &query.clusters);
        let (stop, stop_rx) = watch::channel(false);
        let list = Arc::new(Self {
            api,
            key,
            push,
            query,
            state: RwLock::new(CacheState {
                instances: vec![],
                last_ref_time: i64::MAX,
                cache_millis: DEFAULT_CACHE_MILLIS,
            }),
            stop,
        });
        list.poll().await?;

        tokio::spawn(poll_loop(Arc::downgrade(&list), stop_rx.clone()));
        if let Some(push) = &list.push {
            tokio::spawn(push_loop(Arc::downgrade(&list), push.subscribe(), stop_rx));
        }
        Ok(list)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn get_all(&self) -> Vec<ServiceInstance> {
        self.state.read().instances.clone()
    }

    /// Uniformly random healthy and enabled instance.
    pub fn select_one(&self) -> Option<ServiceInstance> {
        let state = self.state.read();
        let candidates: Vec<&ServiceInstance> =
            state.instances.iter().filter(|i| i.is_routable()).collect();
        if candidates.is_empty() {
            return None;
        }
        Some(candidates[fastrand::usize(..candidates.len())].clone())
    }

    pub fn last_ref_time(&self) -> i64 {
        self.state.read().last_ref_time
    }

    pub fn cache_millis(&self) -> i64 {
        self.state.read().cache_millis
    }

    /// Ends both loops. Safe to call any number of times.
    pub fn stop_listen(&self) {
        self.stop.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.cache_millis().max(0) as u64)
    }

    /// Lists the service once and replaces the cache with the result.
    async fn poll(&self) -> Result<()> {
        let mut query = self.query.clone();
        if let Some(port) = self.push.as_ref().and_then(|p| p.port()) {
            query.udp_port = Some(port);
            query.client_ip = Some(utils::local_ip());
        }
        let result = self.api.list_instances(&query).await?;
        let instances: Vec<ServiceInstance> = result
            .hosts
            .into_iter()
            .map(|h| h.scoped(&self.query.namespace_id, &self.query.group_name))
            .collect();
        let mut state = self.state.write();
        state.instances = instances;
        state.last_ref_time = result.last_ref_time;
        state.cache_millis = if result.cache_millis > 0 {
            result.cache_millis
        } else {
            FALLBACK_CACHE_MILLIS
        };
        Ok(())
    }

    /// Accepts a pushed list for this key when it is strictly newer.
    pub(crate) fn apply_push(&self, message: &PushMessage) -> bool {
        if message.key() != self.key {
            return false;
        }
        let mut state = self.state.write();
        if message.last_ref_time <= state.last_ref_time {
            log::debug!(
                "drop stale push of {}, {} <= {}",
                self.key,
                message.last_ref_time,
                state.last_ref_time
            );
            return false;
        }
        state.instances = message
            .hosts
            .iter()
            .cloned()
            .map(|h| h.scoped(&self.query.namespace_id, &self.query.group_name))
            .collect();
        state.last_ref_time = message.last_ref_time;
        log::info!(
            "service {} updated by push, {} instances",
            self.key,
            state.instances.len()
        );
        true
    }
}

impl Drop for ServerList {
    fn drop(&mut self) {
        self.stop.send_replace(true);
    }
}

async fn poll_loop(list: Weak<ServerList>, mut stop: watch::Receiver<bool>) {
    loop {
        let Some(interval) = list.upgrade().map(|l| l.poll_interval()) else {
            return;
        };
        if !utils::sleep_or_stop(interval, &mut stop).await {
            return;
        }
        let Some(this) = list.upgrade() else {
            return;
        };
        let result = this.poll().await;
        let key = this.key.clone();
        drop(this);
        if let Err(e) = result {
            log::error!("list service {} failed: {}", key, e);
            if !utils::sleep_or_stop(POLL_ERROR_DELAY, &mut stop).await {
                return;
            }
        }
    }
}

async fn push_loop(
    list: Weak<ServerList>,
    mut messages: tokio::sync::broadcast::Receiver<Arc<PushMessage>>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        if *stop.borrow() {
            return;
        }
        tokio::select! {
            message = messages.recv() => match message {
                Ok(message) => {
                    let Some(this) = list.upgrade() else {
                        return;
                    };
                    this.apply_push(&message);
                }
                Err(RecvError::Lagged(n)) => log::warn!("push consumer lagged, {} messages skipped", n),
                Err(RecvError::Closed) => return,
            },
            _ = stop.changed() => {}
        }
    }
}
