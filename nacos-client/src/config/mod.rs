//! # Config
//!
//! Mirrors remote config files locally and keeps them up to date.
//!
//! A file is loaded once through a chain of [`Loader`]s (registry first,
//! local snapshot second), turned into a [`FileMirror`] by a
//! [`FileConverter`], and from then on refreshed by a single long-poll loop
//! started with [`ConfigService::watch`]. Content fetched from the registry
//! is written through to the snapshot directory so the next start can
//! survive a registry outage.
//!
//! # Usage
//! ```rust,ignore
//! let config = client.config_service()?;
//! let file = config.properties("DEFAULT_GROUP", "app.properties").await?;
//! file.listen_key("db.url", |_: &FileDesc, change: &Change| {
//!     println!("db.url is now {:?}", change.new_value);
//! });
//! config.watch();
//! let port = file.get_int("server.port")?;
//! ```
pub mod api;
mod listener;
mod loader;
mod map_file;
mod yaml;

use crate::error::{NacosError, Result};
use crate::pool::TaskPool;
use crate::protocol::{DEFAULT_GROUP, ListenKey, normalize_namespace};
use crate::utils;
use api::ConfigHttpClient;
pub use listener::{Change, EventType, FileListener, ValueListener};
pub use loader::{FileDesc, Loader, LocalLoader, RemoteLoader, SnapshotWriter};
pub use map_file::{
    FileConverter, FileMirror, MapFile, Parser, PropertiesConverter, parse_properties,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{Notify, mpsc, watch};
pub use yaml::{YamlConverter, parse_yaml};

/// Pending refreshes per file before the watcher waits for the file to
/// catch up.
const NOTIFY_CAPACITY: usize = 100;
const WATCH_RETRY_STEP_SECS: u64 = 5;
const WATCH_RETRY_MAX_SECS: u64 = 60;

/// Last known fingerprint of a watched file and the mirrors fed by it.
struct Watched {
    md5: String,
    notifiers: Vec<mpsc::Sender<Vec<u8>>>,
}

/// Orders snapshot writes of one file. A write only lands when it is newer
/// than the last one written.
#[derive(Default)]
struct SnapshotSlot {
    issued: u64,
    written: Arc<tokio::sync::Mutex<u64>>,
}

pub struct ConfigService {
    namespace: String,
    api: ConfigHttpClient,
    loaders: Vec<Arc<dyn Loader>>,
    snapshot: Option<Arc<dyn SnapshotWriter>>,
    pool: TaskPool,
    files: Mutex<HashMap<ListenKey, Watched>>,
    snapshot_slots: Mutex<HashMap<ListenKey, SnapshotSlot>>,
    files_added: Arc<Notify>,
    watching: AtomicBool,
    stop: watch::Sender<bool>,
}

impl ConfigService {
    /// Loads from the registry, falls back to and writes through to
    /// `snapshot`.
    pub fn new(
        api: ConfigHttpClient,
        namespace: &str,
        snapshot: LocalLoader,
        pool: TaskPool,
    ) -> Self {
        let snapshot = Arc::new(snapshot);
        let loaders = vec![
            Arc::new(RemoteLoader::new(api.clone())) as Arc<dyn Loader>,
            snapshot.clone() as Arc<dyn Loader>,
        ];
        Self::with_loaders(
            api,
            namespace,
            loaders,
            Some(snapshot as Arc<dyn SnapshotWriter>),
            pool,
        )
    }

    /// A service with a custom loader chain. Only content coming from a
    /// remote loader is written to `snapshot`.
    pub fn with_loaders(
        api: ConfigHttpClient,
        namespace: &str,
        loaders: Vec<Arc<dyn Loader>>,
        snapshot: Option<Arc<dyn SnapshotWriter>>,
        pool: TaskPool,
    ) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            namespace: normalize_namespace(namespace).to_string(),
            api,
            loaders,
            snapshot,
            pool,
            files: Mutex::new(HashMap::new()),
            snapshot_slots: Mutex::new(HashMap::new()),
            files_added: Arc::new(Notify::new()),
            watching: AtomicBool::new(false),
            stop,
        }
    }

    pub fn api(&self) -> &ConfigHttpClient {
        &self.api
    }

    /// Loads a `.properties` file and registers it for watching.
    pub async fn properties(&self, group: &str, data_id: &str) -> Result<Arc<MapFile>> {
        self.custom(group, data_id, &PropertiesConverter::new(self.pool.clone()))
            .await
    }

    /// Loads a YAML file, flattened to dotted keys, and registers it for
    /// watching.
    pub async fn yaml(&self, group: &str, data_id: &str) -> Result<Arc<MapFile>> {
        self.custom(group, data_id, &YamlConverter::new(self.pool.clone()))
            .await
    }

    /// Loads a file through the loader chain, converts it and registers the
    /// result for watching. An empty group means `DEFAULT_GROUP`.
    pub async fn custom<C: FileConverter>(
        &self,
        group: &str,
        data_id: &str,
        converter: &C,
    ) -> Result<Arc<C::File>> {
        let desc = self.desc(group, data_id);
        let content = self.load(&desc).await?;
        let file = converter.convert(desc, content)?;
        self.track(&file);
        Ok(file)
    }

    pub async fn publish(&self, group: &str, data_id: &str, content: &str) -> Result<()> {
        self.api
            .publish(&self.desc(group, data_id).query(), content)
            .await
    }

    pub async fn delete(&self, group: &str, data_id: &str) -> Result<()> {
        self.api.delete(&self.desc(group, data_id).query()).await
    }

    fn desc(&self, group: &str, data_id: &str) -> FileDesc {
        let group = if group.is_empty() {
            DEFAULT_GROUP
        } else {
            group
        };
        FileDesc::new(&self.namespace, group, data_id)
    }

    /// First loader to succeed wins.
    async fn load(&self, desc: &FileDesc) -> Result<Vec<u8>> {
        for loader in &self.loaders {
            match loader.load(desc).await {
                Ok(content) => {
                    if loader.is_remote() {
                        self.write_snapshot(desc, content.clone());
                    }
                    return Ok(content);
                }
                Err(e) => log::warn!("load config {} failed: {}", desc, e),
            }
        }
        Err(NacosError::LoaderNotWork(desc.to_string()))
    }

    fn write_snapshot(&self, desc: &FileDesc, content: Vec<u8>) {
        let Some(writer) = self.snapshot.clone() else {
            return;
        };
        let (generation, written) = {
            let mut slots = self.snapshot_slots.lock();
            let slot = slots.entry(desc.listen_key()).or_default();
            slot.issued += 1;
            (slot.issued, slot.written.clone())
        };
        let desc = desc.clone();
        self.pool.submit(async move {
            let mut written = written.lock().await;
            if *written >= generation {
                log::debug!("skip stale snapshot of {}", desc);
                return;
            }
            match writer.write(&desc, &content).await {
                Ok(()) => *written = generation,
                Err(e) => log::error!("write snapshot of {} failed: {}", desc, e),
            }
        });
    }

    /// Feeds refreshed content to `file` from a task of its own, in order.
    fn track<F: FileMirror>(&self, file: &Arc<F>) {
        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(NOTIFY_CAPACITY);
        let weak = Arc::downgrade(file);
        tokio::spawn(async move {
            while let Some(content) = rx.recv().await {
                let Some(file) = weak.upgrade() else {
                    break;
                };
                file.apply(content);
            }
        });

        let key = file.desc().listen_key();
        self.files
            .lock()
            .entry(key)
            .or_insert_with(|| Watched {
                md5: file.md5(),
                notifiers: vec![],
            })
            .notifiers
            .push(tx);
        self.files_added.notify_one();
    }

    /// Every tracked file with its last known fingerprint.
    fn listen_keys(&self) -> Vec<ListenKey> {
        self.files
            .lock()
            .iter()
            .map(|(key, watched)| key.clone().with_md5(&watched.md5))
            .collect()
    }

    /// Starts the long-poll loop. Calling it again, or after
    /// [`ConfigService::stop_watch`], does nothing.
    pub fn watch(self: &Arc<Self>) {
        if *self.stop.borrow() || self.watching.swap(true, Ordering::SeqCst) {
            return;
        }
        log::info!("start watching config changes");
        tokio::spawn(watch_loop(Arc::downgrade(self), self.stop.subscribe()));
    }

    /// Stops the long-poll loop once the in-flight call returns.
    pub fn stop_watch(&self) {
        if !self.stop.send_replace(true) {
            log::info!("config watch stopped");
        }
    }

    /// Fetches a changed file and hands the content to its mirrors.
    async fn refresh(&self, key: &ListenKey) {
        let desc = FileDesc::from(key);
        let content = match self.api.get(&desc.query()).await {
            Ok(content) => content,
            Err(NacosError::NotFound(_)) => {
                log::warn!("config {} removed from the registry", desc);
                vec![]
            }
            Err(e) => {
                log::error!("fetch changed config {} failed: {}", desc, e);
                return;
            }
        };
        let notifiers = {
            let mut files = self.files.lock();
            let Some(watched) = files.get_mut(&key.without_md5()) else {
                log::warn!("changed config {} is not watched", desc);
                return;
            };
            watched.md5 = utils::md5_hex(&content);
            watched.notifiers.retain(|tx| !tx.is_closed());
            watched.notifiers.clone()
        };
        log::info!("config {} changed", desc);
        self.write_snapshot(&desc, content.clone());
        for tx in notifiers {
            let _ = tx.send(content.clone()).await;
        }
    }
}

impl Drop for ConfigService {
    fn drop(&mut self) {
        self.stop.send_replace(true);
    }
}

async fn watch_loop(service: Weak<ConfigService>, mut stop: watch::Receiver<bool>) {
    let mut retries = 0;
    loop {
        if *stop.borrow() {
            break;
        }
        let Some(this) = service.upgrade() else {
            break;
        };
        let keys = this.listen_keys();
        if keys.is_empty() {
            let files_added = this.files_added.clone();
            drop(this);
            tokio::select! {
                _ = files_added.notified() => {}
                _ = stop.changed() => {}
            }
            continue;
        }
        let api = this.api.clone();
        drop(this);

        let result = api.listen(&keys).await;
        match result {
            Ok(changed) => {
                retries = 0;
                let Some(this) = service.upgrade() else {
                    break;
                };
                for key in &changed {
                    this.refresh(key).await;
                }
            }
            Err(e) => {
                retries += 1;
                let delay =
                    utils::backoff(retries, WATCH_RETRY_STEP_SECS, WATCH_RETRY_MAX_SECS);
                if e.is_transient() {
                    log::warn!("listen config changes failed: {}, retry in {:?}", e, delay);
                } else {
                    log::error!("listen config changes failed: {}, retry in {:?}", e, delay);
                }
                if !utils::sleep_or_stop(delay, &mut stop).await {
                    break;
                }
            }
        }
    }
    log::debug!("config watch loop exited");
}
