use crate::config::listener::{Change, FileListener, ValueListener};
use crate::config::loader::FileDesc;
use crate::error::{NacosError, Result};
use crate::pool::TaskPool;
use crate::utils;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;

/// Local mirror of a remote config file, refreshed by the watcher.
pub trait FileMirror: Send + Sync + 'static {
    fn desc(&self) -> &FileDesc;

    fn content(&self) -> Vec<u8>;

    fn md5(&self) -> String;

    /// Replaces the content with a newer version. Called in receipt order
    /// from a single task per file.
    fn apply(&self, content: Vec<u8>);
}

/// Turns the initially loaded bytes into a mirror.
pub trait FileConverter {
    type File: FileMirror;

    fn convert(&self, desc: FileDesc, content: Vec<u8>) -> Result<Arc<Self::File>>;
}

/// Parses file content into a flat key/value map.
pub type Parser = fn(&[u8]) -> Result<BTreeMap<String, String>>;

struct State {
    content: Vec<u8>,
    md5: String,
    params: BTreeMap<String, String>,
}

/// A config file seen as a flat key/value map.
pub struct MapFile {
    desc: FileDesc,
    parser: Parser,
    state: RwLock<State>,
    file_listeners: RwLock<Vec<Arc<dyn FileListener>>>,
    value_listeners: RwLock<HashMap<String, Vec<Arc<dyn ValueListener>>>>,
    pool: TaskPool,
}

impl MapFile {
    pub fn new(desc: FileDesc, content: Vec<u8>, parser: Parser, pool: TaskPool) -> Result<Self> {
        let params = parser(&content)?;
        Ok(Self {
            desc,
            parser,
            state: RwLock::new(State {
                md5: utils::md5_hex(&content),
                content,
                params,
            }),
            file_listeners: RwLock::new(vec![]),
            value_listeners: RwLock::new(HashMap::new()),
            pool,
        })
    }

    /// Called with the old and new content on every change.
    pub fn listen(&self, listener: impl FileListener + 'static) {
        self.file_listeners.write().push(Arc::new(listener));
    }

    /// Called when `key` is added, deleted or updated.
    pub fn listen_key(&self, key: impl Into<String>, listener: impl ValueListener + 'static) {
        self.value_listeners
            .write()
            .entry(key.into())
            .or_default()
            .push(Arc::new(listener));
    }

    pub fn get(&self, key: &str) -> Result<String> {
        self.state
            .read()
            .params
            .get(key)
            .cloned()
            .ok_or_else(|| NacosError::KeyNotFound(key.to_string()))
    }

    pub fn get_or(&self, key: &str, default: impl Into<String>) -> String {
        self.get(key).unwrap_or_else(|_| default.into())
    }

    pub fn get_parsed<T>(&self, key: &str) -> Result<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        let value = self.get(key)?;
        value.parse().map_err(|e: T::Err| NacosError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })
    }

    /// Accepts `1 t T TRUE true True` and `0 f F FALSE false False`.
    pub fn get_bool(&self, key: &str) -> Result<bool> {
        let value = self.get(key)?;
        match value.as_str() {
            "1" | "t" | "T" | "TRUE" | "true" | "True" => Ok(true),
            "0" | "f" | "F" | "FALSE" | "false" | "False" => Ok(false),
            _ => Err(NacosError::InvalidValue {
                key: key.to_string(),
                message: format!("{:?} is not a bool", value),
            }),
        }
    }

    pub fn get_int(&self, key: &str) -> Result<i64> {
        self.get_parsed(key)
    }

    pub fn get_float(&self, key: &str) -> Result<f64> {
        self.get_parsed(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.state.read().params.keys().cloned().collect()
    }

    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.state.read().params.clone()
    }

    /// Listeners are plain callbacks and may block, so each one runs on the
    /// blocking thread pool while holding a pool permit.
    fn dispatch(&self, old: Vec<u8>, new: Vec<u8>, changes: Vec<Change>) {
        let desc = Arc::new(self.desc.clone());
        let old: Arc<[u8]> = old.into();
        let new: Arc<[u8]> = new.into();
        for listener in self.file_listeners.read().iter() {
            let listener = listener.clone();
            let (desc, old, new) = (desc.clone(), old.clone(), new.clone());
            self.pool.submit(run_blocking(move || {
                listener.on_change(&desc, &old, &new)
            }));
        }

        let value_listeners = self.value_listeners.read();
        for change in changes {
            let Some(listeners) = value_listeners.get(&change.key) else {
                continue;
            };
            let change = Arc::new(change);
            for listener in listeners {
                let listener = listener.clone();
                let (desc, change) = (desc.clone(), change.clone());
                self.pool
                    .submit(run_blocking(move || listener.on_change(&desc, &change)));
            }
        }
    }
}

impl FileMirror for MapFile {
    fn desc(&self) -> &FileDesc {
        &self.desc
    }

    fn content(&self) -> Vec<u8> {
        self.state.read().content.clone()
    }

    fn md5(&self) -> String {
        self.state.read().md5.clone()
    }

    /// Content that fails to parse still replaces the raw bytes and reaches
    /// file listeners, but keys keep their last parsed values.
    fn apply(&self, content: Vec<u8>) {
        let params = match (self.parser)(&content) {
            Ok(params) => Some(params),
            Err(e) => {
                log::error!("config {} has unparsable content, keys unchanged: {}", self.desc, e);
                None
            }
        };
        let (old, changes) = {
            let mut state = self.state.write();
            if state.content == content {
                return;
            }
            let changes = match params {
                Some(params) => {
                    let changes = diff(&state.params, &params);
                    state.params = params;
                    changes
                }
                None => vec![],
            };
            let old = std::mem::replace(&mut state.content, content.clone());
            state.md5 = utils::md5_hex(&content);
            (old, changes)
        };
        log::info!("config {} changed, {} key(s) affected", self.desc, changes.len());
        self.dispatch(old, content, changes);
    }
}

async fn run_blocking(callback: impl FnOnce() + Send + 'static) {
    if let Err(e) = tokio::task::spawn_blocking(callback).await {
        log::error!("config listener panicked: {}", e);
    }
}

/// Key level changes from `old` to `new`. Deletions first, then updates
/// and additions, each in key order.
pub(crate) fn diff(old: &BTreeMap<String, String>, new: &BTreeMap<String, String>) -> Vec<Change> {
    let mut changes = vec![];
    for (key, value) in old {
        match new.get(key) {
            None => changes.push(Change::deleted(key, value)),
            Some(new_value) if new_value != value => {
                changes.push(Change::updated(key, value, new_value))
            }
            _ => {}
        }
    }
    for (key, value) in new {
        if !old.contains_key(key) {
            changes.push(Change::added(key, value));
        }
    }
    changes
}

/// `key=value` lines. Blank lines and `#`/`!` comments are skipped.
pub fn parse_properties(content: &[u8]) -> Result<BTreeMap<String, String>> {
    let text = String::from_utf8_lossy(content);
    let mut params = BTreeMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }
        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| NacosError::NotPropertiesFile(line.to_string()))?;
        params.insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(params)
}

/// Builds [`MapFile`]s from `.properties` content.
#[derive(Clone, Default)]
pub struct PropertiesConverter {
    pool: TaskPool,
}

impl PropertiesConverter {
    pub fn new(pool: TaskPool) -> Self {
        Self { pool }
    }
}

impl FileConverter for PropertiesConverter {
    type File = MapFile;

    fn convert(&self, desc: FileDesc, content: Vec<u8>) -> Result<Arc<MapFile>> {
        Ok(Arc::new(MapFile::new(
            desc,
            content,
            parse_properties,
            self.pool.clone(),
        )?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::listener::EventType;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn file(content: &str) -> MapFile {
        PropertiesConverter::default()
            .convert(FileDesc::new("", "G", "app.properties"), content.into())
            .map(|file| Arc::try_unwrap(file).ok().unwrap())
            .unwrap()
    }

    #[test]
    fn test_parse_properties() {
        let params = parse_properties(b"# comment\n! other\n\n a = 1 \nurl=jdbc:x?a=b\nempty=\n")
            .unwrap();
        assert_eq!(
            params,
            map(&[("a", "1"), ("url", "jdbc:x?a=b"), ("empty", "")])
        );
        assert!(matches!(
            parse_properties(b"a=1\nbroken"),
            Err(NacosError::NotPropertiesFile(line)) if line == "broken"
        ));
    }

    #[test]
    fn test_diff() {
        let changes = diff(&map(&[("a", "1"), ("b", "2")]), &map(&[("b", "3"), ("c", "4")]));
        assert_eq!(
            changes,
            vec![
                Change::deleted("a", "1"),
                Change::updated("b", "2", "3"),
                Change::added("c", "4"),
            ]
        );

        let changes = diff(&map(&[("a", "1"), ("b", "2")]), &BTreeMap::new());
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| c.event == EventType::Delete));
        assert!(diff(&map(&[("a", "1")]), &map(&[("a", "1")])).is_empty());
    }

    #[test]
    fn test_typed_accessors() {
        let file = file("port=8080\nratio=0.5\ndebug=T\nname=order\n");
        assert_eq!(file.get("name").unwrap(), "order");
        assert_eq!(file.get_or("missing", "x"), "x");
        assert_eq!(file.get_int("port").unwrap(), 8080);
        assert_eq!(file.get_float("ratio").unwrap(), 0.5);
        assert!(file.get_bool("debug").unwrap());
        assert_eq!(file.get_parsed::<u16>("port").unwrap(), 8080);
        assert!(matches!(file.get("missing"), Err(NacosError::KeyNotFound(_))));
        assert!(matches!(
            file.get_int("name"),
            Err(NacosError::InvalidValue { key, .. }) if key == "name"
        ));
        assert!(file.get_bool("name").is_err());
        assert_eq!(file.keys(), vec!["debug", "name", "port", "ratio"]);
        assert_eq!(file.md5(), utils::md5_hex(&file.content()));
    }

    #[tokio::test]
    async fn test_apply_dispatches_changes() {
        let file = file("a=1\nb=2\n");
        let (key_tx, mut key_rx) = mpsc::unbounded_channel();
        let (file_tx, mut file_rx) = mpsc::unbounded_channel();
        let (never_tx, mut never_rx) = mpsc::unbounded_channel();
        for key in ["a", "b", "c"] {
            let tx = key_tx.clone();
            file.listen_key(key, move |_: &FileDesc, change: &Change| {
                let _ = tx.send(change.clone());
            });
        }
        file.listen_key("z", move |_: &FileDesc, change: &Change| {
            let _ = never_tx.send(change.clone());
        });
        file.listen(move |desc: &FileDesc, old: &[u8], new: &[u8]| {
            let _ = file_tx.send((desc.data_id.clone(), old.to_vec(), new.to_vec()));
        });

        file.apply(b"b=3\nc=4\n".to_vec());

        let mut changes = vec![];
        for _ in 0..3 {
            changes.push(key_rx.recv().await.unwrap());
        }
        changes.sort_by(|x, y| x.key.cmp(&y.key));
        assert_eq!(
            changes,
            vec![
                Change::deleted("a", "1"),
                Change::updated("b", "2", "3"),
                Change::added("c", "4"),
            ]
        );
        let (data_id, old, new) = file_rx.recv().await.unwrap();
        assert_eq!(data_id, "app.properties");
        assert_eq!(old, b"a=1\nb=2\n");
        assert_eq!(new, b"b=3\nc=4\n");

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(never_rx.try_recv().is_err());
        assert_eq!(file.get("b").unwrap(), "3");
        assert!(file.get("a").is_err());
    }

    #[tokio::test]
    async fn test_file_listener_fires_without_key_changes() {
        let file = file("a=1\n");
        let (tx, mut rx) = mpsc::unbounded_channel();
        file.listen(move |_: &FileDesc, _: &[u8], new: &[u8]| {
            let _ = tx.send(new.to_vec());
        });
        file.apply(b"# touched\na=1\n".to_vec());
        assert_eq!(rx.recv().await.unwrap(), b"# touched\na=1\n");
        assert_eq!(file.get("a").unwrap(), "1");
    }

    #[tokio::test]
    async fn test_unparsable_update_keeps_keys() {
        let file = file("a=1\n");
        let (file_tx, mut file_rx) = mpsc::unbounded_channel();
        let (key_tx, mut key_rx) = mpsc::unbounded_channel();
        file.listen(move |_: &FileDesc, _: &[u8], new: &[u8]| {
            let _ = file_tx.send(new.to_vec());
        });
        file.listen_key("a", move |_: &FileDesc, change: &Change| {
            let _ = key_tx.send(change.clone());
        });

        file.apply(b"not a property".to_vec());
        assert_eq!(file_rx.recv().await.unwrap(), b"not a property");
        assert_eq!(file.md5(), utils::md5_hex(b"not a property"));
        assert_eq!(file.get("a").unwrap(), "1");

        file.apply(b"a=2\n".to_vec());
        assert_eq!(key_rx.recv().await.unwrap(), Change::updated("a", "1", "2"));
        assert_eq!(file_rx.recv().await.unwrap(), b"a=2\n");
    }

    #[tokio::test]
    async fn test_slow_listener_does_not_block_runtime() {
        let file = file("a=1\n");
        let (tx, mut rx) = mpsc::unbounded_channel();
        file.listen_key("a", move |_: &FileDesc, change: &Change| {
            std::thread::sleep(Duration::from_millis(800));
            let _ = tx.send(change.clone());
        });
        file.apply(b"a=2\n".to_vec());

        let started = std::time::Instant::now();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(started.elapsed() < Duration::from_millis(400));
        assert_eq!(rx.recv().await.unwrap(), Change::updated("a", "1", "2"));
    }
}
