//! Sources a config file can be loaded from, tried in order.

use crate::config::api::ConfigHttpClient;
use crate::error::{NacosError, Result};
use crate::protocol::{ConfigQuery, DEFAULT_NAMESPACE, ListenKey};
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;

/// Identifies one config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FileDesc {
    pub namespace: String,
    pub group: String,
    pub data_id: String,
}

impl FileDesc {
    pub fn new(
        namespace: impl Into<String>,
        group: impl Into<String>,
        data_id: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            group: group.into(),
            data_id: data_id.into(),
        }
    }

    pub fn query(&self) -> ConfigQuery {
        ConfigQuery::new(&self.namespace, &self.group, &self.data_id)
    }

    pub fn listen_key(&self) -> ListenKey {
        ListenKey::new(&self.data_id, &self.group, &self.namespace)
    }
}

impl From<&ListenKey> for FileDesc {
    fn from(key: &ListenKey) -> Self {
        Self::new(&key.tenant, &key.group, &key.data_id)
    }
}

impl fmt::Display for FileDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.data_id, self.group)?;
        if !self.namespace.is_empty() {
            write!(f, "@{}", self.namespace)?;
        }
        Ok(())
    }
}

#[async_trait]
pub trait Loader: Send + Sync {
    async fn load(&self, desc: &FileDesc) -> Result<Vec<u8>>;

    /// Content loaded from here is written through to the snapshot.
    fn is_remote(&self) -> bool {
        false
    }
}

#[async_trait]
pub trait SnapshotWriter: Send + Sync {
    async fn write(&self, desc: &FileDesc, content: &[u8]) -> Result<()>;
}

/// Loads from the registry.
pub struct RemoteLoader {
    api: ConfigHttpClient,
}

impl RemoteLoader {
    pub fn new(api: ConfigHttpClient) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Loader for RemoteLoader {
    async fn load(&self, desc: &FileDesc) -> Result<Vec<u8>> {
        self.api.get(&desc.query()).await
    }

    fn is_remote(&self) -> bool {
        true
    }
}

/// Snapshot files on local disk, laid out as
/// `{dir}/{namespace}/{group segments}/{data_id}`.
#[derive(Debug, Clone)]
pub struct LocalLoader {
    dir: PathBuf,
}

impl LocalLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        if dir.as_os_str().is_empty() {
            return Err(NacosError::Config("snapshot dir not set".to_string()));
        }
        Ok(Self { dir })
    }

    pub fn path(&self, desc: &FileDesc) -> PathBuf {
        let mut path = self.dir.clone();
        path.push(if desc.namespace.is_empty() {
            DEFAULT_NAMESPACE
        } else {
            desc.namespace.as_str()
        });
        for segment in desc.group.split(':').filter(|s| !s.is_empty()) {
            path.push(segment);
        }
        path.push(&desc.data_id);
        path
    }
}

#[async_trait]
impl Loader for LocalLoader {
    async fn load(&self, desc: &FileDesc) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(self.path(desc)).await?)
    }
}

#[async_trait]
impl SnapshotWriter for LocalLoader {
    async fn write(&self, desc: &FileDesc, content: &[u8]) -> Result<()> {
        let path = self.path(desc);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, content).await?;
        log::debug!("snapshot of {} written to {}", desc, path.display());
        Ok(())
    }
}
