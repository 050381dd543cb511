use crate::config::loader::FileDesc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Add,
    Delete,
    Update,
}

/// One key level difference between two versions of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub key: String,
    pub event: EventType,
    /// `None` for [`EventType::Add`]
    pub old_value: Option<String>,
    /// `None` for [`EventType::Delete`]
    pub new_value: Option<String>,
}

impl Change {
    pub fn added(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            event: EventType::Add,
            old_value: None,
            new_value: Some(value.into()),
        }
    }

    pub fn deleted(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            event: EventType::Delete,
            old_value: Some(value.into()),
            new_value: None,
        }
    }

    pub fn updated(
        key: impl Into<String>,
        old_value: impl Into<String>,
        new_value: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            event: EventType::Update,
            old_value: Some(old_value.into()),
            new_value: Some(new_value.into()),
        }
    }
}

/// Notified with the raw content whenever a file's bytes change.
pub trait FileListener: Send + Sync {
    fn on_change(&self, desc: &FileDesc, old: &[u8], new: &[u8]);
}

/// Notified when one key of a file is added, deleted or updated.
pub trait ValueListener: Send + Sync {
    fn on_change(&self, desc: &FileDesc, change: &Change);
}

impl<F> FileListener for F
where
    F: Fn(&FileDesc, &[u8], &[u8]) + Send + Sync,
{
    fn on_change(&self, desc: &FileDesc, old: &[u8], new: &[u8]) {
        self(desc, old, new)
    }
}

impl<F> ValueListener for F
where
    F: Fn(&FileDesc, &Change) + Send + Sync,
{
    fn on_change(&self, desc: &FileDesc, change: &Change) {
        self(desc, change)
    }
}
