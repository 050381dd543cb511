//! Error taxonomy shared by every component.
//!
//! One-shot calls (register, publish, get) hand these back to the caller.
//! Background loops only log them and retry.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, NacosError>;

#[derive(Debug, Error)]
pub enum NacosError {
    /// Connection refused, timeout, broken body stream
    #[error("transport error: {0}")]
    Transport(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("registry internal error: {0}")]
    InternalServerError(String),
    #[error("unsupported status code {0}")]
    UnsupportedStatus(u16),
    /// Registry answered 200 but refused the operation
    #[error("registry rejected the request: {0}")]
    Rejected(String),
    #[error("invalid listen key: {0:?}")]
    InvalidListenKey(String),
    #[error("not a properties line: {0:?}")]
    NotPropertiesFile(String),
    #[error("key not found: {0}")]
    KeyNotFound(String),
    #[error("no healthy registry server available")]
    NoServerAvailable,
    #[error("no loader could provide {0}")]
    LoaderNotWork(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl NacosError {
    /// Maps a non-200 registry status to its semantic kind.
    pub fn from_status(status: u16, body: &[u8]) -> Self {
        let message = String::from_utf8_lossy(body).trim().to_string();
        match status {
            400 => NacosError::BadRequest(message),
            403 => NacosError::Forbidden(message),
            404 => NacosError::NotFound(message),
            500 => NacosError::InternalServerError(message),
            code => NacosError::UnsupportedStatus(code),
        }
    }

    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            NacosError::Transport(_)
                | NacosError::InternalServerError(_)
                | NacosError::NoServerAvailable
        )
    }
}

impl From<reqwest::Error> for NacosError {
    fn from(e: reqwest::Error) -> Self {
        NacosError::Transport(e.to_string())
    }
}
