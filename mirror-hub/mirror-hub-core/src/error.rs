use thiserror::Error;

/// A path that does not belong to any mirror family.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid path structure: {path:?}")]
pub struct InvalidPath {
    pub path: String,
}

impl InvalidPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt mirror record: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("storage contention on {key}")]
    Contention { key: String },
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("remote store unreachable")]
    Unreachable,
    #[error("remote call timed out")]
    Timeout,
    #[error("remote rejected request: {0}")]
    Rejected(String),
    #[error("remote transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Failures visible to whoever issued a write, read or subscription. Remote
/// failures never show up here.
#[derive(Error, Debug)]
pub enum HubError {
    #[error(transparent)]
    InvalidPath(#[from] InvalidPath),
    #[error("local persist failed: {0}")]
    LocalPersist(#[source] StoreError),
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("startup sync failed reading {path}: {source}")]
    StartupRead {
        path: String,
        #[source]
        source: RemoteError,
    },
    #[error("startup sync failed storing {key}: {source}")]
    StartupStore {
        key: String,
        #[source]
        source: StoreError,
    },
}
