//! Collaborators the service hands work to.
//!
//! Both are async traits so deployments (and tests) can swap the
//! implementation.  Either may be absent from `AppState`; the routes that
//! need them report the missing binding themselves.

use axum::extract::Request;
use axum::response::Response;
use bytes::Bytes;
use serde::Serialize;

pub mod object_store;
pub mod proxy;

pub use self::object_store::FsObjectStore;
pub use self::proxy::HttpProxyBackend;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("failed to read request body: {0}")]
    Body(#[from] axum::Error),
    #[error("invalid backend url: {0}")]
    Url(#[from] url::ParseError),
    #[error("backend request failed: {0}")]
    Request(#[from] reqwest::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid object key '{0}'")]
    InvalidKey(String),
    #[error("object store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Forwards a request unmodified and relays whatever comes back.
#[async_trait::async_trait]
pub trait ProxyBackend: Send + Sync {
    fn name(&self) -> &str;
    async fn forward(&self, req: Request) -> Result<Response, BackendError>;
}

/// Metadata returned for a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredObject {
    pub etag: String,
    pub key: String,
    pub size: u64,
}

#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, body: Bytes) -> Result<StoredObject, StoreError>;
}
