//! Out-of-band response bodies.
//!
//! # Data Flow
//! ```text
//! Completion::Blob { key } → BlobOffloadResolver::open
//!     → BlobStore::get(key)          (stream, passed through to the caller)
//!     → BlobStore::delete(key)       (after the stream ends, unless cacheable)
//! ```

pub mod resolver;
pub mod store;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use thiserror::Error;

pub use resolver::{retain_after_delivery, BlobOffloadResolver};
pub use store::{HttpBlobStore, MemoryBlobStore};

/// Errors raised by blob store operations.
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob store request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("blob {key} not found")]
    NotFound { key: String },

    #[error("blob store returned status {status} for {key}")]
    Status { status: reqwest::StatusCode, key: String },

    #[error("invalid blob location: {0}")]
    InvalidLocation(String),

    #[error("blob store rejected delete of {key}")]
    DeleteRejected { key: String },
}

/// Byte stream of one stored object.
pub type BlobStream = BoxStream<'static, Result<Bytes, BlobError>>;

/// External object storage holding offloaded response bodies.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Open the object for streaming.
    async fn get(&self, key: &str) -> Result<BlobStream, BlobError>;

    /// Remove the object. Best-effort from the relay's point of view.
    async fn delete(&self, key: &str) -> Result<(), BlobError>;
}
