//! Delivery of blob-backed responses.

use axum::body::Body;
use bytes::Bytes;
use futures_util::{future, stream, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::blob::{BlobError, BlobStore};
use crate::error::RelayError;
use crate::observability::metrics;

/// True when `cache-control` marks the object as meant to stay around
/// (`public` or `no-cache`, case-insensitive).
pub fn retain_after_delivery(cache_control: Option<&str>) -> bool {
    cache_control.is_some_and(|value| {
        let value = value.to_ascii_lowercase();
        value.contains("public") || value.contains("no-cache")
    })
}

/// Streams offloaded bodies to callers and cleans up afterwards.
#[derive(Clone)]
pub struct BlobOffloadResolver {
    store: Arc<dyn BlobStore>,
}

impl BlobOffloadResolver {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }

    /// Open `key` as a response body.
    ///
    /// The object is deleted once the stream has been fully delivered,
    /// unless `cache_control` asks for it to be retained. A failed or
    /// aborted delivery leaves it in place. Delete failures are logged only.
    pub async fn open(
        &self,
        request_id: &str,
        key: &str,
        cache_control: Option<&str>,
    ) -> Result<Body, RelayError> {
        let blob = self.store.get(key).await.map_err(|e| {
            tracing::error!(request_id = %request_id, blob_key = %key, error = %e, "Blob fetch failed");
            RelayError::BlobFetchFailure(e)
        })?;
        tracing::debug!(request_id = %request_id, blob_key = %key, "Serving response from blob store");

        let retain = retain_after_delivery(cache_control);
        let failed = Arc::new(AtomicBool::new(false));
        let saw_error = Arc::clone(&failed);
        let store = Arc::clone(&self.store);
        let request_id = request_id.to_string();
        let key = key.to_string();

        // Runs once the last byte has been handed to the caller. The delete
        // is detached so a slow store cannot hold the response open.
        let cleanup = stream::once(async move {
            if failed.load(Ordering::Acquire) {
                tracing::warn!(request_id = %request_id, blob_key = %key, "Blob stream failed; object kept");
                metrics::record_blob_cleanup("skipped_error");
            } else if retain {
                tracing::debug!(request_id = %request_id, blob_key = %key, "Cacheable response; object kept");
                metrics::record_blob_cleanup("retained");
            } else {
                tokio::spawn(delete_delivered(store, request_id, key));
            }
            None::<Result<Bytes, BlobError>>
        });

        let body = blob
            .inspect(move |item| {
                if item.is_err() {
                    saw_error.store(true, Ordering::Release);
                }
            })
            .map(Some)
            .chain(cleanup)
            .filter_map(future::ready);

        Ok(Body::from_stream(body))
    }
}

async fn delete_delivered(store: Arc<dyn BlobStore>, request_id: String, key: String) {
    match store.delete(&key).await {
        Ok(()) => {
            tracing::debug!(request_id = %request_id, blob_key = %key, "Deleted delivered blob");
            metrics::record_blob_cleanup("deleted");
        }
        Err(e) => {
            tracing::warn!(request_id = %request_id, blob_key = %key, error = %e, "Blob delete failed");
            metrics::record_blob_cleanup("delete_failed");
        }
    }
}
