//! Blob store implementations.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures_util::{stream, StreamExt, TryStreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use url::Url;

use crate::blob::{BlobError, BlobStore, BlobStream};

/// Object store reachable over plain HTTP at `{location}/{key}`.
#[derive(Debug, Clone)]
pub struct HttpBlobStore {
    client: reqwest::Client,
    location: Url,
}

impl HttpBlobStore {
    pub fn new(location: &str) -> Result<Self, BlobError> {
        let location =
            Url::parse(location).map_err(|e| BlobError::InvalidLocation(format!("{}: {}", location, e)))?;
        if location.cannot_be_a_base() {
            return Err(BlobError::InvalidLocation(location.to_string()));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self { client, location })
    }

    pub fn location(&self) -> &Url {
        &self.location
    }

    fn object_url(&self, key: &str) -> Result<Url, BlobError> {
        let mut url = self.location.clone();
        url.path_segments_mut()
            .map_err(|_| BlobError::InvalidLocation(self.location.to_string()))?
            .pop_if_empty()
            .extend(key.split('/').filter(|s| !s.is_empty()));
        Ok(url)
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn get(&self, key: &str) -> Result<BlobStream, BlobError> {
        let url = self.object_url(key)?;
        tracing::debug!(blob_key = %key, url = %url, "Fetching offloaded response body");

        let response = self.client.get(url).send().await?;
        match response.status() {
            reqwest::StatusCode::NOT_FOUND => Err(BlobError::NotFound { key: key.to_string() }),
            status if status.is_success() => Ok(response.bytes_stream().map_err(BlobError::from).boxed()),
            status => Err(BlobError::Status {
                status,
                key: key.to_string(),
            }),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        let url = self.object_url(key)?;
        let response = self.client.delete(url).send().await?;
        let status = response.status();
        if status.is_success() || status == reqwest::StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(BlobError::Status {
                status,
                key: key.to_string(),
            })
        }
    }
}

/// In-process blob store.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    objects: DashMap<String, Bytes>,
    reject_deletes: AtomicBool,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: impl Into<String>, body: impl Into<Bytes>) {
        self.objects.insert(key.into(), body.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.contains_key(key)
    }

    /// Make every subsequent delete fail.
    pub fn reject_deletes(&self, reject: bool) {
        self.reject_deletes.store(reject, Ordering::Relaxed);
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, key: &str) -> Result<BlobStream, BlobError> {
        let body = self
            .objects
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| BlobError::NotFound { key: key.to_string() })?;

        // Yield in small pieces so consumers see a real multi-item stream.
        let pieces: Vec<Result<Bytes, BlobError>> = (0..body.len())
            .step_by(1024)
            .map(|start| Ok(body.slice(start..(start + 1024).min(body.len()))))
            .collect();
        Ok(stream::iter(pieces).boxed())
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        if self.reject_deletes.load(Ordering::Relaxed) {
            return Err(BlobError::DeleteRejected { key: key.to_string() });
        }
        self.objects.remove(key);
        Ok(())
    }
}
