//! Connection registry lookups.
//!
//! # Responsibilities
//! - Resolve a routing key to the backend client's channel reference
//! - Distinguish "not bound" (absent) from "registry unreachable" (error)
//!
//! # Design Decisions
//! - Registry is an injectable trait; the cache fronts whichever is configured
//! - Static bindings come from config; the HTTP registry is a remote service

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::config::{BindingConfig, RegistryConfig};

/// Reference to the backend client's connection on the shared channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelRef {
    pub connection_id: String,
}

impl ChannelRef {
    pub fn new(connection_id: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
        }
    }
}

impl std::fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.connection_id)
    }
}

/// Errors that can occur during registry lookups.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("registry returned status {0}")]
    Status(StatusCode),

    #[error("invalid registry URL: {0}")]
    InvalidUrl(String),
}

/// External lookup of which backend client serves a routing key.
#[async_trait]
pub trait ConnectionRegistry: Send + Sync {
    async fn lookup(&self, routing_key: &str) -> Result<Option<ChannelRef>, RegistryError>;
}

/// Build the registry selected by configuration.
pub fn registry_from_config(
    config: &RegistryConfig,
) -> Result<std::sync::Arc<dyn ConnectionRegistry>, RegistryError> {
    Ok(match config {
        RegistryConfig::Static { bindings } => std::sync::Arc::new(StaticRegistry::new(bindings)),
        RegistryConfig::Http { url } => std::sync::Arc::new(HttpRegistry::new(url)?),
    })
}

/// Fixed bindings from configuration.
#[derive(Debug, Default)]
pub struct StaticRegistry {
    bindings: HashMap<String, ChannelRef>,
}

impl StaticRegistry {
    pub fn new(bindings: &[BindingConfig]) -> Self {
        Self {
            bindings: bindings
                .iter()
                .map(|b| (b.host.to_ascii_lowercase(), ChannelRef::new(&b.connection_id)))
                .collect(),
        }
    }
}

#[async_trait]
impl ConnectionRegistry for StaticRegistry {
    async fn lookup(&self, routing_key: &str) -> Result<Option<ChannelRef>, RegistryError> {
        Ok(self.bindings.get(&routing_key.to_ascii_lowercase()).cloned())
    }
}

/// Remote registry queried at `GET {base}/connections/{routing_key}`.
///
/// `404` means no backend client is bound; the body of a `200` is
/// `{"connectionId": "..."}`.
#[derive(Debug, Clone)]
pub struct HttpRegistry {
    client: reqwest::Client,
    base: Url,
}

impl HttpRegistry {
    pub fn new(base: &str) -> Result<Self, RegistryError> {
        let base = Url::parse(base).map_err(|e| RegistryError::InvalidUrl(format!("{}: {}", base, e)))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self { client, base })
    }

    fn lookup_url(&self, routing_key: &str) -> Result<Url, RegistryError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| RegistryError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .push("connections")
            .push(routing_key);
        Ok(url)
    }
}

#[async_trait]
impl ConnectionRegistry for HttpRegistry {
    async fn lookup(&self, routing_key: &str) -> Result<Option<ChannelRef>, RegistryError> {
        let url = self.lookup_url(routing_key)?;
        tracing::debug!(routing_key = %routing_key, url = %url, "Querying connection registry");

        let response = self.client.get(url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.json::<ChannelRef>().await?)),
            status => Err(RegistryError::Status(status)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_lookup_is_case_insensitive() {
        let registry = StaticRegistry::new(&[BindingConfig {
            host: "App.Example.com".into(),
            connection_id: "conn-1".into(),
        }]);

        assert_eq!(
            registry.lookup("app.example.com").await.unwrap(),
            Some(ChannelRef::new("conn-1"))
        );
        assert_eq!(registry.lookup("other.example.com").await.unwrap(), None);
    }

    #[test]
    fn test_http_lookup_url() {
        let registry = HttpRegistry::new("http://registry.internal/api/").unwrap();
        assert_eq!(
            registry.lookup_url("app.example.com:8080").unwrap().as_str(),
            "http://registry.internal/api/connections/app.example.com:8080"
        );
    }

    #[test]
    fn test_invalid_registry_url() {
        assert!(matches!(
            HttpRegistry::new("not a url"),
            Err(RegistryError::InvalidUrl(_))
        ));
    }
}
