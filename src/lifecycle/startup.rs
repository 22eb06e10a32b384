//! Startup wiring.
//!
//! Builds the external collaborators named by the configuration: the hub
//! connector, the connection registry and the blob store. Any failure here
//! is fatal.

use std::sync::Arc;
use thiserror::Error;

use crate::blob::{BlobError, BlobStore, HttpBlobStore};
use crate::channel::{ChannelConnector, WebSocketConnector};
use crate::config::RelayConfig;
use crate::routing::registry::registry_from_config;
use crate::routing::{ConnectionRegistry, RegistryError};

/// Errors that prevent the relay from starting.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to build connection registry: {0}")]
    Registry(#[from] RegistryError),

    #[error("failed to build blob store: {0}")]
    BlobStore(#[from] BlobError),

    #[error("invalid request id header: {0}")]
    RequestIdHeader(String),
}

/// The collaborators a relay instance talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub connector: Arc<dyn ChannelConnector>,
    pub registry: Arc<dyn ConnectionRegistry>,
    pub blob_store: Arc<dyn BlobStore>,
}

impl Collaborators {
    /// Production collaborators from configuration.
    pub fn from_config(config: &RelayConfig) -> Result<Self, StartupError> {
        let connector = Arc::new(WebSocketConnector::new(
            config.channel.endpoint.clone(),
            config.channel.outbound_buffer,
        ));
        let registry = registry_from_config(&config.routing.registry)?;
        let blob_store = Arc::new(HttpBlobStore::new(&config.blob_store.location)?);

        tracing::info!(
            hub = %config.channel.endpoint,
            blob_location = %config.blob_store.location,
            "Collaborators initialized"
        );
        Ok(Self {
            connector,
            registry,
            blob_store,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_builds() {
        assert!(Collaborators::from_config(&RelayConfig::default()).is_ok());
    }

    #[test]
    fn test_bad_blob_location_is_fatal() {
        let mut config = RelayConfig::default();
        config.blob_store.location = "not a url".into();
        assert!(matches!(
            Collaborators::from_config(&config),
            Err(StartupError::BlobStore(_))
        ));
    }
}
