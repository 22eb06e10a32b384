//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the relay.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the tunnel relay.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Duplex channel to the backend hub.
    pub channel: ChannelConfig,

    /// Request forwarding and correlation settings.
    pub tunnel: TunnelConfig,

    /// Routing cache and registry settings.
    pub routing: RoutingConfig,

    /// External blob store for offloaded responses.
    pub blob_store: BlobStoreConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Channel establishment settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ChannelConfig {
    /// WebSocket endpoint of the hub the backend client is attached to.
    pub endpoint: String,

    /// Connection attempts per `acquire` before giving up.
    pub connect_attempts: u32,

    /// Base delay for reconnect backoff in milliseconds.
    pub backoff_base_ms: u64,

    /// Maximum delay for reconnect backoff in milliseconds.
    pub backoff_max_ms: u64,

    /// Outbound frames buffered before senders wait.
    pub outbound_buffer: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:9000/".to_string(),
            connect_attempts: 3,
            backoff_base_ms: 100,
            backoff_max_ms: 2000,
            outbound_buffer: 256,
        }
    }
}

/// Per-request forwarding settings. Hot-reloadable.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TunnelConfig {
    /// Bodies longer than this are forwarded as chunk frames.
    pub max_inline_body_bytes: usize,

    /// Size of each forwarded body chunk.
    pub chunk_size_bytes: usize,

    /// How long to wait for the backend client's response.
    pub response_timeout_ms: u64,

    /// Largest request body accepted from callers.
    pub max_request_body_bytes: usize,

    /// Header carrying the correlation token. Generated when absent.
    pub request_id_header: String,
}

impl TunnelConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            max_inline_body_bytes: 32 * 1024,
            chunk_size_bytes: 16 * 1024,
            response_timeout_ms: 28_000,
            max_request_body_bytes: 10 * 1024 * 1024, // 10MB
            request_id_header: "x-amzn-trace-id".to_string(),
        }
    }
}

/// Routing cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RoutingConfig {
    /// How long a registry hit is served from cache.
    pub cache_ttl_secs: u64,

    /// Where routing keys are resolved on a cache miss.
    pub registry: RegistryConfig,
}

impl RoutingConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 120,
            registry: RegistryConfig::default(),
        }
    }
}

/// Registry backend selection.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegistryConfig {
    /// Fixed host to connection bindings.
    Static {
        #[serde(default)]
        bindings: Vec<BindingConfig>,
    },
    /// Remote registry service.
    Http { url: String },
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig::Static {
            bindings: Vec::new(),
        }
    }
}

/// A routing key bound to a backend client's connection.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct BindingConfig {
    /// Host header value (matched case-insensitively).
    pub host: String,

    /// Connection id of the backend client on the hub.
    pub connection_id: String,
}

/// Blob store configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BlobStoreConfig {
    /// Base URL objects are addressed under (`{location}/{key}`).
    pub location: String,
}

impl Default for BlobStoreConfig {
    fn default() -> Self {
        Self {
            location: "http://127.0.0.1:9100/tunnel-responses/".to_string(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: RelayConfig = toml::from_str("").unwrap();
        assert_eq!(config, RelayConfig::default());
        assert_eq!(config.routing.cache_ttl_secs, 120);
        assert_eq!(config.tunnel.request_id_header, "x-amzn-trace-id");
    }

    #[test]
    fn test_registry_variants() {
        let config: RelayConfig = toml::from_str(
            r#"
            [routing.registry]
            kind = "static"
            bindings = [{ host = "app.example.com", connection_id = "conn-1" }]
            "#,
        )
        .unwrap();
        match config.routing.registry {
            RegistryConfig::Static { bindings } => {
                assert_eq!(bindings.len(), 1);
                assert_eq!(bindings[0].connection_id, "conn-1");
            }
            other => panic!("unexpected registry: {:?}", other),
        }

        let config: RelayConfig = toml::from_str(
            r#"
            [routing.registry]
            kind = "http"
            url = "http://registry.internal"
            "#,
        )
        .unwrap();
        assert_eq!(
            config.routing.registry,
            RegistryConfig::Http {
                url: "http://registry.internal".into()
            }
        );
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config: RelayConfig = toml::from_str(
            r#"
            [tunnel]
            response_timeout_ms = 500
            "#,
        )
        .unwrap();
        assert_eq!(config.tunnel.response_timeout(), Duration::from_millis(500));
        assert_eq!(config.tunnel.chunk_size_bytes, 16 * 1024);
    }
}
