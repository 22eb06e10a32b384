//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, chunk sizes sane)
//! - Check that endpoints and addresses parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RelayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use thiserror::Error;
use url::Url;

use crate::config::schema::{RegistryConfig, RelayConfig};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("tunnel.chunk_size_bytes ({chunk}) must not exceed tunnel.max_inline_body_bytes ({inline})")]
    ChunkLargerThanInline { chunk: usize, inline: usize },

    #[error("{field} is not a valid URL: {value}")]
    InvalidUrl { field: &'static str, value: String },

    #[error("{field} is not a valid socket address: {value}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("tunnel.request_id_header is not a valid header name: {0}")]
    InvalidHeaderName(String),

    #[error("routing binding for host '{0}' has an empty connection id")]
    EmptyBinding(String),
}

/// Validate a parsed configuration.
pub fn validate_config(config: &RelayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }

    match Url::parse(&config.channel.endpoint) {
        Ok(url) if matches!(url.scheme(), "ws" | "wss") => {}
        _ => errors.push(ValidationError::InvalidUrl {
            field: "channel.endpoint",
            value: config.channel.endpoint.clone(),
        }),
    }
    if config.channel.connect_attempts == 0 {
        errors.push(ValidationError::Zero { field: "channel.connect_attempts" });
    }
    if config.channel.outbound_buffer == 0 {
        errors.push(ValidationError::Zero { field: "channel.outbound_buffer" });
    }

    let tunnel = &config.tunnel;
    if tunnel.response_timeout_ms == 0 {
        errors.push(ValidationError::Zero { field: "tunnel.response_timeout_ms" });
    }
    if tunnel.chunk_size_bytes == 0 {
        errors.push(ValidationError::Zero { field: "tunnel.chunk_size_bytes" });
    } else if tunnel.chunk_size_bytes > tunnel.max_inline_body_bytes {
        errors.push(ValidationError::ChunkLargerThanInline {
            chunk: tunnel.chunk_size_bytes,
            inline: tunnel.max_inline_body_bytes,
        });
    }
    if axum::http::HeaderName::from_bytes(tunnel.request_id_header.as_bytes()).is_err() {
        errors.push(ValidationError::InvalidHeaderName(tunnel.request_id_header.clone()));
    }

    if config.routing.cache_ttl_secs == 0 {
        errors.push(ValidationError::Zero { field: "routing.cache_ttl_secs" });
    }
    match &config.routing.registry {
        RegistryConfig::Static { bindings } => {
            for binding in bindings.iter().filter(|b| b.connection_id.is_empty()) {
                errors.push(ValidationError::EmptyBinding(binding.host.clone()));
            }
        }
        RegistryConfig::Http { url } => {
            if Url::parse(url).is_err() {
                errors.push(ValidationError::InvalidUrl {
                    field: "routing.registry.url",
                    value: url.clone(),
                });
            }
        }
    }

    if Url::parse(&config.blob_store.location).is_err() {
        errors.push(ValidationError::InvalidUrl {
            field: "blob_store.location",
            value: config.blob_store.location.clone(),
        });
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::BindingConfig;

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(validate_config(&RelayConfig::default()), Ok(()));
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = RelayConfig::default();
        config.tunnel.response_timeout_ms = 0;
        config.channel.endpoint = "http://not-a-websocket".into();
        config.routing.cache_ttl_secs = 0;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.contains(&ValidationError::Zero { field: "tunnel.response_timeout_ms" }));
        assert!(errors.contains(&ValidationError::Zero { field: "routing.cache_ttl_secs" }));
    }

    #[test]
    fn test_chunk_size_bounded_by_inline_threshold() {
        let mut config = RelayConfig::default();
        config.tunnel.max_inline_body_bytes = 1024;
        config.tunnel.chunk_size_bytes = 4096;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![ValidationError::ChunkLargerThanInline { chunk: 4096, inline: 1024 }]
        );
    }

    #[test]
    fn test_empty_binding_rejected() {
        let mut config = RelayConfig::default();
        config.routing.registry = RegistryConfig::Static {
            bindings: vec![BindingConfig {
                host: "app.example.com".into(),
                connection_id: String::new(),
            }],
        };
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors, vec![ValidationError::EmptyBinding("app.example.com".into())]);
    }
}
