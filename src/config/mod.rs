//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → RelayConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//!
//! On file change (--watch):
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → tunnel settings swapped atomically (ArcSwap)
//! ```
//!
//! # Design Decisions
//! - Only `[tunnel]` thresholds and timeouts are hot-reloadable; the
//!   listener, channel endpoint, registry and blob store are fixed at startup
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use validation::{validate_config, ValidationError};
pub use watcher::ConfigWatcher;
pub use schema::{
    BindingConfig, BlobStoreConfig, ChannelConfig, ListenerConfig, LogFormat,
    ObservabilityConfig, RegistryConfig, RelayConfig, RoutingConfig, TunnelConfig,
};
