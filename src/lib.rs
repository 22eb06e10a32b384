//! Reverse HTTP tunnel relay library.
//!
//! Public HTTP requests are forwarded over one long-lived duplex channel to
//! a private backend client and the correlated replies are delivered back,
//! inline, reassembled from chunks, or streamed from a blob store.

pub mod blob;
pub mod channel;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod routing;
pub mod tunnel;

pub use config::schema::RelayConfig;
pub use error::RelayError;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
