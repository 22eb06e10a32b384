//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! ChannelManager::acquire() fails to connect
//!     → backoff.rs (exponential delay with jitter)
//!     → next connect attempt, up to channel.connect_attempts
//! ```
//!
//! # Design Decisions
//! - Only channel establishment is retried; tunneled requests never are
//! - Jittered backoff prevents a reconnect stampede against the hub

pub mod backoff;

pub use backoff::ReconnectBackoff;
