//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (Host header)
//!     → key.rs (normalize routing key)
//!     → cache.rs (TTL cache hit → ChannelRef)
//!     → on miss: registry.rs (external lookup, cache found refs)
//!     → Return: ChannelRef or absent (412 upstream)
//! ```
//!
//! # Design Decisions
//! - Cache is owned by the relay instance, never process-global
//! - Entries expire purely by age; disconnects are not propagated, so a
//!   stale entry resolves through the response timeout
//! - Absent lookups are not cached

pub mod cache;
pub mod key;
pub mod registry;

pub use cache::RoutingCache;
pub use key::routing_key;
pub use registry::{ChannelRef, ConnectionRegistry, HttpRegistry, RegistryError, StaticRegistry};
