//! Time-bounded routing cache in front of the connection registry.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::observability::metrics;
use crate::routing::registry::{ChannelRef, ConnectionRegistry, RegistryError};

/// A cached registry hit.
#[derive(Debug, Clone)]
pub struct RoutingCacheEntry {
    pub channel_ref: ChannelRef,
    pub inserted_at: Instant,
}

impl RoutingCacheEntry {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.inserted_at.elapsed() < ttl
    }
}

/// A thread-safe, TTL-bounded cache of routing key → channel reference.
///
/// Entries are evicted purely by age. A backend that disconnects keeps its
/// entry until the TTL runs out.
#[derive(Clone)]
pub struct RoutingCache {
    registry: Arc<dyn ConnectionRegistry>,
    ttl: Duration,
    entries: Arc<DashMap<String, RoutingCacheEntry>>,
}

impl RoutingCache {
    /// Create a new empty cache.
    pub fn new(registry: Arc<dyn ConnectionRegistry>, ttl: Duration) -> Self {
        Self {
            registry,
            ttl,
            entries: Arc::new(DashMap::new()),
        }
    }

    /// Resolve a routing key, consulting the registry only on a miss.
    pub async fn lookup(&self, routing_key: &str) -> Result<Option<ChannelRef>, RegistryError> {
        let key = routing_key.to_ascii_lowercase();

        if let Some(entry) = self.entries.get(&key) {
            if entry.is_fresh(self.ttl) {
                metrics::record_routing_lookup("hit");
                return Ok(Some(entry.channel_ref.clone()));
            }
        }
        // Expired entries are dropped before asking again.
        self.entries.remove_if(&key, |_, entry| !entry.is_fresh(self.ttl));

        metrics::record_routing_lookup("miss");
        tracing::debug!(routing_key = %key, "Looking up backend client in registry");
        let found = self.registry.lookup(&key).await?;

        if let Some(channel_ref) = &found {
            self.entries.insert(
                key,
                RoutingCacheEntry {
                    channel_ref: channel_ref.clone(),
                    inserted_at: Instant::now(),
                },
            );
        }
        Ok(found)
    }

    /// Number of cached entries, fresh or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
