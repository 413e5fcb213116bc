//! # Cache Module
//!
//! Metadata cache for resolved tracks.
//!
//! Queuing the same video twice (or re-adding it after a `reset`) should not
//! spawn another yt-dlp lookup, so the YouTube resolver keeps resolved
//! [`TrackMetadata`] here, keyed by video ID.
//!
//! Entries expire after `METADATA_TTL` (e.g. `1h`) and the cache is bounded by
//! `CACHE_SIZE` entries; the oldest entry is evicted first.

pub mod ttl_cache;

use std::time::Duration;
use tracing::info;

use crate::sources::TrackMetadata;
use ttl_cache::TtlCache;

pub struct MetadataCache {
    entries: TtlCache<String, TrackMetadata>,
}

impl MetadataCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        info!("💾 Caché de metadata inicializado: {} entradas, TTL {:?}", capacity, ttl);
        Self {
            entries: TtlCache::new(capacity, ttl),
        }
    }

    pub fn get(&self, key: &str) -> Option<TrackMetadata> {
        self.entries.get(&key.to_string())
    }

    pub fn put(&self, key: String, metadata: TrackMetadata) {
        self.entries.insert(key, metadata);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Limpia entradas viejas
    pub fn cleanup_old_entries(&self) -> usize {
        self.entries.cleanup_expired()
    }
}
