//! Customer-flow copy (rental agreement, waiver text, pickup instructions)
//! lives in an external CMS. Lookups go through a read-through TTL cache
//! that serves stale copy when the provider is down: showing yesterday's
//! waiver text beats blocking a rental.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::warn;

use crate::observability;

#[derive(Debug, Clone)]
pub struct ContentError(pub String);

impl std::fmt::Display for ContentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "content provider error: {}", self.0)
    }
}

impl std::error::Error for ContentError {}

#[async_trait]
pub trait ContentProvider: Send + Sync {
    /// Fetch one document's copy by slug.
    async fn fetch(&self, slug: &str) -> Result<String, ContentError>;
}

struct CacheSlot {
    body: String,
    fetched_at: Instant,
}

/// Read-through cache over a [`ContentProvider`].
///
/// - Fresh slot: served as-is.
/// - Expired slot: refetched; on provider failure the stale copy is served.
/// - Cold miss with a failing provider: the configured fallback text.
pub struct ContentCache {
    provider: Arc<dyn ContentProvider>,
    ttl: Duration,
    slots: DashMap<String, CacheSlot>,
    fallback: String,
}

impl ContentCache {
    pub fn new(provider: Arc<dyn ContentProvider>, ttl: Duration, fallback: impl Into<String>) -> Self {
        Self {
            provider,
            ttl,
            slots: DashMap::new(),
            fallback: fallback.into(),
        }
    }

    /// Look up one document. Never fails: degraded answers are stale copy,
    /// then the fallback.
    pub async fn get(&self, slug: &str) -> String {
        if let Some(slot) = self.slots.get(slug)
            && slot.fetched_at.elapsed() < self.ttl
        {
            metrics::counter!(observability::CONTENT_CACHE_HITS_TOTAL).increment(1);
            return slot.body.clone();
        }

        metrics::counter!(observability::CONTENT_CACHE_REFRESHES_TOTAL).increment(1);
        match self.provider.fetch(slug).await {
            Ok(body) => {
                self.slots.insert(
                    slug.to_string(),
                    CacheSlot {
                        body: body.clone(),
                        fetched_at: Instant::now(),
                    },
                );
                body
            }
            Err(e) => {
                if let Some(slot) = self.slots.get(slug) {
                    warn!("content fetch for '{slug}' failed, serving stale copy: {e}");
                    metrics::counter!(observability::CONTENT_CACHE_STALE_SERVES_TOTAL).increment(1);
                    return slot.body.clone();
                }
                warn!("content fetch for '{slug}' failed with empty cache, serving fallback: {e}");
                metrics::counter!(observability::CONTENT_CACHE_FALLBACKS_TOTAL).increment(1);
                self.fallback.clone()
            }
        }
    }
}
