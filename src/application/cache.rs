//! Contract for the external counter cache.
//!
//! A collaborator system publishes social counters into a shared cache under
//! `profile_{email}`. Entries may be missing entirely or carry only a subset
//! of the fields; readers fall back to the persisted profile per field.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
    #[error("cache entry malformed: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CachedCounters {
    pub posts_count: Option<i64>,
    pub subscribers_count: Option<i64>,
    pub subscriptions_count: Option<i64>,
}

impl CachedCounters {
    pub fn is_empty(&self) -> bool {
        self.posts_count.is_none()
            && self.subscribers_count.is_none()
            && self.subscriptions_count.is_none()
    }
}

pub fn profile_cache_key(email: &str) -> String {
    format!("profile_{email}")
}

#[async_trait]
pub trait ProfileCache: Send + Sync {
    /// Counters published for `email`, or `None` when no entry exists.
    async fn counters_for(&self, email: &str) -> Result<Option<CachedCounters>, CacheError>;
}
