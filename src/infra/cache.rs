//! Redis adapter for the shared profile counter cache.

use std::collections::HashMap;

use async_trait::async_trait;
use redis::AsyncCommands;

use crate::application::cache::{CacheError, CachedCounters, ProfileCache, profile_cache_key};
use crate::infra::error::InfraError;

/// Reads counter hashes published by the collaborator system. The client is
/// cheap to clone; connections are multiplexed on demand.
#[derive(Clone)]
pub struct RedisProfileCache {
    client: redis::Client,
}

impl RedisProfileCache {
    pub fn new(url: &str) -> Result<Self, InfraError> {
        let client = redis::Client::open(url).map_err(|err| InfraError::cache(err.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ProfileCache for RedisProfileCache {
    async fn counters_for(&self, email: &str) -> Result<Option<CachedCounters>, CacheError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|err| CacheError::Unavailable(err.to_string()))?;

        let key = profile_cache_key(email);
        let fields: HashMap<String, String> = conn
            .hgetall(&key)
            .await
            .map_err(|err| CacheError::Unavailable(err.to_string()))?;

        if fields.is_empty() {
            return Ok(None);
        }

        Ok(Some(CachedCounters {
            posts_count: parse_counter(&fields, &key, "posts_count")?,
            subscribers_count: parse_counter(&fields, &key, "subscribers_count")?,
            subscriptions_count: parse_counter(&fields, &key, "subscriptions_count")?,
        }))
    }
}

/// A missing field falls back to the persisted value; a present but
/// unparsable one is reported instead of silently dropped.
fn parse_counter(
    fields: &HashMap<String, String>,
    key: &str,
    field: &str,
) -> Result<Option<i64>, CacheError> {
    match fields.get(field) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<i64>().map(Some).map_err(|_| {
            CacheError::Malformed(format!("{key}.{field} is not an integer: `{raw}`"))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn missing_fields_parse_as_none() {
        let fields = fields(&[("posts_count", "3")]);

        assert_eq!(
            parse_counter(&fields, "profile_a@b.c", "posts_count").unwrap(),
            Some(3)
        );
        assert_eq!(
            parse_counter(&fields, "profile_a@b.c", "subscribers_count").unwrap(),
            None
        );
    }

    #[test]
    fn garbage_fields_are_reported() {
        let fields = fields(&[("posts_count", "lots")]);

        assert!(matches!(
            parse_counter(&fields, "profile_a@b.c", "posts_count"),
            Err(CacheError::Malformed(_))
        ));
    }
}
