use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::application::cache::{CachedCounters, ProfileCache};
use crate::application::repos::{ProfilesRepo, RepoError};

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("profile not found")]
    NotFound,
    #[error(transparent)]
    Repo(#[from] RepoError),
}

/// Profile as served to clients: the persisted row overlaid per field with
/// whatever counters the external cache currently holds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileView {
    pub bio: Option<String>,
    pub posts_count: i64,
    pub subscriber_count: i64,
    pub subscription_count: i64,
}

#[derive(Clone)]
pub struct ProfileService {
    profiles: Arc<dyn ProfilesRepo>,
    cache: Arc<dyn ProfileCache>,
}

impl ProfileService {
    pub fn new(profiles: Arc<dyn ProfilesRepo>, cache: Arc<dyn ProfileCache>) -> Self {
        Self { profiles, cache }
    }

    /// A cache outage degrades to persisted counters instead of failing the
    /// request.
    pub async fn view(&self, user_id: i64, email: &str) -> Result<ProfileView, ProfileError> {
        let Some(record) = self.profiles.find_profile(user_id).await? else {
            return Err(ProfileError::NotFound);
        };

        let cached = match self.cache.counters_for(email).await {
            Ok(counters) => counters.unwrap_or_default(),
            Err(err) => {
                warn!(
                    target = "application::profile",
                    email = email,
                    error = %err,
                    "counter cache read failed, serving persisted counters"
                );
                CachedCounters::default()
            }
        };

        Ok(ProfileView {
            bio: record.bio,
            posts_count: cached.posts_count.unwrap_or(record.posts_count),
            subscriber_count: cached.subscribers_count.unwrap_or(record.subscribers_count),
            subscription_count: cached
                .subscriptions_count
                .unwrap_or(record.subscriptions_count),
        })
    }
}
