//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;

use crate::application::cache::CachedCounters;
use crate::domain::entities::{
    JobRecord, ProfileOwner, ProfileRecord, RetryCounterRecord, UserRecord,
};
use crate::domain::types::JobType;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct CreateUserParams {
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub password_salt: String,
    pub bio: Option<String>,
}

#[async_trait]
pub trait UsersRepo: Send + Sync {
    /// Insert the user row and its empty profile row in one transaction.
    async fn create_user_with_profile(
        &self,
        params: CreateUserParams,
    ) -> Result<UserRecord, RepoError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, RepoError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<UserRecord>, RepoError>;

    async fn update_signature_path(
        &self,
        id: i64,
        signature_path: Option<String>,
    ) -> Result<UserRecord, RepoError>;
}

#[async_trait]
pub trait ProfilesRepo: Send + Sync {
    async fn find_profile(&self, user_id: i64) -> Result<Option<ProfileRecord>, RepoError>;

    /// Users with a profile row, in id order. Drives the counter sweep.
    async fn list_owners(&self) -> Result<Vec<ProfileOwner>, RepoError>;

    /// Overwrite whichever counters the cache supplied, leaving the rest
    /// untouched.
    async fn apply_counters(
        &self,
        user_id: i64,
        counters: &CachedCounters,
    ) -> Result<(), RepoError>;
}

#[derive(Debug, Clone)]
pub struct NewJobRecord {
    pub job_type: JobType,
    pub payload: serde_json::Value,
    pub run_at: OffsetDateTime,
    pub max_attempts: i32,
    pub priority: i32,
    /// When set, an already queued or running job of the same type carrying
    /// the same key is returned instead of pushing a second one.
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Created { job_id: String },
    Deduplicated { job_id: String },
}

impl EnqueueOutcome {
    pub fn job_id(&self) -> &str {
        match self {
            EnqueueOutcome::Created { job_id } | EnqueueOutcome::Deduplicated { job_id } => job_id,
        }
    }

    pub fn into_job_id(self) -> String {
        match self {
            EnqueueOutcome::Created { job_id } | EnqueueOutcome::Deduplicated { job_id } => job_id,
        }
    }
}

#[async_trait]
pub trait JobsRepo: Send + Sync {
    async fn enqueue_job(&self, job: NewJobRecord) -> Result<EnqueueOutcome, RepoError>;

    async fn find_job(&self, id: &str) -> Result<Option<JobRecord>, RepoError>;
}

#[async_trait]
pub trait RetriesRepo: Send + Sync {
    /// Atomically take one retry attempt for the chain rooted at `job_id`.
    ///
    /// Returns the attempt number just claimed (1-based), or `None` once
    /// `cap` attempts have been spent. The stored counter never exceeds
    /// `cap`.
    async fn claim_attempt(&self, job_id: &str, cap: i32) -> Result<Option<i32>, RepoError>;

    async fn record_replacement(
        &self,
        job_id: &str,
        replacement_job_id: &str,
    ) -> Result<(), RepoError>;

    async fn find_counter(&self, job_id: &str) -> Result<Option<RetryCounterRecord>, RepoError>;
}
