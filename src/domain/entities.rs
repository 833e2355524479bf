//! Domain entities mirrored from persistent storage.

use serde::Serialize;
use time::OffsetDateTime;

use crate::domain::types::{JobState, JobType};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserRecord {
    pub id: i64,
    pub email: String,
    pub name: String,
    /// Hex-encoded SHA-256 digest of salt + password. Never serialized to
    /// API responses; response models pick fields explicitly.
    pub password_hash: String,
    pub password_salt: String,
    pub signature_path: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileRecord {
    pub user_id: i64,
    pub bio: Option<String>,
    pub posts_count: i64,
    pub subscribers_count: i64,
    pub subscriptions_count: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// A user that owns a profile row, as listed for the counter sweep.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileOwner {
    pub user_id: i64,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRecord {
    pub id: String,
    pub job_type: JobType,
    pub payload: serde_json::Value,
    pub state: JobState,
    pub attempts: i32,
    pub max_attempts: i32,
    pub run_at: OffsetDateTime,
    pub lock_at: Option<OffsetDateTime>,
    pub lock_by: Option<String>,
    pub done_at: Option<OffsetDateTime>,
    pub last_error: Option<String>,
    pub priority: i32,
}

/// Retry bookkeeping for one render chain, keyed by the first job id the
/// caller was handed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetryCounterRecord {
    pub job_id: String,
    pub attempts: i32,
    pub replacement_job_id: Option<String>,
    pub updated_at: OffsetDateTime,
}
