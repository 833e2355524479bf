use std::convert::TryFrom;

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::{
    application::repos::{EnqueueOutcome, JobsRepo, NewJobRecord, RepoError},
    domain::{
        entities::JobRecord,
        types::{JobState, JobType},
    },
};

use super::{PostgresRepositories, map_sqlx_error};

/// States under which a queued job still counts for idempotent submission.
const ACTIVE_STATES: [&str; 3] = ["Pending", "Scheduled", "Running"];

#[derive(sqlx::FromRow)]
struct JobRow {
    id: String,
    job_type: String,
    job: serde_json::Value,
    status: String,
    attempts: i32,
    max_attempts: i32,
    run_at: OffsetDateTime,
    last_error: Option<String>,
    lock_at: Option<OffsetDateTime>,
    lock_by: Option<String>,
    done_at: Option<OffsetDateTime>,
    priority: Option<i32>,
}

impl TryFrom<JobRow> for JobRecord {
    type Error = RepoError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let job_type = JobType::try_from(row.job_type.as_str()).map_err(|_| {
            RepoError::from_persistence(format!("unknown job type `{}`", row.job_type))
        })?;

        let state = JobState::try_from(row.status.as_str()).map_err(|_| {
            RepoError::from_persistence(format!("unknown job state `{}`", row.status))
        })?;

        Ok(Self {
            id: row.id,
            job_type,
            payload: row.job,
            state,
            attempts: row.attempts,
            max_attempts: row.max_attempts,
            run_at: row.run_at,
            lock_at: row.lock_at,
            lock_by: row.lock_by,
            done_at: row.done_at,
            last_error: row.last_error,
            priority: row.priority.unwrap_or(0),
        })
    }
}

#[async_trait]
impl JobsRepo for PostgresRepositories {
    async fn enqueue_job(&self, job: NewJobRecord) -> Result<EnqueueOutcome, RepoError> {
        let NewJobRecord {
            job_type,
            mut payload,
            run_at,
            max_attempts,
            priority,
            idempotency_key,
        } = job;

        // The key rides inside the payload so the dedupe lookup needs no
        // extra table alongside the queue's own.
        if let (Some(key), Some(object)) = (idempotency_key.as_ref(), payload.as_object_mut()) {
            object.insert(
                "idempotency_key".to_string(),
                serde_json::Value::String(key.clone()),
            );
        }

        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        if let Some(key) = idempotency_key.as_deref() {
            // Serialize concurrent submissions carrying the same key for the
            // duration of this transaction.
            sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
                .bind(key)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;

            let existing: Option<(String,)> = sqlx::query_as(
                r#"
                SELECT id
                  FROM apalis.jobs
                 WHERE job_type = $1
                   AND job ->> 'idempotency_key' = $2
                   AND status = ANY($3)
                 ORDER BY run_at DESC
                 LIMIT 1
                "#,
            )
            .bind(job_type.as_str())
            .bind(key)
            .bind(&ACTIVE_STATES[..])
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

            if let Some((job_id,)) = existing {
                tx.commit().await.map_err(map_sqlx_error)?;
                return Ok(EnqueueOutcome::Deduplicated { job_id });
            }
        }

        let (job_id,): (String,) =
            sqlx::query_as("SELECT (apalis.push_job($1, $2::json, $3, $4, $5, $6)).id")
                .bind(job_type.as_str())
                .bind(&payload)
                .bind(JobState::Pending.as_str())
                .bind(run_at)
                .bind(max_attempts)
                .bind(priority)
                .fetch_one(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;

        Ok(EnqueueOutcome::Created { job_id })
    }

    async fn find_job(&self, id: &str) -> Result<Option<JobRecord>, RepoError> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT id,
                   job_type,
                   job,
                   status,
                   attempts,
                   max_attempts,
                   run_at,
                   last_error,
                   lock_at,
                   lock_by,
                   done_at,
                   priority
              FROM apalis.jobs
             WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        match row {
            Some(row) => JobRecord::try_from(row).map(Some),
            None => Ok(None),
        }
    }
}
