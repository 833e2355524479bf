use async_trait::async_trait;
use time::OffsetDateTime;

use crate::{
    application::repos::{RepoError, RetriesRepo},
    domain::entities::RetryCounterRecord,
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct RetryCounterRow {
    job_id: String,
    attempts: i32,
    replacement_job_id: Option<String>,
    updated_at: OffsetDateTime,
}

impl From<RetryCounterRow> for RetryCounterRecord {
    fn from(row: RetryCounterRow) -> Self {
        Self {
            job_id: row.job_id,
            attempts: row.attempts,
            replacement_job_id: row.replacement_job_id,
            updated_at: row.updated_at,
        }
    }
}

#[async_trait]
impl RetriesRepo for PostgresRepositories {
    async fn claim_attempt(&self, job_id: &str, cap: i32) -> Result<Option<i32>, RepoError> {
        // The guarded INSERT keeps a zero cap from ever granting the first
        // attempt, and the conflict branch stops incrementing at the cap.
        let row: Option<(i32,)> = sqlx::query_as(
            r#"
            INSERT INTO render_retries (job_id, attempts)
            SELECT $1, 1
             WHERE $2 > 0
            ON CONFLICT (job_id) DO UPDATE
               SET attempts = render_retries.attempts + 1,
                   updated_at = now()
             WHERE render_retries.attempts < $2
            RETURNING attempts
            "#,
        )
        .bind(job_id)
        .bind(cap)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(|(attempts,)| attempts))
    }

    async fn record_replacement(
        &self,
        job_id: &str,
        replacement_job_id: &str,
    ) -> Result<(), RepoError> {
        sqlx::query(
            r#"
            UPDATE render_retries
               SET replacement_job_id = $2,
                   updated_at = now()
             WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .bind(replacement_job_id)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn find_counter(&self, job_id: &str) -> Result<Option<RetryCounterRecord>, RepoError> {
        let row = sqlx::query_as::<_, RetryCounterRow>(
            r#"
            SELECT job_id, attempts, replacement_job_id, updated_at
              FROM render_retries
             WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(Into::into))
    }
}
