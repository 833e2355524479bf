//! Submission and polling for the render pipeline.
//!
//! Submission is fire-and-forget: the caller gets a job id back immediately
//! and learns the outcome by polling. A poll of a finished job re-reads the
//! stored file and verifies it against the user's current record, so edits
//! made after the render surface as a retry instead of a stale download.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::application::jobs::{RenderPdfJobPayload, enqueue_render_pdf_job};
use crate::application::pdf::paths;
use crate::application::pdf::retry::{RetryDecision, RetryPolicy};
use crate::application::pdf::verifier::{self, DocumentExpectations};
use crate::application::repos::{EnqueueOutcome, JobsRepo, RepoError, RetriesRepo, UsersRepo};
use crate::domain::entities::JobRecord;
use crate::domain::types::JobState;
use crate::infra::media::{MediaStorage, MediaStorageError};

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("user not found")]
    UserNotFound,
    #[error("job not found")]
    JobNotFound,
    #[error("job payload is malformed: {0}")]
    MalformedPayload(String),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Storage(#[from] MediaStorageError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// A fresh render job was queued.
    Enqueued { job_id: String },
    /// An equivalent job was already waiting or running.
    AlreadyQueued { job_id: String },
    /// The file already exists and no prior job id was supplied.
    FileReady { path: String },
    /// The file exists and the caller supplied its job id, so the submission
    /// was treated as a poll.
    StatusChecked(CheckOutcome),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    InProgress {
        state: JobState,
    },
    Completed {
        path: String,
    },
    /// The render failed or produced stale content; a replacement job was
    /// (or already had been) submitted. Poll the new id.
    Retrying {
        attempt: i32,
        new_job_id: String,
    },
    /// The retry budget for this chain is spent.
    Exhausted {
        attempts: i32,
        reason: String,
    },
}

#[derive(Clone)]
pub struct PdfWorkflow {
    users: Arc<dyn UsersRepo>,
    jobs: Arc<dyn JobsRepo>,
    retries: Arc<dyn RetriesRepo>,
    media: Arc<MediaStorage>,
    retry_policy: RetryPolicy,
}

impl PdfWorkflow {
    pub fn new(
        users: Arc<dyn UsersRepo>,
        jobs: Arc<dyn JobsRepo>,
        retries: Arc<dyn RetriesRepo>,
        media: Arc<MediaStorage>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            users,
            jobs,
            retries,
            media,
            retry_policy,
        }
    }

    pub async fn submit(
        &self,
        user_id: i64,
        prior_job_id: Option<&str>,
    ) -> Result<SubmitOutcome, WorkflowError> {
        let Some(user) = self.users.find_by_id(user_id).await? else {
            return Err(WorkflowError::UserNotFound);
        };

        let relative = paths::pdf_relative_path(user.id);
        if self.media.exists(&relative).await? {
            if let Some(job_id) = prior_job_id {
                return Ok(SubmitOutcome::StatusChecked(self.check(job_id).await?));
            }
            let path = self.media.absolute_path(&relative)?;
            return Ok(SubmitOutcome::FileReady {
                path: path.display().to_string(),
            });
        }

        match enqueue_render_pdf_job(self.jobs.as_ref(), user.id, None).await? {
            EnqueueOutcome::Created { job_id } => {
                info!(
                    target = "application::pdf::workflow",
                    user_id = user.id,
                    job_id = %job_id,
                    "render job submitted"
                );
                Ok(SubmitOutcome::Enqueued { job_id })
            }
            EnqueueOutcome::Deduplicated { job_id } => {
                Ok(SubmitOutcome::AlreadyQueued { job_id })
            }
        }
    }

    pub async fn check(&self, job_id: &str) -> Result<CheckOutcome, WorkflowError> {
        let Some(job) = self.jobs.find_job(job_id).await? else {
            return Err(WorkflowError::JobNotFound);
        };
        let payload: RenderPdfJobPayload = serde_json::from_value(job.payload.clone())
            .map_err(|err| WorkflowError::MalformedPayload(err.to_string()))?;

        match job.state {
            JobState::Pending | JobState::Scheduled | JobState::Running => {
                Ok(CheckOutcome::InProgress { state: job.state })
            }
            JobState::Done => self.confirm_output(&job, &payload).await,
            JobState::Failed | JobState::Killed => {
                let reason = job
                    .last_error
                    .clone()
                    .unwrap_or_else(|| format!("job {}", job.state.as_str().to_lowercase()));
                self.schedule_retry(&job, &payload, reason).await
            }
        }
    }

    /// The queue says the render finished; believe the filesystem and the
    /// current user record, not the job row.
    async fn confirm_output(
        &self,
        job: &JobRecord,
        payload: &RenderPdfJobPayload,
    ) -> Result<CheckOutcome, WorkflowError> {
        let Some(user) = self.users.find_by_id(payload.user_id).await? else {
            return Err(WorkflowError::UserNotFound);
        };

        let relative = paths::pdf_relative_path(user.id);
        let bytes = match self.media.read(&relative).await {
            Ok(bytes) => bytes,
            Err(MediaStorageError::NotFound { .. }) => {
                return self
                    .schedule_retry(job, payload, "rendered file missing".to_string())
                    .await;
            }
            Err(err) => return Err(err.into()),
        };

        let expected = DocumentExpectations {
            name: &user.name,
            email: &user.email,
        };
        match verifier::verify_summary(&bytes, &expected) {
            Ok(()) => Ok(CheckOutcome::Completed {
                path: self.media.absolute_path(&relative)?.display().to_string(),
            }),
            Err(err) => {
                warn!(
                    target = "application::pdf::workflow",
                    job_id = %job.id,
                    user_id = user.id,
                    error = %err,
                    "rendered summary failed verification"
                );
                self.schedule_retry(job, payload, err.to_string()).await
            }
        }
    }

    async fn schedule_retry(
        &self,
        job: &JobRecord,
        payload: &RenderPdfJobPayload,
        reason: String,
    ) -> Result<CheckOutcome, WorkflowError> {
        let origin = payload.origin_job_id.as_deref().unwrap_or(&job.id);

        // An earlier poll may already have submitted the replacement; hand
        // its id back instead of spending another attempt.
        if let Some(counter) = self.retries.find_counter(origin).await?
            && let Some(replacement) = counter.replacement_job_id.as_deref()
            && replacement != job.id
        {
            return Ok(CheckOutcome::Retrying {
                attempt: counter.attempts,
                new_job_id: replacement.to_string(),
            });
        }

        match self.retry_policy.evaluate(self.retries.as_ref(), origin).await? {
            RetryDecision::Retry { attempt } => {
                let outcome = enqueue_render_pdf_job(
                    self.jobs.as_ref(),
                    payload.user_id,
                    Some(origin.to_string()),
                )
                .await?;
                let new_job_id = outcome.into_job_id();
                self.retries.record_replacement(origin, &new_job_id).await?;
                info!(
                    target = "application::pdf::workflow",
                    failed_job_id = %job.id,
                    origin_job_id = origin,
                    attempt = attempt,
                    new_job_id = %new_job_id,
                    reason = %reason,
                    "render re-submitted"
                );
                Ok(CheckOutcome::Retrying { attempt, new_job_id })
            }
            RetryDecision::Exhausted { attempts } => {
                warn!(
                    target = "application::pdf::workflow",
                    failed_job_id = %job.id,
                    origin_job_id = origin,
                    attempts = attempts,
                    reason = %reason,
                    "render retry budget exhausted"
                );
                Ok(CheckOutcome::Exhausted { attempts, reason })
            }
        }
    }
}
