use apalis::prelude::{Data, Error as ApalisError};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    application::pdf::paths,
    application::repos::{EnqueueOutcome, JobsRepo, RepoError, UsersRepo},
    domain::types::JobType,
};

use super::{
    context::{JobWorkerContext, job_failed},
    queue::enqueue_job,
};

/// The queue never retries renders on its own; re-submission is poll-driven
/// through the retry counter.
pub const RENDER_JOB_MAX_ATTEMPTS: i32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderPdfJobPayload {
    pub user_id: i64,
    /// First job id of the retry chain; `None` on the initial submission.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_job_id: Option<String>,
}

pub async fn enqueue_render_pdf_job<J>(
    repo: &J,
    user_id: i64,
    origin_job_id: Option<String>,
) -> Result<EnqueueOutcome, RepoError>
where
    J: JobsRepo + ?Sized,
{
    let payload = RenderPdfJobPayload {
        user_id,
        origin_job_id,
    };
    enqueue_job(
        repo,
        JobType::RenderPdf,
        &payload,
        None,
        RENDER_JOB_MAX_ATTEMPTS,
        0,
        Some(paths::pdf_relative_path(user_id)),
    )
    .await
}

#[derive(Debug, thiserror::Error)]
#[error("render exceeded the {seconds}s time limit")]
struct RenderTimeout {
    seconds: u64,
}

pub async fn process_render_pdf_job(
    payload: RenderPdfJobPayload,
    context: Data<JobWorkerContext>,
) -> Result<(), ApalisError> {
    let ctx = &*context;

    let work = async {
        let user = ctx
            .repositories
            .find_by_id(payload.user_id)
            .await
            .map_err(job_failed)?
            .ok_or_else(|| {
                job_failed(RepoError::from_persistence(format!(
                    "user `{}` not found for render",
                    payload.user_id
                )))
            })?;

        match tokio::time::timeout(ctx.soft_timeout, ctx.renderer.render_for_user(&user)).await {
            Ok(Ok(document)) => {
                info!(
                    target = "application::jobs::process_render_pdf_job",
                    user_id = user.id,
                    path = %document.relative_path,
                    "summary rendered"
                );
                Ok(())
            }
            Ok(Err(err)) => Err(job_failed(err)),
            Err(_) => Err(job_failed(RenderTimeout {
                seconds: ctx.soft_timeout.as_secs(),
            })),
        }
    };

    match tokio::time::timeout(ctx.hard_timeout, work).await {
        Ok(result) => result,
        Err(_) => Err(job_failed(RenderTimeout {
            seconds: ctx.hard_timeout.as_secs(),
        })),
    }
}
