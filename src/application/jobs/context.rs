use std::{sync::Arc, time::Duration};

use apalis::prelude::Error as ApalisError;

use crate::{application::pdf::renderer::DocumentRenderer, infra::db::PostgresRepositories};

/// Shared context passed to job workers so they can access infrastructure capabilities.
#[derive(Clone)]
pub struct JobWorkerContext {
    pub repositories: Arc<PostgresRepositories>,
    pub renderer: Arc<DocumentRenderer>,
    /// Budget for one render before the attempt is abandoned gracefully.
    pub soft_timeout: Duration,
    /// Ceiling over the whole job body, lookups and persistence included.
    pub hard_timeout: Duration,
}

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Convert any error into an [`ApalisError::Failed`].
pub fn job_failed<E>(err: E) -> ApalisError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let boxed: BoxError = Box::new(err);
    ApalisError::Failed(Arc::new(boxed))
}
