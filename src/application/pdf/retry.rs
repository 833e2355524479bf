//! Bounded retry budget for render chains.

use crate::application::repos::{RepoError, RetriesRepo};

pub const DEFAULT_MAX_RETRIES: i32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { attempt: i32 },
    Exhausted { attempts: i32 },
}

/// Decides whether a failed render may be re-submitted. The budget is keyed
/// by the first job id of the chain, so replacements spend from the same
/// allowance as the job they replace.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    cap: i32,
}

impl RetryPolicy {
    pub fn new(cap: i32) -> Self {
        Self { cap: cap.max(0) }
    }

    pub fn cap(&self) -> i32 {
        self.cap
    }

    pub async fn evaluate(
        &self,
        retries: &dyn RetriesRepo,
        origin_job_id: &str,
    ) -> Result<RetryDecision, RepoError> {
        match retries.claim_attempt(origin_job_id, self.cap).await? {
            Some(attempt) => Ok(RetryDecision::Retry { attempt }),
            None => Ok(RetryDecision::Exhausted { attempts: self.cap }),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}
