//! Rendering, verification, and retry orchestration for user summaries.

pub mod paths;
pub mod renderer;
pub mod retry;
pub mod verifier;
pub mod workflow;

pub use renderer::{DocumentRenderer, RenderError, RenderedDocument};
pub use retry::{DEFAULT_MAX_RETRIES, RetryDecision, RetryPolicy};
pub use verifier::{DocumentExpectations, VerifyError, verify_summary};
pub use workflow::{CheckOutcome, PdfWorkflow, SubmitOutcome, WorkflowError};
