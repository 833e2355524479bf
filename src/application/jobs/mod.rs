mod context;
mod queue;
mod render_pdf;
mod sync_profile_counters;

pub use context::{JobWorkerContext, job_failed};
pub use queue::enqueue_job;
pub use render_pdf::{
    RENDER_JOB_MAX_ATTEMPTS, RenderPdfJobPayload, enqueue_render_pdf_job, process_render_pdf_job,
};
pub use sync_profile_counters::{
    SyncProfileCountersContext, SyncProfileCountersJob, process_sync_profile_counters_job,
};
