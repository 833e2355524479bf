//! Deterministic media-relative paths.
//!
//! The rendered summary lives at exactly one path per user, so re-renders
//! overwrite rather than accumulate and the path itself can act as the
//! enqueue idempotency key.

pub const PDF_DIR: &str = "pdfs";
pub const SIGNATURE_DIR: &str = "signatures";

pub fn pdf_relative_path(user_id: i64) -> String {
    format!("{PDF_DIR}/user_{user_id}.pdf")
}

pub fn signature_relative_path(user_id: i64, extension: &str) -> String {
    format!("{SIGNATURE_DIR}/user_{user_id}.{extension}")
}
