//! Content verification for rendered summaries.
//!
//! A render only counts once the stored file parses, its first page mentions
//! the user's current name and email, and at least one image object is
//! embedded. Anything less sends the job back through the retry path.

use lopdf::{Document, Object};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("document could not be parsed: {0}")]
    Unparsable(String),
    #[error("first page text is missing the user's {field}")]
    MissingField { field: &'static str },
    #[error("document embeds no signature image")]
    MissingImage,
}

#[derive(Debug, Clone, Copy)]
pub struct DocumentExpectations<'a> {
    pub name: &'a str,
    pub email: &'a str,
}

pub fn verify_summary(bytes: &[u8], expected: &DocumentExpectations<'_>) -> Result<(), VerifyError> {
    let doc =
        Document::load_mem(bytes).map_err(|err| VerifyError::Unparsable(err.to_string()))?;
    let text = doc
        .extract_text(&[1])
        .map_err(|err| VerifyError::Unparsable(err.to_string()))?;

    if !text.contains(expected.name) {
        return Err(VerifyError::MissingField { field: "name" });
    }
    if !text.contains(expected.email) {
        return Err(VerifyError::MissingField { field: "email" });
    }
    if !has_embedded_image(&doc) {
        return Err(VerifyError::MissingImage);
    }
    Ok(())
}

fn has_embedded_image(doc: &Document) -> bool {
    doc.objects.values().any(|object| match object {
        Object::Stream(stream) => stream
            .dict
            .get(b"Subtype")
            .ok()
            .and_then(|subtype| subtype.as_name().ok())
            .is_some_and(|name| name == b"Image"),
        _ => false,
    })
}
