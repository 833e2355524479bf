//! Composition of the per-user summary document.
//!
//! One A4 page: title, generation date, the user's name and email, and the
//! uploaded signature image scaled into a fixed box near the foot of the
//! page. Output is written next to its final path and atomically renamed in,
//! so a concurrent download never observes a half-written file.

use std::path::PathBuf;
use std::sync::Arc;

use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, Stream, dictionary, xobject};
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::FormatItem;
use time::macros::format_description;

use crate::application::pdf::paths;
use crate::domain::entities::UserRecord;
use crate::infra::media::{MediaStorage, MediaStorageError};

pub const SUMMARY_TITLE: &str = "User Summary";

/// Signature bounding box in PDF points, anchored at `SIGNATURE_ORIGIN`.
pub const SIGNATURE_BOX: (f32, f32) = (180.0, 80.0);
const SIGNATURE_ORIGIN: (f32, f32) = (50.0, 540.0);

const PAGE_SIZE: (i64, i64) = (595, 842);
const DATE_FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("user has no signature on file")]
    MissingSignature,
    #[error("signature image could not be used: {0}")]
    SignatureUnreadable(String),
    #[error("pdf composition failed: {0}")]
    Compose(String),
    #[error(transparent)]
    Storage(#[from] MediaStorageError),
}

#[derive(Debug, Clone)]
pub struct RenderedDocument {
    pub relative_path: String,
    pub absolute_path: PathBuf,
}

#[derive(Clone)]
pub struct DocumentRenderer {
    media: Arc<MediaStorage>,
}

impl DocumentRenderer {
    pub fn new(media: Arc<MediaStorage>) -> Self {
        Self { media }
    }

    /// Render the summary for `user` and move it into place at the
    /// deterministic per-user path.
    pub async fn render_for_user(&self, user: &UserRecord) -> Result<RenderedDocument, RenderError> {
        let signature_path = user
            .signature_path
            .as_deref()
            .ok_or(RenderError::MissingSignature)?;
        let signature = self
            .media
            .read(signature_path)
            .await
            .map_err(|err| RenderError::SignatureUnreadable(err.to_string()))?;

        let generated_on = OffsetDateTime::now_utc();
        let bytes = compose_summary(&user.name, &user.email, generated_on, &signature)?;

        let relative = paths::pdf_relative_path(user.id);
        self.media.persist_atomic(&relative, bytes).await?;

        Ok(RenderedDocument {
            absolute_path: self.media.absolute_path(&relative)?,
            relative_path: relative,
        })
    }
}

/// Build the document in memory. Pure apart from the clock passed in.
pub fn compose_summary(
    name: &str,
    email: &str,
    generated_on: OffsetDateTime,
    signature: &[u8],
) -> Result<Vec<u8>, RenderError> {
    let compose = |err: &dyn std::fmt::Display| RenderError::Compose(err.to_string());

    let signature_size = imagesize::blob_size(signature)
        .map_err(|err| RenderError::SignatureUnreadable(err.to_string()))?;
    let image = xobject::image_from(signature.to_vec())
        .map_err(|err| RenderError::SignatureUnreadable(err.to_string()))?;

    let date = generated_on
        .date()
        .format(DATE_FORMAT)
        .map_err(|err| compose(&err))?;

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let title_font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica-Bold",
        "Encoding" => "WinAnsiEncoding",
    });
    let body_font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let image_id = doc.add_object(image);

    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => title_font_id,
            "F2" => body_font_id,
        },
        "XObject" => dictionary! {
            "Sig" => image_id,
        },
    });

    let (width, height) = fit_signature(signature_size.width, signature_size.height);
    let mut operations = vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec!["F1".into(), 24.into()]),
        Operation::new("Td", vec![50.into(), 780.into()]),
        Operation::new("Tj", vec![Object::string_literal(SUMMARY_TITLE)]),
        Operation::new("ET", vec![]),
    ];
    for (size, y, text) in [
        (11, 750, format!("Generated: {date}")),
        (14, 710, format!("Name: {name}")),
        (14, 685, format!("Email: {email}")),
        (12, 640, "Signature:".to_string()),
    ] {
        operations.extend([
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F2".into(), size.into()]),
            Operation::new("Td", vec![50.into(), y.into()]),
            Operation::new("Tj", vec![Object::string_literal(text)]),
            Operation::new("ET", vec![]),
        ]);
    }
    operations.extend([
        Operation::new("q", vec![]),
        Operation::new(
            "cm",
            vec![
                Object::Real(width),
                0.into(),
                0.into(),
                Object::Real(height),
                Object::Real(SIGNATURE_ORIGIN.0),
                Object::Real(SIGNATURE_ORIGIN.1),
            ],
        ),
        Operation::new("Do", vec!["Sig".into()]),
        Operation::new("Q", vec![]),
    ]);

    let content = Content { operations };
    let content_id = doc.add_object(Stream::new(
        dictionary! {},
        content.encode().map_err(|err| compose(&err))?,
    ));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), PAGE_SIZE.0.into(), PAGE_SIZE.1.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).map_err(|err| compose(&err))?;
    Ok(bytes)
}

/// Scale the image to fill the signature box without distorting it.
fn fit_signature(width: usize, height: usize) -> (f32, f32) {
    if width == 0 || height == 0 {
        return SIGNATURE_BOX;
    }
    let scale = (SIGNATURE_BOX.0 / width as f32).min(SIGNATURE_BOX.1 / height as f32);
    (width as f32 * scale, height as f32 * scale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn tiny_bmp() -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(b"BM");
        data.extend_from_slice(&70u32.to_le_bytes());
        data.extend_from_slice(&[0, 0, 0, 0]);
        data.extend_from_slice(&54u32.to_le_bytes());
        data.extend_from_slice(&40u32.to_le_bytes());
        data.extend_from_slice(&2i32.to_le_bytes());
        data.extend_from_slice(&2i32.to_le_bytes());
        data.extend_from_slice(&1u16.to_le_bytes());
        data.extend_from_slice(&24u16.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&16u32.to_le_bytes());
        data.extend_from_slice(&[0; 16]);
        data.extend_from_slice(&[0x20; 16]);
        data
    }

    #[test]
    fn composed_summary_carries_user_fields_on_first_page() {
        let bytes = compose_summary(
            "Ann",
            "ann@example.com",
            datetime!(2026-08-25 12:00 UTC),
            &tiny_bmp(),
        )
        .expect("compose");

        let doc = Document::load_mem(&bytes).expect("parse");
        let text = doc.extract_text(&[1]).expect("text");
        assert!(text.contains(SUMMARY_TITLE));
        assert!(text.contains("Ann"));
        assert!(text.contains("ann@example.com"));
        assert!(text.contains("2026-08-25"));
    }

    #[test]
    fn composed_summary_embeds_the_signature_image() {
        let bytes = compose_summary(
            "Ann",
            "ann@example.com",
            datetime!(2026-08-25 12:00 UTC),
            &tiny_bmp(),
        )
        .expect("compose");

        let doc = Document::load_mem(&bytes).expect("parse");
        let images = doc
            .objects
            .values()
            .filter(|object| match object {
                Object::Stream(stream) => stream
                    .dict
                    .get(b"Subtype")
                    .ok()
                    .and_then(|subtype| subtype.as_name().ok())
                    .is_some_and(|name| name == b"Image"),
                _ => false,
            })
            .count();
        assert_eq!(images, 1);
    }

    #[test]
    fn missing_signature_bytes_fail_composition() {
        let err = compose_summary(
            "Ann",
            "ann@example.com",
            datetime!(2026-08-25 12:00 UTC),
            b"not an image",
        )
        .expect_err("should fail");
        assert!(matches!(err, RenderError::SignatureUnreadable(_)));
    }

    #[test]
    fn fit_signature_preserves_aspect_ratio_inside_the_box() {
        let (w, h) = fit_signature(360, 80);
        assert!((w - 180.0).abs() < f32::EPSILON);
        assert!((h - 40.0).abs() < f32::EPSILON);

        let (w, h) = fit_signature(90, 80);
        assert!((h - 80.0).abs() < f32::EPSILON);
        assert!((w - 90.0).abs() < f32::EPSILON);
    }
}
