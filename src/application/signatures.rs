//! Signature image intake.

use std::sync::Arc;

use bytes::Bytes;
use imagesize::ImageType;
use thiserror::Error;
use tracing::warn;

use crate::application::pdf::paths;
use crate::application::repos::{RepoError, UsersRepo};
use crate::domain::entities::UserRecord;
use crate::infra::media::{MediaStorage, MediaStorageError};

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("user not found")]
    UserNotFound,
    #[error("signature is not a readable image")]
    NotAnImage,
    #[error("unsupported signature format `{0}`")]
    UnsupportedFormat(String),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Storage(#[from] MediaStorageError),
}

#[derive(Debug, Clone, Copy)]
pub struct SignatureImage {
    pub extension: &'static str,
    pub width: usize,
    pub height: usize,
}

/// Sniff the uploaded bytes. Only formats the renderer can embed later are
/// admitted.
pub fn inspect_signature(data: &[u8]) -> Result<SignatureImage, SignatureError> {
    let kind = imagesize::image_type(data).map_err(|_| SignatureError::NotAnImage)?;
    let extension = match kind {
        ImageType::Png => "png",
        ImageType::Jpeg => "jpg",
        ImageType::Bmp => "bmp",
        ImageType::Gif => "gif",
        other => return Err(SignatureError::UnsupportedFormat(format!("{other:?}"))),
    };
    let size = imagesize::blob_size(data).map_err(|_| SignatureError::NotAnImage)?;
    Ok(SignatureImage {
        extension,
        width: size.width,
        height: size.height,
    })
}

#[derive(Clone)]
pub struct SignatureService {
    users: Arc<dyn UsersRepo>,
    media: Arc<MediaStorage>,
}

impl SignatureService {
    pub fn new(users: Arc<dyn UsersRepo>, media: Arc<MediaStorage>) -> Self {
        Self { users, media }
    }

    /// Store the image, point the user row at it, and drop any stale
    /// rendered PDF so the next render reflects the new signature. Failing
    /// to delete the PDF does not fail the upload.
    pub async fn update_signature(
        &self,
        user_id: i64,
        data: Bytes,
    ) -> Result<UserRecord, SignatureError> {
        let Some(user) = self.users.find_by_id(user_id).await? else {
            return Err(SignatureError::UserNotFound);
        };

        let image = inspect_signature(&data)?;
        let relative = paths::signature_relative_path(user_id, image.extension);
        self.media.persist_atomic(&relative, data).await?;

        if let Some(previous) = user.signature_path.as_deref()
            && previous != relative
            && let Err(err) = self.media.delete(previous).await
        {
            warn!(
                target = "application::signatures",
                user_id = user_id,
                path = previous,
                error = %err,
                "failed to delete previous signature file"
            );
        }

        let updated = self
            .users
            .update_signature_path(user_id, Some(relative))
            .await?;

        let pdf = paths::pdf_relative_path(user_id);
        if let Err(err) = self.media.delete(&pdf).await {
            warn!(
                target = "application::signatures",
                user_id = user_id,
                path = pdf,
                error = %err,
                "failed to delete stale rendered pdf"
            );
        }

        Ok(updated)
    }
}
