//! Filesystem-backed media storage for signatures and rendered summaries.

use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum MediaStorageError {
    #[error("invalid media path")]
    InvalidPath,
    #[error("media file `{path}` not found")]
    NotFound { path: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// All paths handed to this type are relative to the media root; absolute
/// paths and parent components are rejected before touching the disk.
#[derive(Debug)]
pub struct MediaStorage {
    root: PathBuf,
}

impl MediaStorage {
    /// Initialise storage rooted at the provided directory, creating it if necessary.
    pub fn new(root: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Write the payload to a staging file beside its destination, then
    /// rename it into place. Readers never observe a partial file.
    pub async fn persist_atomic(
        &self,
        relative: &str,
        data: impl Into<Bytes>,
    ) -> Result<PathBuf, MediaStorageError> {
        let absolute = self.resolve(relative)?;
        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent).await?;
        }

        let staging = absolute.with_extension(format!("tmp-{}", Uuid::new_v4().simple()));
        let data = data.into();

        let mut file = fs::File::create(&staging).await?;
        file.write_all(&data).await?;
        file.flush().await?;
        drop(file);

        match fs::rename(&staging, &absolute).await {
            Ok(()) => Ok(absolute),
            Err(err) => {
                let _ = fs::remove_file(&staging).await;
                Err(err.into())
            }
        }
    }

    /// Read the stored payload into memory.
    pub async fn read(&self, relative: &str) -> Result<Bytes, MediaStorageError> {
        let absolute = self.resolve(relative)?;
        match fs::read(&absolute).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(MediaStorageError::NotFound {
                    path: relative.to_string(),
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn exists(&self, relative: &str) -> Result<bool, MediaStorageError> {
        let absolute = self.resolve(relative)?;
        Ok(fs::try_exists(&absolute).await?)
    }

    /// Remove the stored payload. Missing files are treated as success.
    pub async fn delete(&self, relative: &str) -> Result<(), MediaStorageError> {
        let absolute = self.resolve(relative)?;
        match fs::remove_file(&absolute).await {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(MediaStorageError::Io(err)),
        }
    }

    /// Obtain the absolute filesystem path for a stored file.
    pub fn absolute_path(&self, relative: &str) -> Result<PathBuf, MediaStorageError> {
        self.resolve(relative)
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf, MediaStorageError> {
        let path = Path::new(relative);
        if path.is_absolute()
            || path
                .components()
                .any(|component| matches!(component, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(MediaStorageError::InvalidPath);
        }

        Ok(self.root.join(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> (tempfile::TempDir, MediaStorage) {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = MediaStorage::new(dir.path().to_path_buf()).expect("storage");
        (dir, storage)
    }

    #[tokio::test]
    async fn persisted_payloads_round_trip() {
        let (_dir, storage) = storage();

        storage
            .persist_atomic("pdfs/user_7.pdf", Bytes::from_static(b"%PDF-1.5"))
            .await
            .expect("persist");

        assert!(storage.exists("pdfs/user_7.pdf").await.expect("exists"));
        let data = storage.read("pdfs/user_7.pdf").await.expect("read");
        assert_eq!(&data[..], b"%PDF-1.5");
    }

    #[tokio::test]
    async fn persist_overwrites_previous_content() {
        let (_dir, storage) = storage();

        storage
            .persist_atomic("pdfs/user_7.pdf", Bytes::from_static(b"old"))
            .await
            .expect("persist old");
        storage
            .persist_atomic("pdfs/user_7.pdf", Bytes::from_static(b"new"))
            .await
            .expect("persist new");

        let data = storage.read("pdfs/user_7.pdf").await.expect("read");
        assert_eq!(&data[..], b"new");
    }

    #[tokio::test]
    async fn delete_tolerates_missing_files() {
        let (_dir, storage) = storage();
        storage.delete("pdfs/user_7.pdf").await.expect("no-op delete");
    }

    #[tokio::test]
    async fn traversal_paths_are_rejected() {
        let (_dir, storage) = storage();

        assert!(matches!(
            storage.read("../outside").await,
            Err(MediaStorageError::InvalidPath)
        ));
        assert!(matches!(
            storage.read("/etc/passwd").await,
            Err(MediaStorageError::InvalidPath)
        ));
    }

    #[tokio::test]
    async fn missing_files_read_as_not_found() {
        let (_dir, storage) = storage();

        assert!(matches!(
            storage.read("pdfs/user_9.pdf").await,
            Err(MediaStorageError::NotFound { .. })
        ));
    }
}
