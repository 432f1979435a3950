//! Filesystem storage for images attached to posts.

use std::error::Error as StdError;
use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use futures::{StreamExt, pin_mut, stream};
use sha2::{Digest, Sha256};
use slug::slugify;
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum UploadStorageError {
    #[error("invalid stored path")]
    InvalidPath,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("uploaded file stream failed")]
    PayloadStream {
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
    #[error("uploaded file is empty")]
    EmptyPayload,
    #[error("uploaded file size exceeds supported range")]
    SizeOverflow,
}

impl UploadStorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io(err) if err.kind() == std::io::ErrorKind::NotFound)
    }
}

#[derive(Debug, Clone)]
pub struct StoredUpload {
    /// Path relative to the storage root, e.g. `posts/<uuid>-photo.png`.
    pub stored_path: String,
    pub checksum: String,
    pub size_bytes: u64,
}

#[derive(Debug)]
pub struct UploadStorage {
    root: PathBuf,
}

impl UploadStorage {
    /// Initialise storage rooted at the provided directory, creating it if necessary.
    pub fn new(root: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stream `stream` to a fresh file under `directory`. Partial files are removed on failure.
    pub async fn store_stream<S>(
        &self,
        directory: &str,
        original_name: &str,
        stream: S,
    ) -> Result<StoredUpload, UploadStorageError>
    where
        S: futures::Stream<Item = Result<Bytes, UploadStorageError>>,
    {
        let stored_path = build_stored_path(directory, original_name);
        let absolute = self.resolve(&stored_path)?;

        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(&absolute).await?;
        let mut hasher = Sha256::new();
        let mut total_bytes: u64 = 0;

        pin_mut!(stream);
        while let Some(chunk_result) = stream.next().await {
            let chunk = match chunk_result {
                Ok(chunk) => chunk,
                Err(err) => {
                    drop(file);
                    let _ = fs::remove_file(&absolute).await;
                    return Err(err);
                }
            };
            if chunk.is_empty() {
                continue;
            }

            total_bytes = total_bytes
                .checked_add(chunk.len() as u64)
                .ok_or(UploadStorageError::SizeOverflow)?;
            file.write_all(&chunk).await?;
            hasher.update(&chunk);
        }
        file.flush().await?;

        if total_bytes == 0 {
            drop(file);
            let _ = fs::remove_file(&absolute).await;
            return Err(UploadStorageError::EmptyPayload);
        }

        Ok(StoredUpload {
            stored_path,
            checksum: hex::encode(hasher.finalize()),
            size_bytes: total_bytes,
        })
    }

    pub async fn store(
        &self,
        directory: &str,
        original_name: &str,
        data: Bytes,
    ) -> Result<StoredUpload, UploadStorageError> {
        let stream = stream::once(async move { Ok::<_, UploadStorageError>(data) });
        self.store_stream(directory, original_name, stream).await
    }

    pub async fn read(&self, stored_path: &str) -> Result<Bytes, UploadStorageError> {
        let absolute = self.resolve(stored_path)?;
        let data = fs::read(absolute).await?;
        Ok(Bytes::from(data))
    }

    /// Remove the stored payload. Missing files are treated as success.
    pub async fn delete(&self, stored_path: &str) -> Result<(), UploadStorageError> {
        let absolute = self.resolve(stored_path)?;
        match fs::remove_file(&absolute).await {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(UploadStorageError::Io(err)),
        }
    }

    fn resolve(&self, stored_path: &str) -> Result<PathBuf, UploadStorageError> {
        let relative = Path::new(stored_path);
        if stored_path.is_empty()
            || relative.is_absolute()
            || relative.components().any(|component| {
                matches!(
                    component,
                    Component::ParentDir | Component::Prefix(_) | Component::RootDir
                )
            })
        {
            return Err(UploadStorageError::InvalidPath);
        }

        Ok(self.root.join(relative))
    }
}

fn build_stored_path(directory: &str, original_name: &str) -> String {
    let identifier = Uuid::new_v4().simple();
    let filename = sanitize_filename(original_name);
    let directory = directory.trim_matches('/');
    if directory.is_empty() {
        format!("{identifier}-{filename}")
    } else {
        format!("{directory}/{identifier}-{filename}")
    }
}

fn sanitize_filename(original: &str) -> String {
    let path = Path::new(original);
    let stem = path
        .file_stem()
        .and_then(|value| value.to_str())
        .unwrap_or("upload");
    let mut base = slugify(stem);
    if base.is_empty() {
        base = "upload".to_string();
    }

    let extension = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.trim_matches('.').to_ascii_lowercase())
        .filter(|value| !value.is_empty());

    match extension {
        Some(ext) => format!("{base}.{ext}"),
        None => base,
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn storage() -> (TempDir, UploadStorage) {
        let dir = TempDir::new().expect("tempdir");
        let storage = UploadStorage::new(dir.path().join("media")).expect("storage");
        (dir, storage)
    }

    #[tokio::test]
    async fn stored_bytes_read_back_identically() {
        let (_dir, storage) = storage();
        let payload = Bytes::from_static(b"\x89PNG not really");

        let stored = storage
            .store("posts", "Holiday Photo.PNG", payload.clone())
            .await
            .expect("stored");

        assert!(stored.stored_path.starts_with("posts/"));
        assert!(stored.stored_path.ends_with("-holiday-photo.png"));
        assert_eq!(stored.size_bytes, payload.len() as u64);
        assert_eq!(stored.checksum.len(), 64);
        assert_eq!(storage.read(&stored.stored_path).await.expect("read"), payload);
    }

    #[tokio::test]
    async fn empty_payload_leaves_no_file() {
        let (_dir, storage) = storage();
        let err = storage
            .store("posts", "empty.png", Bytes::new())
            .await
            .expect_err("empty");
        assert!(matches!(err, UploadStorageError::EmptyPayload));

        let mut entries = fs::read_dir(storage.root().join("posts"))
            .await
            .expect("posts dir");
        assert!(entries.next_entry().await.expect("read dir").is_none());
    }

    #[tokio::test]
    async fn traversal_paths_are_rejected() {
        let (_dir, storage) = storage();
        for path in ["../secret", "/etc/passwd", "posts/../../x", ""] {
            assert!(matches!(
                storage.read(path).await,
                Err(UploadStorageError::InvalidPath)
            ));
        }
    }

    #[tokio::test]
    async fn deleting_missing_file_succeeds() {
        let (_dir, storage) = storage();
        storage
            .delete("posts/never-existed.png")
            .await
            .expect("missing is fine");
    }

    #[test]
    fn filenames_are_slugified() {
        assert_eq!(sanitize_filename("My Cat!.JPG"), "my-cat.jpg");
        assert_eq!(sanitize_filename("???"), "upload");
        assert_eq!(sanitize_filename("noext"), "noext");
    }
}
