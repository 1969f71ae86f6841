use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::PipelineError;

pub const MAX_PHOTO_BYTES: u64 = 20 * 1024 * 1024;

/// On-disk preview staged for display (the object-URL analog). Must be
/// released exactly once when the photo is superseded or discarded; `release`
/// is idempotent and `Drop` is the backstop, so neither leaks nor
/// double-releases are possible through this type.
#[derive(Debug)]
pub struct DisplayHandle {
    path: PathBuf,
    released: bool,
}

impl DisplayHandle {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            released: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let _ = fs::remove_file(&self.path);
    }
}

impl Drop for DisplayHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// A client photo held for the active session only. Never persisted by the
/// pipeline; the preview handle is the one resource it owns.
#[derive(Debug)]
pub struct ClientPhoto {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub checksum: String,
    pub preview: DisplayHandle,
}

/// Turns a raw file into an in-memory [`ClientPhoto`], staging a preview copy
/// under the session scratch directory.
#[derive(Debug, Clone)]
pub struct PhotoIngestor {
    preview_dir: PathBuf,
}

impl PhotoIngestor {
    pub fn new(preview_dir: impl Into<PathBuf>) -> Self {
        Self {
            preview_dir: preview_dir.into(),
        }
    }

    /// The content type comes from the file's declared extension, never from
    /// sniffing the payload.
    pub fn ingest(&self, path: Option<&Path>) -> Result<ClientPhoto, PipelineError> {
        let path = path.ok_or(PipelineError::EmptyInput)?;
        let content_type = declared_content_type(path);
        let bytes =
            fs::read(path).map_err(|source| PipelineError::UnreadableFile { source })?;
        if bytes.is_empty() {
            return Err(PipelineError::EmptyInput);
        }
        if !content_type.starts_with("image/") {
            return Err(PipelineError::UnsupportedMediaType { content_type });
        }
        if bytes.len() as u64 > MAX_PHOTO_BYTES {
            return Err(PipelineError::PhotoTooLarge {
                bytes: bytes.len() as u64,
                limit: MAX_PHOTO_BYTES,
            });
        }

        let checksum = hex::encode(Sha256::digest(&bytes));
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("img");
        let preview_path = self.preview_dir.join(format!("{checksum}.{extension}"));
        fs::create_dir_all(&self.preview_dir)
            .and_then(|_| fs::write(&preview_path, &bytes))
            .map_err(|source| PipelineError::UnreadableFile { source })?;

        Ok(ClientPhoto {
            bytes,
            content_type,
            checksum,
            preview: DisplayHandle::new(preview_path),
        })
    }
}

fn declared_content_type(path: &Path) -> String {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "heic" => "image/heic",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        _ => "application/octet-stream",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ingestor(temp: &tempfile::TempDir) -> PhotoIngestor {
        PhotoIngestor::new(temp.path().join("previews"))
    }

    #[test]
    fn ingest_stages_a_preview_and_checksums_the_payload() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let photo_path = temp.path().join("client.jpg");
        fs::write(&photo_path, b"jpeg-bytes")?;

        let photo = ingestor(&temp).ingest(Some(&photo_path)).unwrap();
        assert_eq!(photo.content_type, "image/jpeg");
        assert_eq!(photo.bytes, b"jpeg-bytes");
        assert_eq!(photo.checksum.len(), 64);
        assert!(photo.preview.path().exists());
        Ok(())
    }

    #[test]
    fn missing_or_empty_input_is_empty_input() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let err = ingestor(&temp).ingest(None).unwrap_err();
        assert!(matches!(err, PipelineError::EmptyInput));

        let empty_path = temp.path().join("empty.png");
        fs::write(&empty_path, b"")?;
        let err = ingestor(&temp).ingest(Some(&empty_path)).unwrap_err();
        assert!(matches!(err, PipelineError::EmptyInput));
        Ok(())
    }

    #[test]
    fn unreadable_file_carries_the_io_error() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let err = ingestor(&temp)
            .ingest(Some(&temp.path().join("missing.png")))
            .unwrap_err();
        assert!(matches!(err, PipelineError::UnreadableFile { .. }));
        Ok(())
    }

    #[test]
    fn declared_type_is_taken_from_the_extension_not_the_payload() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("notes.txt");
        fs::write(&path, b"actually image bytes")?;
        let err = ingestor(&temp).ingest(Some(&path)).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::UnsupportedMediaType { ref content_type }
                if content_type == "application/octet-stream"
        ));
        Ok(())
    }

    #[test]
    fn release_is_idempotent_and_drop_is_the_backstop() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let photo_path = temp.path().join("client.png");
        fs::write(&photo_path, b"png-bytes")?;

        let mut photo = ingestor(&temp).ingest(Some(&photo_path)).unwrap();
        let preview_path = photo.preview.path().to_path_buf();
        assert!(preview_path.exists());

        photo.preview.release();
        assert!(!preview_path.exists());
        assert!(photo.preview.is_released());
        photo.preview.release();

        let photo = ingestor(&temp).ingest(Some(&photo_path)).unwrap();
        let preview_path = photo.preview.path().to_path_buf();
        drop(photo);
        assert!(!preview_path.exists());
        Ok(())
    }
}
