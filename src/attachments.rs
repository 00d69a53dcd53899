//! Image attachment loading
//!
//! Attachment references are file paths (optionally `file://` URLs). Relative
//! paths resolve against the configured attachment root.

use crate::state_machine::ImageData;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

/// Maximum image size (5MB)
const MAX_IMAGE_SIZE: u64 = 5 * 1024 * 1024;

/// Why an attachment reference could not be turned into an image
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AttachmentError {
    #[error("Attachment not found: {source_ref}")]
    NotFound { source_ref: String },
    #[error("Failed to read attachment {source_ref}: {message}")]
    Unreadable { source_ref: String, message: String },
    #[error("Attachment {source_ref} is too large ({size} bytes, max {max})")]
    TooLarge {
        source_ref: String,
        size: u64,
        max: u64,
    },
    #[error("Attachment {source_ref} is not a supported image type")]
    UnsupportedType { source_ref: String },
}

impl AttachmentError {
    pub fn source_ref(&self) -> &str {
        match self {
            Self::NotFound { source_ref }
            | Self::Unreadable { source_ref, .. }
            | Self::TooLarge { source_ref, .. }
            | Self::UnsupportedType { source_ref } => source_ref,
        }
    }

    fn from_io(source_ref: &str, err: &io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            Self::NotFound {
                source_ref: source_ref.to_string(),
            }
        } else {
            Self::Unreadable {
                source_ref: source_ref.to_string(),
                message: err.to_string(),
            }
        }
    }
}

/// Loads image attachments from the local filesystem
#[derive(Debug, Clone)]
pub struct FsImageResolver {
    root: PathBuf,
}

impl FsImageResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve_path(&self, source_ref: &str) -> PathBuf {
        let raw = source_ref.strip_prefix("file://").unwrap_or(source_ref);
        let path = Path::new(raw);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Read and encode one image
    pub async fn load(&self, source_ref: &str) -> Result<ImageData, AttachmentError> {
        let path = self.resolve_path(source_ref);

        let media_type = mime_guess::from_path(&path)
            .first()
            .filter(|mime| mime.type_() == mime_guess::mime::IMAGE)
            .ok_or_else(|| AttachmentError::UnsupportedType {
                source_ref: source_ref.to_string(),
            })?;

        let metadata = fs::metadata(&path)
            .await
            .map_err(|e| AttachmentError::from_io(source_ref, &e))?;
        if metadata.len() > MAX_IMAGE_SIZE {
            return Err(AttachmentError::TooLarge {
                source_ref: source_ref.to_string(),
                size: metadata.len(),
                max: MAX_IMAGE_SIZE,
            });
        }

        let bytes = fs::read(&path)
            .await
            .map_err(|e| AttachmentError::from_io(source_ref, &e))?;

        tracing::debug!(path = %path.display(), bytes = bytes.len(), "Loaded attachment");

        Ok(ImageData {
            media_type: media_type.essence_str().to_string(),
            data: BASE64.encode(bytes),
        })
    }
}
