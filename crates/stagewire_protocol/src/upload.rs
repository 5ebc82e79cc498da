// SPDX-License-Identifier: MIT OR Apache-2.0
//! Asset uploads.
//!
//! Uploaded files land in `<base>/uploads/<fileName>`. The file name is used
//! verbatim: it is not sanitized, so a name containing `..` or a path
//! separator can escape the uploads directory. Only expose uploads to
//! trusted clients.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Upload failures
#[derive(Debug, Error)]
pub enum UploadError {
    /// A required payload field is absent
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    /// `content` is not valid base64
    #[error("content is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),
    /// Writing the file failed
    #[error("failed to store upload: {0}")]
    Io(#[from] std::io::Error),
}

impl UploadError {
    /// Stable machine-readable code sent in error replies
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingField(_) => "missingField",
            Self::Decode(_) => "invalidContent",
            Self::Io(_) => "io",
        }
    }
}

/// Decode base64 `content` and write it to `<base>/uploads/<file_name>`
pub fn store_upload(base: &Path, file_name: &str, content: &str) -> Result<PathBuf, UploadError> {
    let bytes = STANDARD.decode(content)?;
    let dir = base.join("uploads");
    std::fs::create_dir_all(&dir)?;

    let path = dir.join(file_name);
    std::fs::write(&path, &bytes)?;
    tracing::info!(path = %path.display(), bytes = bytes.len(), "Stored upload");
    Ok(path)
}
