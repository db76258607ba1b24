//! Upload collaborator: validates declared kind, content type and size, then
//! stores the blob under a generated name and hands back its public URL.

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use mime::Mime;
use rand::{distributions::Alphanumeric, Rng};
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::config::UploadConfig;
use crate::models::message::{now_millis, AttachmentKind};

pub const IMAGE_TYPES: &[&str] = &["image/jpeg", "image/jpg", "image/png", "image/gif", "image/webp"];
pub const VIDEO_TYPES: &[&str] = &["video/mp4", "video/webm", "video/ogg", "video/quicktime"];

#[derive(Debug, Clone, Error)]
pub enum UploadError {
    #[error("invalid content type {0:?}")]
    InvalidType(String),

    #[error("{kind} too large (max {limit} bytes)")]
    TooLarge { kind: AttachmentKind, limit: u64 },

    #[error("no file provided")]
    MissingFile,

    #[error("malformed upload: {0}")]
    Multipart(String),

    #[error("blob store i/o error: {0}")]
    Io(String),
}

impl From<std::io::Error> for UploadError {
    fn from(e: std::io::Error) -> Self {
        UploadError::Io(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredBlob {
    pub url: String,
    pub stored_name: String,
    pub original_name: String,
    pub kind: AttachmentKind,
    pub size: u64,
}

pub struct BlobStore {
    dir: PathBuf,
    public_prefix: String,
    max_image_bytes: u64,
    max_video_bytes: u64,
}

impl BlobStore {
    pub fn new(config: &UploadConfig) -> Self {
        Self {
            dir: config.dir.clone(),
            public_prefix: config.public_prefix.clone(),
            max_image_bytes: config.max_image_bytes,
            max_video_bytes: config.max_video_bytes,
        }
    }

    pub fn limit_for(&self, kind: AttachmentKind) -> u64 {
        match kind {
            AttachmentKind::Image => self.max_image_bytes,
            AttachmentKind::Video => self.max_video_bytes,
        }
    }

    /// Check the declared content type against the allow-list of `kind`.
    pub fn validate_content_type(kind: AttachmentKind, content_type: &str) -> Result<(), UploadError> {
        let essence = content_type
            .parse::<Mime>()
            .map(|m| m.essence_str().to_ascii_lowercase())
            .map_err(|_| UploadError::InvalidType(content_type.to_string()))?;
        let allowed = match kind {
            AttachmentKind::Image => IMAGE_TYPES,
            AttachmentKind::Video => VIDEO_TYPES,
        };
        if allowed.contains(&essence.as_str()) {
            Ok(())
        } else {
            Err(UploadError::InvalidType(content_type.to_string()))
        }
    }

    /// Validate and write `chunks` to a freshly named file.
    ///
    /// The size ceiling is enforced while streaming; a partial file is
    /// removed when the limit is crossed or the stream fails.
    pub async fn store<S>(
        &self,
        kind: AttachmentKind,
        content_type: &str,
        original_name: &str,
        mut chunks: S,
    ) -> Result<StoredBlob, UploadError>
    where
        S: Stream<Item = Result<Bytes, UploadError>> + Unpin,
    {
        Self::validate_content_type(kind, content_type)?;
        let limit = self.limit_for(kind);

        fs::create_dir_all(&self.dir).await?;
        let stored_name = generate_name(original_name, content_type);
        let path = self.dir.join(&stored_name);
        let mut file = fs::File::create(&path).await?;

        let mut size: u64 = 0;
        let outcome: Result<(), UploadError> = async {
            while let Some(chunk) = chunks.next().await {
                let chunk = chunk?;
                size += chunk.len() as u64;
                if size > limit {
                    return Err(UploadError::TooLarge { kind, limit });
                }
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            Ok(())
        }
        .await;

        if let Err(e) = outcome {
            drop(file);
            if let Err(rm) = fs::remove_file(&path).await {
                warn!(error = %rm, path = %path.display(), "failed to remove partial upload");
            }
            return Err(e);
        }

        info!(%kind, size, name = %stored_name, "stored upload");
        Ok(StoredBlob {
            url: format!("{}/{}", self.public_prefix, stored_name),
            stored_name,
            original_name: original_name.to_string(),
            kind,
            size,
        })
    }

    /// Kind implied by a content type, for uploads that do not declare one.
    pub fn infer_kind(content_type: &str) -> Option<AttachmentKind> {
        let mime = content_type.parse::<Mime>().ok()?;
        match mime.type_() {
            mime::IMAGE => Some(AttachmentKind::Image),
            mime::VIDEO => Some(AttachmentKind::Video),
            _ => None,
        }
    }

    /// Delete a stored blob. Missing files are not an error.
    pub async fn remove(&self, name: &str) -> Result<(), UploadError> {
        if !is_valid_name(name) {
            return Ok(());
        }
        match fs::remove_file(self.dir.join(name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Read a stored blob back. Only names of the generated shape resolve.
    pub async fn open(&self, name: &str) -> Result<Option<(Vec<u8>, &'static str)>, UploadError> {
        if !is_valid_name(name) {
            debug!(name, "rejected blob name");
            return Ok(None);
        }
        match fs::read(self.dir.join(name)).await {
            Ok(bytes) => Ok(Some((bytes, content_type_for(name)))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn sanitize_extension(raw: &str) -> Option<String> {
    let ext: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(10)
        .collect::<String>()
        .to_ascii_lowercase();
    (!ext.is_empty()).then_some(ext)
}

fn generate_name(original_name: &str, content_type: &str) -> String {
    let ext = original_name
        .rsplit_once('.')
        .and_then(|(_, ext)| sanitize_extension(ext))
        .or_else(|| {
            content_type
                .parse::<Mime>()
                .ok()
                .and_then(|m| sanitize_extension(m.subtype().as_str()))
        })
        .unwrap_or_else(|| "bin".to_string());

    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(7)
        .map(|b| (b as char).to_ascii_lowercase())
        .collect();

    format!("{}-{}.{}", now_millis(), suffix, ext)
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && !name.starts_with('.')
        && !name.contains("..")
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
}

fn content_type_for(name: &str) -> &'static str {
    match name.rsplit_once('.').map(|(_, ext)| ext) {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("ogg") | Some("ogv") => "video/ogg",
        Some("mov") | Some("quicktime") => "video/quicktime",
        _ => "application/octet-stream",
    }
}
