use actix_multipart::{Field, Multipart};
use actix_web::{get, post, web, HttpResponse};
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};
use crate::models::message::AttachmentKind;
use crate::services::blob_store::{BlobStore, StoredBlob, UploadError};
use crate::state::AppState;

const MAX_TEXT_FIELD_BYTES: usize = 64;

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    #[serde(rename = "fileType")]
    pub file_type: Option<String>,
}

fn parse_kind(raw: &str) -> Result<AttachmentKind, UploadError> {
    raw.parse::<AttachmentKind>()
        .map_err(|_| UploadError::InvalidType(raw.to_string()))
}

async fn read_text_field(field: &mut Field) -> Result<String, UploadError> {
    let mut buf = Vec::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(|e| UploadError::Multipart(e.to_string()))?;
        buf.extend_from_slice(&chunk);
        if buf.len() > MAX_TEXT_FIELD_BYTES {
            return Err(UploadError::Multipart("form field too long".into()));
        }
    }
    String::from_utf8(buf).map_err(|_| UploadError::Multipart("form field is not utf-8".into()))
}

async fn drain(field: &mut Field) -> Result<(), UploadError> {
    while let Some(chunk) = field.next().await {
        chunk.map_err(|e| UploadError::Multipart(e.to_string()))?;
    }
    Ok(())
}

/// Accept one image or video and return its public URL.
///
/// The kind comes from the `fileType` query parameter or form field; when
/// the form field follows the file, the stored blob is checked against it
/// afterwards. Without either, the kind is inferred from the file's content
/// type.
#[post("/api/upload")]
pub async fn upload_file(
    state: web::Data<AppState>,
    query: web::Query<UploadQuery>,
    mut payload: Multipart,
) -> AppResult<HttpResponse> {
    let mut declared = query.file_type.as_deref().map(parse_kind).transpose()?;
    let mut stored: Option<StoredBlob> = None;

    while let Some(item) = payload.next().await {
        let mut field = item.map_err(|e| UploadError::Multipart(e.to_string()))?;
        let name = field.name().unwrap_or_default().to_string();

        match name.as_str() {
            "fileType" => {
                let kind = parse_kind(read_text_field(&mut field).await?.trim())?;
                if let Some(blob) = &stored {
                    if blob.kind != kind {
                        state.blobs.remove(&blob.stored_name).await?;
                        return Err(UploadError::InvalidType(format!(
                            "{} declared as {kind}",
                            blob.kind
                        ))
                        .into());
                    }
                }
                declared = Some(kind);
            }
            "file" if stored.is_none() => {
                let content_type = field
                    .content_type()
                    .map(|m| m.to_string())
                    .unwrap_or_default();
                let original_name = field
                    .content_disposition()
                    .and_then(|cd| cd.get_filename())
                    .unwrap_or("upload")
                    .to_string();
                let kind = declared
                    .or_else(|| BlobStore::infer_kind(&content_type))
                    .ok_or_else(|| UploadError::InvalidType(content_type.clone()))?;

                let chunks = Box::pin(field.map(|c| c.map_err(|e| UploadError::Multipart(e.to_string()))));
                let blob = state
                    .blobs
                    .store(kind, &content_type, &original_name, chunks)
                    .await
                    .map_err(|e| {
                        warn!(error = %e, %kind, content_type = %content_type, "upload rejected");
                        e
                    })?;
                stored = Some(blob);
            }
            other => {
                debug!(field = other, "ignoring multipart field");
                drain(&mut field).await?;
            }
        }
    }

    let blob = stored.ok_or(UploadError::MissingFile)?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "fileUrl": blob.url,
        "fileName": blob.original_name,
        "fileType": blob.kind,
        "fileSize": blob.size,
    })))
}

#[get("/uploads/{name}")]
pub async fn get_upload(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let name = path.into_inner();
    match state.blobs.open(&name).await? {
        Some((bytes, content_type)) => Ok(HttpResponse::Ok().content_type(content_type).body(bytes)),
        None => Err(AppError::NotFound),
    }
}
