use axum::{
    body::Body,
    extract::{multipart::Field, multipart::MultipartError, Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use super::parse_id;
use crate::context::RequestContext;
use crate::error::{ApiResponse, AppError, Result};
use crate::models::{
    ContentPage, ContentRecord, ContentUrlQuery, ContentUrlResponse, ListContentQuery, Metadata,
    NewContent, UpdateContent, UpdateStatusRequest,
};
use crate::AppState;

/// Upload spooled to a temp file; the file is removed on drop
struct SpooledUpload {
    path: PathBuf,
    size: u64,
    file_name: Option<String>,
    content_type: Option<String>,
}

impl Drop for SpooledUpload {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove upload spool {}: {}", self.path.display(), e);
            }
        }
    }
}

fn multipart_error(e: MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge(e.body_text())
    } else {
        AppError::BadRequest(format!("Failed to process multipart: {}", e.body_text()))
    }
}

async fn spool_field(field: &mut Field<'_>, limit: u64) -> Result<SpooledUpload> {
    let mut upload = SpooledUpload {
        path: std::env::temp_dir().join(format!("simple_content_upload_{}", Uuid::new_v4())),
        size: 0,
        file_name: field.file_name().map(|s| s.to_string()),
        content_type: field
            .content_type()
            .map(|s| s.to_string())
            .filter(|s| !s.is_empty()),
    };

    let mut file = tokio::fs::File::create(&upload.path).await?;

    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        upload.size += chunk.len() as u64;
        if upload.size > limit {
            return Err(AppError::PayloadTooLarge(format!(
                "Upload exceeds the {} byte limit",
                limit
            )));
        }
        file.write_all(&chunk).await?;
    }

    file.flush().await?;
    Ok(upload)
}

async fn text_field(field: Field<'_>) -> Result<Option<String>> {
    let text = field.text().await.map_err(multipart_error)?;
    Ok(Some(text).filter(|t| !t.trim().is_empty()))
}

/// Upload new content
/// POST /api/v1/contents
pub async fn create_content(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse> {
    let mut upload: Option<SpooledUpload> = None;
    let mut name: Option<String> = None;
    let mut description: Option<String> = None;
    let mut metadata: Option<String> = None;
    let mut created_by: Option<String> = None;
    let mut source: Option<String> = None;

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        let field_name = field.name().unwrap_or("").to_string();

        match field_name.as_str() {
            "file" => {
                upload = Some(spool_field(&mut field, state.config.server.max_upload_bytes).await?);
            }
            "name" => name = text_field(field).await?,
            "description" => description = text_field(field).await?,
            "metadata" => metadata = text_field(field).await?,
            "created_by" => created_by = text_field(field).await?,
            "source" => source = text_field(field).await?,
            _ => {}
        }
    }

    let upload = upload.ok_or_else(|| AppError::BadRequest("No file provided".to_string()))?;
    let name = name
        .or_else(|| upload.file_name.clone())
        .ok_or_else(|| AppError::BadRequest("No file name provided".to_string()))?;
    let content_type = upload
        .content_type
        .clone()
        .unwrap_or_else(|| mime_guess::from_path(&name).first_or_octet_stream().to_string());
    let metadata = match metadata {
        Some(raw) => serde_json::from_str::<Metadata>(&raw)
            .map_err(|e| AppError::BadRequest(format!("Invalid metadata: {}", e)))?,
        None => Metadata::new(),
    };
    let size = i64::try_from(upload.size)
        .map_err(|_| AppError::PayloadTooLarge("Upload too large".to_string()))?;

    let input = NewContent {
        name,
        description: description.unwrap_or_default(),
        content_type,
        size,
        metadata,
        created_by: created_by.unwrap_or_default(),
        source: source.unwrap_or_default(),
    };

    let file = tokio::fs::File::open(&upload.path).await?;
    let record = state
        .service
        .create_content(&ctx, input, Box::new(file))
        .await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::success(record))))
}

/// List content
/// GET /api/v1/contents?page=1&page_size=20&content_type=...&metadata={...}
pub async fn list_contents(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<ListContentQuery>,
) -> Result<Json<ApiResponse<ContentPage>>> {
    let query = query.into_query().map_err(AppError::BadRequest)?;
    let page = state.service.list_content(&ctx, query).await?;
    Ok(Json(ApiResponse::success(page)))
}

/// GET /api/v1/contents/:id
pub async fn get_content(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<ContentRecord>>> {
    let record = state.service.get_content(&ctx, parse_id(&id)?).await?;
    Ok(Json(ApiResponse::success(record)))
}

/// Update name, description or metadata
/// PUT /api/v1/contents/:id
pub async fn update_content(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    Json(req): Json<UpdateContent>,
) -> Result<Json<ApiResponse<ContentRecord>>> {
    let record = state
        .service
        .update_content(&ctx, parse_id(&id)?, req)
        .await?;
    Ok(Json(ApiResponse::success(record)))
}

/// DELETE /api/v1/contents/:id
pub async fn delete_content(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    state.service.delete_content(&ctx, parse_id(&id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Stream content bytes
/// GET /api/v1/contents/:id/data
pub async fn download_content(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Result<Response> {
    let (reader, record) = state.service.get_content_data(&ctx, parse_id(&id)?).await?;

    let fallback_name: String = record
        .name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect();
    let encoded_name = urlencoding::encode(&record.name);

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, record.content_type.as_str())
        .header(header::CONTENT_LENGTH, record.size)
        .header(
            header::CONTENT_DISPOSITION,
            format!(
                "attachment; filename=\"{}\"; filename*=UTF-8''{}",
                fallback_name, encoded_name
            ),
        )
        .body(Body::from_stream(ReaderStream::new(reader)))
        .map_err(|e| AppError::Internal(format!("Failed to build response: {}", e)))?;

    Ok(response)
}

/// Signed download URL
/// GET /api/v1/contents/:id/url?expiry=3600
pub async fn get_content_url(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    Query(query): Query<ContentUrlQuery>,
) -> Result<Json<ApiResponse<ContentUrlResponse>>> {
    let expires_in = query
        .expiry
        .filter(|secs| *secs > 0)
        .unwrap_or(state.config.content.default_url_expiry_secs);

    let url = state
        .service
        .get_content_url(&ctx, parse_id(&id)?, Duration::from_secs(expires_in))
        .await?;

    Ok(Json(ApiResponse::success(ContentUrlResponse { url, expires_in })))
}

/// PUT /api/v1/contents/:id/status
pub async fn update_status(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<ApiResponse<ContentRecord>>> {
    let record = state
        .service
        .update_status(&ctx, parse_id(&id)?, req.status)
        .await?;
    Ok(Json(ApiResponse::success(record)))
}

/// Reconcile the declared content type with the stored bytes
/// POST /api/v1/contents/:id/finalize
pub async fn finalize_content(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<ContentRecord>>> {
    let record = state.service.finalize_content(&ctx, parse_id(&id)?).await?;
    Ok(Json(ApiResponse::success(record)))
}
