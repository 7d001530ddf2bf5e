use crate::{auth, models, storage, AppError, AppState, Result};
use axum::{
    body::Body,
    extract::{Multipart, Path, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::io::ReaderStream;

struct Upload {
    original_name: String,
    content_type: String,
    data: Vec<u8>,
}

async fn read_file_field(mut multipart: Multipart) -> Result<Upload> {
    while let Some(field) = multipart.next_field().await.map_err(|e| {
        tracing::error!("Failed to read multipart field: {}", e);
        AppError::BadRequest(format!("Failed to read form field: {}", e))
    })? {
        if field.name() != Some("file") {
            continue;
        }

        let original_name = field.file_name().unwrap_or("upload").to_string();
        let content_type = field
            .content_type()
            .map(str::to_string)
            .unwrap_or_else(|| {
                mime_guess::from_path(&original_name)
                    .first_or_octet_stream()
                    .to_string()
            });
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(format!("Failed to read file: {}", e)))?
            .to_vec();

        return Ok(Upload {
            original_name,
            content_type,
            data,
        });
    }

    Err(AppError::BadRequest("No file uploaded".to_string()))
}

pub async fn list(State(state): State<Arc<AppState>>) -> Result<Json<Vec<models::Media>>> {
    let media: Vec<models::Media> =
        sqlx::query_as("SELECT * FROM media ORDER BY created_at DESC, id DESC LIMIT 100")
            .fetch_all(&state.db)
            .await?;

    Ok(Json(media))
}

pub async fn upload(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<Value>> {
    let uploader = auth::get_current_user(
        &state,
        auth::get_session_from_headers(&headers).as_deref(),
    )
    .await;

    let upload = read_file_field(multipart).await?;
    if upload.data.is_empty() {
        return Err(AppError::BadRequest("Uploaded file is empty".to_string()));
    }

    let filename = storage::media_object_name(&upload.original_name);
    let size = upload.data.len() as i64;

    storage::upload_object(
        &state,
        &storage::media_key(&filename),
        upload.data,
        &upload.content_type,
    )
    .await?;

    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO media (filename, original_name, content_type, size_bytes, uploaded_by)
        VALUES (?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(&filename)
    .bind(&upload.original_name)
    .bind(&upload.content_type)
    .bind(size)
    .bind(uploader.map(|u| u.id))
    .fetch_one(&state.db)
    .await?;

    tracing::info!("Stored media {} ({} bytes)", filename, size);

    Ok(Json(json!({
        "id": id,
        "filename": filename,
        "url": format!("/media/file/{}", filename),
    })))
}

/// Stream a stored object back with its recorded content type.
pub async fn file(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Result<Response> {
    let media: Option<models::Media> = sqlx::query_as("SELECT * FROM media WHERE filename = ?")
        .bind(&filename)
        .fetch_optional(&state.db)
        .await?;

    let media = media.ok_or_else(|| AppError::NotFound("Media not found".to_string()))?;

    let (body, stored_type) = storage::open_object(&state, &storage::media_key(&media.filename)).await?;
    let content_type = stored_type.unwrap_or(media.content_type);

    let stream = ReaderStream::new(body.into_async_read());

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "private, max-age=3600".to_string()),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}
