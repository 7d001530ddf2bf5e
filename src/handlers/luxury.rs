//! Backup download, voice notes, feedback and milestone counters.

use crate::backup::{self, BACKUP_FILENAME, BACKUP_TABLES};
use crate::{auth, models, storage, AppError, AppState, Result};
use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Multipart, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

pub async fn backup_zip(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<Response> {
    let user = auth::require_user(&state, &headers).await?;
    tracing::info!("Backup export requested by user {}", user.id);

    let stream = backup::stream_archive(state.db.clone(), BACKUP_TABLES);

    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename={}", BACKUP_FILENAME),
            ),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}

fn parse_author_id(raw: &str) -> Option<i64> {
    raw.trim().parse().ok()
}

pub async fn partner_message(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<Value>> {
    let mut text = String::new();
    let mut author_id: Option<i64> = None;
    let mut audio: Option<(Vec<u8>, String)> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        tracing::error!("Failed to read multipart field: {}", e);
        AppError::BadRequest(format!("Failed to read form field: {}", e))
    })? {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "text" => text = field.text().await.unwrap_or_default(),
            "author_id" => author_id = parse_author_id(&field.text().await.unwrap_or_default()),
            "audio" => {
                let content_type = field.content_type().unwrap_or("audio/webm").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("Failed to read audio: {}", e)))?;
                if !data.is_empty() {
                    audio = Some((data.to_vec(), content_type));
                }
            }
            _ => {}
        }
    }

    let audio_key = match audio {
        Some((data, content_type)) => {
            let key = storage::voice_key();
            storage::upload_object(&state, &key, data, &content_type).await?;
            Some(key)
        }
        None => None,
    };

    sqlx::query("INSERT INTO partner_messages (author_id, text, audio_key) VALUES (?, ?, ?)")
        .bind(author_id)
        .bind(&text)
        .bind(&audio_key)
        .execute(&state.db)
        .await?;

    Ok(Json(json!({ "ok": true, "audio_key": audio_key })))
}

pub async fn partner_messages(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<models::PartnerMessage>>> {
    let messages: Vec<models::PartnerMessage> =
        sqlx::query_as("SELECT * FROM partner_messages ORDER BY id DESC LIMIT 50")
            .fetch_all(&state.db)
            .await?;

    Ok(Json(messages))
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    message: Option<String>,
    author_id: Option<i64>,
}

pub async fn feedback(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<FeedbackRequest>, JsonRejection>,
) -> Result<Json<Value>> {
    let Json(req) = payload?;

    sqlx::query("INSERT INTO feedback (author_id, message) VALUES (?, ?)")
        .bind(req.author_id)
        .bind(req.message.unwrap_or_default())
        .execute(&state.db)
        .await?;

    Ok(Json(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
pub struct MilestoneRequest {
    key: Option<String>,
    amount: Option<i64>,
}

pub async fn milestone_incr(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<MilestoneRequest>, JsonRejection>,
) -> Result<Json<Value>> {
    let Json(req) = payload?;
    let key = req
        .key
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .ok_or_else(|| AppError::BadRequest("Milestone key is required".to_string()))?;
    let amount = req.amount.unwrap_or(1);

    let count: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO milestones (key, count) VALUES (?, ?)
        ON CONFLICT (key) DO UPDATE
            SET count = milestones.count + excluded.count, updated_at = datetime('now')
        RETURNING count
        "#,
    )
    .bind(key)
    .bind(amount)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(json!({ "ok": true, "key": key, "count": count })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    fn incr(key: Option<&str>, amount: Option<i64>) -> std::result::Result<Json<MilestoneRequest>, JsonRejection> {
        Ok(Json(MilestoneRequest {
            key: key.map(str::to_string),
            amount,
        }))
    }

    #[tokio::test]
    async fn test_milestone_counts_accumulate() {
        let state = test_support::state(&[]).await;

        let Json(first) = milestone_incr(State(state.clone()), incr(Some("dates"), None))
            .await
            .unwrap();
        assert_eq!(first["count"], 1);

        let Json(second) = milestone_incr(State(state), incr(Some("dates"), Some(4)))
            .await
            .unwrap();
        assert_eq!(second["count"], 5);
        assert_eq!(second["key"], "dates");
    }

    #[tokio::test]
    async fn test_milestone_without_key_is_rejected() {
        let state = test_support::state(&[]).await;
        let err = milestone_incr(State(state), incr(None, Some(2)))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_backup_requires_session() {
        let state = test_support::state(&[]).await;
        let err = backup_zip(State(state), HeaderMap::new()).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_backup_response_headers() {
        let state = test_support::state(&[]).await;
        let (_, headers) = test_support::signed_in(&state, "her@example.com").await;

        let response = backup_zip(State(state), headers).await.unwrap();
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/zip");
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=companion-backup.zip"
        );

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let archive = zip::ZipArchive::new(std::io::Cursor::new(bytes.to_vec())).unwrap();
        assert_eq!(archive.len(), BACKUP_TABLES.len());
    }

    #[tokio::test]
    async fn test_text_only_partner_message_is_listed() {
        let state = test_support::state(&[]).await;

        let request = axum::http::Request::builder()
            .method("POST")
            .header(header::CONTENT_TYPE, "multipart/form-data; boundary=B")
            .body(Body::from(
                "--B\r\nContent-Disposition: form-data; name=\"text\"\r\n\r\nThinking of you\r\n\
                 --B\r\nContent-Disposition: form-data; name=\"author_id\"\r\n\r\n7\r\n--B--\r\n",
            ))
            .unwrap();
        let form = <Multipart as axum::extract::FromRequest<()>>::from_request(request, &())
            .await
            .unwrap();

        let Json(saved) = partner_message(State(state.clone()), form).await.unwrap();
        assert_eq!(saved["ok"], true);
        assert!(saved["audio_key"].is_null());

        let Json(messages) = partner_messages(State(state)).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "Thinking of you");
        assert_eq!(messages[0].author_id, Some(7));
    }

    #[tokio::test]
    async fn test_feedback_is_stored() {
        let state = test_support::state(&[]).await;
        feedback(
            State(state.clone()),
            Ok(Json(FeedbackRequest {
                message: Some("love the new theme".to_string()),
                author_id: None,
            })),
        )
        .await
        .unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM feedback")
            .fetch_one(&state.db)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
