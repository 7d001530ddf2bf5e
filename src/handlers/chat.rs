use crate::{auth, models, AppError, AppState, Result};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

const HISTORY_LIMIT: i64 = 200;

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    body: Option<String>,
}

const SELECT_MESSAGES: &str = r#"
    SELECT m.id, m.sender_id, u.display_name AS sender_name, m.body, m.read_at, m.created_at
    FROM chat_messages m
    LEFT JOIN users u ON u.id = m.sender_id
"#;

async fn fetch_message(state: &AppState, id: i64) -> Result<Option<models::ChatMessage>> {
    let sql = format!("{} WHERE m.id = ?", SELECT_MESSAGES);
    Ok(sqlx::query_as(&sql).bind(id).fetch_optional(&state.db).await?)
}

/// Oldest first, so clients can append in order.
pub async fn list(State(state): State<Arc<AppState>>) -> Result<Json<Vec<models::ChatMessage>>> {
    let sql = format!(
        "SELECT * FROM ({} ORDER BY m.id DESC LIMIT ?) ORDER BY id ASC",
        SELECT_MESSAGES
    );
    let messages: Vec<models::ChatMessage> = sqlx::query_as(&sql)
        .bind(HISTORY_LIMIT)
        .fetch_all(&state.db)
        .await?;

    Ok(Json(messages))
}

pub async fn send(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: std::result::Result<Json<SendRequest>, JsonRejection>,
) -> Result<Json<models::ChatMessage>> {
    let user = auth::require_user(&state, &headers).await?;
    let Json(req) = payload?;

    let body = req
        .body
        .as_deref()
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .ok_or_else(|| AppError::BadRequest("Message body is required".to_string()))?;

    let id: i64 =
        sqlx::query_scalar("INSERT INTO chat_messages (sender_id, body) VALUES (?, ?) RETURNING id")
            .bind(user.id)
            .bind(body)
            .fetch_one(&state.db)
            .await?;

    fetch_message(&state, id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::Internal("Message vanished after insert".to_string()))
}

pub async fn mark_read(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<models::ChatMessage>> {
    let result = sqlx::query(
        "UPDATE chat_messages SET read_at = COALESCE(read_at, datetime('now')) WHERE id = ?",
    )
    .bind(id)
    .execute(&state.db)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Message not found".to_string()));
    }

    fetch_message(&state, id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("Message not found".to_string()))
}
