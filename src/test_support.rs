//! Fixtures shared by the in-module tests.

use crate::{auth, db, AppState, Config};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;

/// Nothing listens on the discard port; connections are refused immediately.
pub const UNREACHABLE: &str = "http://127.0.0.1:9";

const SERVICE_URLS: &[&str] = &[
    "S3_ENDPOINT",
    "OPENWEBUI_BASE",
    "OLLAMA_BASE",
    "TTS_HTTP",
    "CHAT_RELAY_BASE",
    "REDGIFS_API_BASE",
    "LOVENSE_API_BASE",
];

pub async fn memory_pool() -> SqlitePool {
    // One connection, otherwise every new connection sees a fresh empty database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    db::run_migrations(&pool).await.unwrap();
    pool
}

/// Config with every outbound service pointed at [`UNREACHABLE`] unless overridden.
pub fn config(pairs: &[(&str, &str)]) -> Config {
    let mut vars: HashMap<String, String> = SERVICE_URLS
        .iter()
        .map(|k| (k.to_string(), UNREACHABLE.to_string()))
        .collect();
    vars.insert("S3_ACCESS_KEY".to_string(), "test".to_string());
    vars.insert("S3_SECRET_KEY".to_string(), "test".to_string());
    for (k, v) in pairs {
        vars.insert(k.to_string(), v.to_string());
    }
    envy::from_iter(vars).unwrap()
}

pub async fn state(pairs: &[(&str, &str)]) -> Arc<AppState> {
    Arc::new(AppState::new(config(pairs), memory_pool().await))
}

/// Insert a user and return its id.
pub async fn create_user(state: &Arc<AppState>, email: &str, password: &str) -> i64 {
    let hash = auth::hash_password(password).unwrap();
    sqlx::query_scalar(
        "INSERT INTO users (email, password_hash, display_name, role) VALUES (?, ?, ?, 'her') RETURNING id",
    )
    .bind(email)
    .bind(hash)
    .bind(email.split('@').next().unwrap_or(email))
    .fetch_one(&state.db)
    .await
    .unwrap()
}

/// Headers carrying a bearer token for a freshly created user.
pub async fn signed_in(state: &Arc<AppState>, email: &str) -> (i64, axum::http::HeaderMap) {
    let user_id = create_user(state, email, "password").await;
    let token = auth::create_session(state, user_id).await.unwrap();

    let mut headers = axum::http::HeaderMap::new();
    headers.insert(
        axum::http::header::AUTHORIZATION,
        format!("Bearer {}", token).parse().unwrap(),
    );
    (user_id, headers)
}

/// Collect a response body as JSON.
pub async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
