use crate::{models, AppError, AppState, Result};
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::HeaderMap;
use chrono::{Duration, Utc};
use rand::rngs::OsRng;
use rand::Rng;
use std::sync::Arc;

pub const SESSION_COOKIE_NAME: &str = "session";
pub const SESSION_DURATION_DAYS: i64 = 7;

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

pub fn generate_session_token() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    base64_url::encode(&bytes)
}

pub async fn create_session(state: &Arc<AppState>, user_id: i64) -> Result<String> {
    let token = generate_session_token();
    let expires_at = Utc::now() + Duration::days(SESSION_DURATION_DAYS);

    sqlx::query("INSERT INTO sessions (token, user_id, expires_at) VALUES (?, ?, ?)")
        .bind(&token)
        .bind(user_id)
        .bind(expires_at.format("%Y-%m-%d %H:%M:%S").to_string())
        .execute(&state.db)
        .await?;

    Ok(token)
}

pub async fn delete_session(state: &Arc<AppState>, token: &str) -> Result<()> {
    sqlx::query("DELETE FROM sessions WHERE token = ?")
        .bind(token)
        .execute(&state.db)
        .await?;
    Ok(())
}

/// Bearer token from `Authorization`, falling back to the session cookie.
pub fn get_session_from_headers(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());

    if bearer.is_some() {
        return bearer;
    }

    headers
        .get(COOKIE)?
        .to_str()
        .ok()?
        .split(';')
        .find_map(|cookie| {
            let cookie = cookie.trim();
            cookie
                .strip_prefix(SESSION_COOKIE_NAME)
                .and_then(|rest| rest.strip_prefix('='))
                .map(|t| t.to_string())
        })
}

pub async fn get_current_user(state: &Arc<AppState>, token: Option<&str>) -> Option<models::User> {
    let token = token?;

    let result = sqlx::query_as::<_, models::User>(
        r#"
        SELECT u.* FROM users u
        INNER JOIN sessions s ON s.user_id = u.id
        WHERE s.token = ? AND s.expires_at > datetime('now')
        "#,
    )
    .bind(token)
    .fetch_optional(&state.db)
    .await;

    match result {
        Ok(user) => user,
        Err(e) => {
            tracing::error!("Session lookup failed: {}", e);
            None
        }
    }
}

pub async fn require_user(state: &Arc<AppState>, headers: &HeaderMap) -> Result<models::User> {
    let token = get_session_from_headers(headers);
    get_current_user(state, token.as_deref())
        .await
        .ok_or_else(|| AppError::Unauthorized("Not authenticated".to_string()))
}
