use crate::{auth, models, AppError, AppState, Result};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    email: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    token: String,
    user: models::UserResponse,
}

fn session_cookie(token: &str, max_age: i64) -> String {
    format!(
        "{}={}; HttpOnly; Secure; SameSite=Strict; Max-Age={}; Path=/",
        auth::SESSION_COOKIE_NAME,
        token,
        max_age
    )
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Response> {
    let Json(req) = payload?;

    let email = req
        .email
        .as_deref()
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(str::to_lowercase);
    let password = req.password.filter(|p| !p.is_empty());

    let (email, password) = match (email, password) {
        (Some(email), Some(password)) => (email, password),
        _ => {
            return Err(AppError::BadRequest(
                "Missing email or password".to_string(),
            ))
        }
    };

    let user: Option<models::User> = sqlx::query_as("SELECT * FROM users WHERE email = ?")
        .bind(&email)
        .fetch_optional(&state.db)
        .await?;

    // Same answer for unknown email and wrong password
    let user = match user {
        Some(u) if auth::verify_password(&password, &u.password_hash) => u,
        _ => {
            tracing::warn!("Failed login for {}", email);
            return Err(AppError::Unauthorized("Invalid credentials".to_string()));
        }
    };

    let token = auth::create_session(&state, user.id).await?;
    let cookie = session_cookie(&token, auth::SESSION_DURATION_DAYS * 24 * 60 * 60);

    tracing::info!("User {} logged in", user.id);

    let response = LoginResponse {
        token,
        user: user.into(),
    };

    Ok(([(header::SET_COOKIE, cookie)], Json(response)).into_response())
}

pub async fn logout(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<Response> {
    if let Some(token) = auth::get_session_from_headers(&headers) {
        auth::delete_session(&state, &token).await?;
    }

    Ok((
        [(header::SET_COOKIE, session_cookie("", 0))],
        Json(json!({ "ok": true })),
    )
        .into_response())
}

pub async fn me(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<models::UserResponse>> {
    let user = auth::require_user(&state, &headers).await?;
    Ok(Json(user.into()))
}
