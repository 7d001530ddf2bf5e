//! Lovense Standard API (LAN mode): QR pairing and vibration commands.

use crate::{AppError, AppState, Result};
use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

const MAX_LEVEL: u32 = 20;
const DEFAULT_SECONDS: u32 = 5;

#[derive(Debug, Deserialize)]
pub struct ConnectRequest {
    uid: Option<String>,
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ControlRequest {
    uid: Option<String>,
    level: Option<u32>,
    seconds: Option<u32>,
}

async fn developer_token(state: &AppState) -> Result<String> {
    let settings = state.settings.app_settings().await?;
    settings
        .lovense_token(&state.config.lovense_developer_token)
        .map(str::to_string)
        .ok_or_else(|| AppError::BadRequest("Set LOVENSE_DEVELOPER_TOKEN to enable".to_string()))
}

fn require_uid(uid: Option<String>) -> Result<String> {
    uid.map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .ok_or_else(|| AppError::BadRequest("uid is required".to_string()))
}

async fn post_lovense(state: &AppState, path: &str, payload: &Value) -> Result<Value> {
    let url = format!("{}{}", state.config.lovense_api_base.trim_end_matches('/'), path);

    let response = state
        .http
        .post(&url)
        .timeout(state.config.content_timeout())
        .json(payload)
        .send()
        .await
        .map_err(|e| AppError::Upstream(format!("Lovense request failed: {}", e)))?;

    if !response.status().is_success() {
        return Err(AppError::Upstream(format!(
            "Lovense returned {}",
            response.status()
        )));
    }

    response
        .json()
        .await
        .map_err(|e| AppError::Upstream(format!("Lovense response invalid: {}", e)))
}

pub async fn connect(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<ConnectRequest>, JsonRejection>,
) -> Result<Json<Value>> {
    let token = developer_token(&state).await?;
    let Json(req) = payload?;
    let uid = require_uid(req.uid)?;
    let username = req.username.unwrap_or_else(|| uid.clone());

    let body = post_lovense(
        &state,
        "/api/lan/getQrCode",
        &json!({
            "token": token,
            "uid": uid,
            "uname": username,
            "v": 2,
        }),
    )
    .await?;

    let data = body.get("data").cloned().unwrap_or(Value::Null);
    Ok(Json(json!({
        "ok": body.get("result").and_then(Value::as_bool).unwrap_or(false),
        "qr": data.get("qr").cloned().unwrap_or(Value::Null),
        "code": data.get("code").cloned().unwrap_or(Value::Null),
    })))
}

pub async fn control(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<ControlRequest>, JsonRejection>,
) -> Result<Json<Value>> {
    let token = developer_token(&state).await?;
    let Json(req) = payload?;
    let uid = require_uid(req.uid)?;

    let level = req.level.unwrap_or(0);
    if level > MAX_LEVEL {
        return Err(AppError::BadRequest(format!(
            "level must be between 0 and {}",
            MAX_LEVEL
        )));
    }
    let seconds = req.seconds.unwrap_or(DEFAULT_SECONDS);

    let body = post_lovense(
        &state,
        "/api/lan/v2/command",
        &json!({
            "token": token,
            "uid": uid,
            "command": "Function",
            "action": format!("Vibrate:{}", level),
            "timeSec": seconds,
            "apiVer": 1,
        }),
    )
    .await?;

    Ok(Json(json!({
        "ok": body.get("code").and_then(Value::as_i64) == Some(200)
            || body.get("result").and_then(Value::as_bool) == Some(true),
        "result": body,
    })))
}
