//! Position ideas from the RedGifs search API.

use crate::{AppError, AppState, Result};
use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

const DEFAULT_TAG: &str = "romantic";
const DEFAULT_COUNT: i64 = 20;
const MAX_COUNT: i64 = 80;

pub const MISSING_CREDENTIALS_NOTE: &str = "Set REDGIFS_CLIENT_ID/SECRET to enable";

#[derive(Debug, Deserialize)]
pub struct RedgifsQuery {
    tag: Option<String>,
    count: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct PositionItem {
    pub id: String,
    pub poster: Option<String>,
    pub video: Option<String>,
    pub tags: Vec<String>,
    pub duration: Option<f64>,
}

impl PositionItem {
    fn from_gif(gif: &Value) -> Option<Self> {
        let id = gif.get("id")?.as_str()?.to_string();
        let url = |name: &str| {
            gif.pointer(&format!("/urls/{}", name))
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        Some(Self {
            id,
            poster: url("poster").or_else(|| url("thumbnail")),
            video: url("hd").or_else(|| url("sd")),
            tags: gif
                .get("tags")
                .and_then(Value::as_array)
                .map(|tags| {
                    tags.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            duration: gif.get("duration").and_then(Value::as_f64),
        })
    }
}

async fn fetch_token(state: &AppState, client_id: &str, client_secret: &str) -> Result<String> {
    let url = format!("{}/v2/oauth/client", state.config.redgifs_api_base.trim_end_matches('/'));

    let response = state
        .http
        .post(&url)
        .timeout(state.config.content_timeout())
        .form(&[
            ("grant_type", "client_credentials"),
            ("client_id", client_id),
            ("client_secret", client_secret),
        ])
        .send()
        .await
        .map_err(|e| AppError::Upstream(format!("RedGifs auth failed: {}", e)))?;

    if !response.status().is_success() {
        return Err(AppError::Upstream(format!(
            "RedGifs auth returned {}",
            response.status()
        )));
    }

    let token: TokenResponse = response
        .json()
        .await
        .map_err(|e| AppError::Upstream(format!("RedGifs auth response invalid: {}", e)))?;
    Ok(token.access_token)
}

async fn search(state: &AppState, token: &str, tag: &str, count: i64) -> Result<Vec<PositionItem>> {
    let url = format!("{}/v2/gifs/search", state.config.redgifs_api_base.trim_end_matches('/'));
    let count = count.to_string();

    let response = state
        .http
        .get(&url)
        .timeout(state.config.content_timeout())
        .bearer_auth(token)
        .query(&[
            ("search_text", tag),
            ("count", count.as_str()),
            ("order", "trending"),
        ])
        .send()
        .await
        .map_err(|e| AppError::Upstream(format!("RedGifs search failed: {}", e)))?;

    if !response.status().is_success() {
        return Err(AppError::Upstream(format!(
            "RedGifs search returned {}",
            response.status()
        )));
    }

    let body: Value = response
        .json()
        .await
        .map_err(|e| AppError::Upstream(format!("RedGifs search response invalid: {}", e)))?;

    Ok(body
        .get("gifs")
        .and_then(Value::as_array)
        .map(|gifs| gifs.iter().filter_map(PositionItem::from_gif).collect())
        .unwrap_or_default())
}

pub async fn redgifs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RedgifsQuery>,
) -> Result<Json<Value>> {
    let settings = state.settings.app_settings().await?;
    let credentials = settings.redgifs_credentials(
        &state.config.redgifs_client_id,
        &state.config.redgifs_client_secret,
    );

    let (client_id, client_secret) = match credentials {
        Some(pair) => pair,
        None => {
            return Ok(Json(json!({
                "items": [],
                "note": MISSING_CREDENTIALS_NOTE,
            })))
        }
    };

    let tag = query
        .tag
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_TAG);
    let count = query.count.unwrap_or(DEFAULT_COUNT).clamp(1, MAX_COUNT);

    let token = fetch_token(&state, client_id, client_secret).await?;
    let items = search(&state, &token, tag, count).await?;

    Ok(Json(json!({ "items": items })))
}
