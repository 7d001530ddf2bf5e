use crate::{AppError, AppState, Result};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

const DEFAULT_TEXT: &str = "Hello";

#[derive(Debug, Default, Deserialize)]
pub struct SpeakRequest {
    text: Option<String>,
}

fn synth_url(base: &str, text: &str, voice: &str) -> Result<String> {
    let query = serde_urlencoded::to_string(&[("text", text), ("voice", voice)])
        .map_err(|e| AppError::Internal(format!("Failed to encode TTS query: {}", e)))?;
    Ok(format!("{}/api/tts?{}", base.trim_end_matches('/'), query))
}

/// Relay text to the Piper HTTP server and return the WAV bytes.
pub async fn speak(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<SpeakRequest>, JsonRejection>,
) -> Result<Response> {
    let req = payload.map(|Json(req)| req).unwrap_or_default();
    let text = req
        .text
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or(DEFAULT_TEXT);

    let url = synth_url(&state.config.tts_http, text, &state.config.default_tts_voice)?;

    let response = state
        .http
        .get(&url)
        .send()
        .await
        .map_err(|e| AppError::Upstream(format!("TTS request failed: {}", e)))?;

    if !response.status().is_success() {
        return Err(AppError::Upstream(format!("TTS returned {}", response.status())));
    }

    let audio = response
        .bytes()
        .await
        .map_err(|e| AppError::Upstream(format!("TTS response failed: {}", e)))?;

    Ok(([(header::CONTENT_TYPE, "audio/wav")], audio).into_response())
}
