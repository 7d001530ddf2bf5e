use crate::llm::{self, ChatTurn};
use crate::{AppState, Result};
use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

const DEFAULT_PROMPT: &str = "Write a romantic, loving, consensual story.";

#[derive(Debug, Default, Deserialize)]
pub struct StoryRequest {
    prompt: Option<String>,
}

pub async fn generate(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<StoryRequest>, JsonRejection>,
) -> Result<Json<Value>> {
    let req = payload.map(|Json(req)| req).unwrap_or_default();
    let prompt = req
        .prompt
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or(DEFAULT_PROMPT);

    let settings = state.settings.app_settings().await?;
    let model = settings.model(&state.config.default_model);

    let messages = [
        ChatTurn::system(llm::STORY_SYSTEM_PROMPT),
        ChatTurn::user(prompt),
    ];
    let text = llm::complete(&state.http, &state.config.openwebui_base, model, &messages).await?;

    Ok(Json(json!({ "text": text })))
}
