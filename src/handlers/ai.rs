use crate::llm::{self, ChatTurn};
use crate::{fallback, AppError, AppState, Result};
use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;

pub const UNAVAILABLE_MESSAGE: &str =
    "I apologize, but I'm having trouble connecting to my AI brain right now. Please try again in a moment.";

struct ChatRequest {
    messages: Vec<ChatTurn>,
    model: Option<String>,
}

fn parse_request(body: &Value) -> Result<ChatRequest> {
    let raw = body
        .get("messages")
        .and_then(Value::as_array)
        .ok_or_else(|| AppError::BadRequest("Invalid messages format".to_string()))?;

    let messages = raw
        .iter()
        .map(|m| serde_json::from_value::<ChatTurn>(m.clone()))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| AppError::BadRequest("Invalid messages format".to_string()))?;

    let model = body
        .get("model")
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
        .map(str::to_string);

    Ok(ChatRequest { messages, model })
}

/// Persona prompt first, then the client's conversation. A stored
/// `defaultModel` wins over the model the client asks for.
async fn conversation(state: &AppState, req: &ChatRequest) -> Result<(String, Vec<ChatTurn>)> {
    let settings = state.settings.app_settings().await?;
    let model = match (settings.stored_model(), req.model.as_deref()) {
        (Some(stored), _) => stored.to_string(),
        (None, Some(requested)) => requested.to_string(),
        (None, None) => state.config.default_model.clone(),
    };

    let mut turns = Vec::with_capacity(req.messages.len() + 1);
    turns.push(ChatTurn::system(llm::build_system_prompt(&settings)));
    turns.extend(req.messages.iter().cloned());

    Ok((model, turns))
}

pub async fn chat(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>> {
    let Json(body) = payload?;
    let req = parse_request(&body)?;
    let (model, turns) = conversation(&state, &req).await?;

    match llm::complete(&state.http, &state.config.openwebui_base, &model, &turns).await {
        Ok(content) => Ok(Json(json!({ "content": content }))),
        Err(e) => {
            tracing::error!("AI chat failed: {}", e);
            Err(AppError::Upstream(UNAVAILABLE_MESSAGE.to_string()))
        }
    }
}

/// Like `chat`, but answers from the canned replies when the LLM is down.
pub async fn ask(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>> {
    let Json(body) = payload?;
    let req = parse_request(&body)?;
    let (model, turns) = conversation(&state, &req).await?;

    let response =
        match llm::complete(&state.http, &state.config.openwebui_base, &model, &turns).await {
            Ok(content) => json!({ "response": content, "degraded": false }),
            Err(e) => {
                tracing::warn!("LLM unavailable, using canned reply: {}", e);
                json!({ "response": fallback::reply_for(&req.messages), "degraded": true })
            }
        };

    Ok(Json(response))
}
