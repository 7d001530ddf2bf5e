//! OpenAI-compatible chat completions against the local OpenWebUI gateway.

use crate::settings::{AppSettings, Explicitness};
use crate::{AppError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const DEFAULT_PERSONA: &str = "You are a loving, supportive partner.";
pub const CONSENT_SENTENCE: &str = "Keep content consensual and respectful.";
pub const STORY_SYSTEM_PROMPT: &str =
    "You are a loving, supportive partner. Keep content consensual and respectful.";
pub const EMPTY_REPLY: &str = "I apologize, but I encountered an issue responding to you.";

const LOW_EXPLICITNESS: &str = "Keep everything gentle, warm and non-explicit.";
const MEDIUM_EXPLICITNESS: &str = "You may be flirtatious and suggestive, without graphic detail.";
const HIGH_EXPLICITNESS: &str =
    "You may be openly sensual and explicit when invited, always enthusiastic and mutual.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

impl ChatTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

pub fn explicitness_sentence(level: Explicitness) -> &'static str {
    match level {
        Explicitness::Low => LOW_EXPLICITNESS,
        Explicitness::Medium => MEDIUM_EXPLICITNESS,
        Explicitness::High => HIGH_EXPLICITNESS,
    }
}

/// System prompt for the companion chat: persona, then tone, then
/// explicitness, then the consent line.
pub fn build_system_prompt(settings: &AppSettings) -> String {
    let mut sentences: Vec<String> = Vec::new();

    match settings.ai_persona.as_deref().map(str::trim) {
        Some(persona) if !persona.is_empty() => {
            let persona = persona.trim_end_matches('.');
            sentences.push(format!("You are {}.", persona));
        }
        _ => sentences.push(DEFAULT_PERSONA.to_string()),
    }

    if let Some(tone) = settings.ai_tone.as_deref().map(str::trim) {
        if !tone.is_empty() {
            sentences.push(format!("Speak in a {} tone.", tone));
        }
    }

    sentences.push(explicitness_sentence(settings.explicitness()).to_string());
    sentences.push(CONSENT_SENTENCE.to_string());

    sentences.join(" ")
}

/// Pull the reply text out of whichever shape the backend answered with.
pub fn extract_reply(body: &Value) -> String {
    body.pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .or_else(|| body.get("content").and_then(Value::as_str))
        .or_else(|| body.get("message").and_then(Value::as_str))
        .filter(|s| !s.is_empty())
        .unwrap_or(EMPTY_REPLY)
        .to_string()
}

/// One non-streaming completion call. Non-2xx and transport errors surface as
/// `AppError::Upstream`.
pub async fn complete(
    http: &reqwest::Client,
    base: &str,
    model: &str,
    messages: &[ChatTurn],
) -> Result<String> {
    let url = format!("{}/v1/chat/completions", base.trim_end_matches('/'));
    let payload = json!({
        "model": model,
        "messages": messages,
        "stream": false,
    });

    let response = http
        .post(&url)
        .json(&payload)
        .send()
        .await
        .map_err(|e| AppError::Upstream(format!("LLM request failed: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        tracing::error!("LLM returned {}: {}", status, body);
        return Err(AppError::Upstream(format!("LLM returned {}", status)));
    }

    let body: Value = response
        .json()
        .await
        .map_err(|e| AppError::Upstream(format!("LLM response was not JSON: {}", e)))?;

    Ok(extract_reply(&body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[test]
    fn test_default_prompt() {
        let prompt = build_system_prompt(&AppSettings::default());
        assert!(prompt.starts_with(DEFAULT_PERSONA));
        assert!(prompt.contains(LOW_EXPLICITNESS));
        assert!(prompt.ends_with(CONSENT_SENTENCE));
    }

    #[test]
    fn test_prompt_orders_persona_tone_explicitness() {
        let settings = AppSettings {
            ai_persona: Some("Aria, a playful muse.".to_string()),
            ai_tone: Some("teasing".to_string()),
            ai_explicitness: Some(Explicitness::High),
            ..Default::default()
        };
        let prompt = build_system_prompt(&settings);

        let persona = prompt.find("You are Aria, a playful muse.").unwrap();
        let tone = prompt.find("Speak in a teasing tone.").unwrap();
        let explicit = prompt.find(HIGH_EXPLICITNESS).unwrap();
        assert!(persona < tone && tone < explicit);
        assert!(!prompt.contains(".."));
    }

    #[test]
    fn test_extract_reply_shapes() {
        let openai = json!({ "choices": [{ "message": { "content": "hi there" } }] });
        assert_eq!(extract_reply(&openai), "hi there");
        assert_eq!(extract_reply(&json!({ "content": "flat" })), "flat");
        assert_eq!(extract_reply(&json!({ "message": "msg" })), "msg");
        assert_eq!(extract_reply(&json!({ "choices": [] })), EMPTY_REPLY);
    }

    #[tokio::test]
    async fn test_complete_posts_openai_payload() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/chat/completions")
                    .body_includes(r#""model":"tiny""#)
                    .body_includes(r#""stream":false"#);
                then.status(200)
                    .json_body(json!({ "choices": [{ "message": { "content": "ok!" } }] }));
            })
            .await;

        let http = reqwest::Client::new();
        let reply = complete(&http, &server.base_url(), "tiny", &[ChatTurn::user("hey")])
            .await
            .unwrap();

        assert_eq!(reply, "ok!");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_complete_maps_non_2xx_to_upstream_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(503).body("model loading");
            })
            .await;

        let http = reqwest::Client::new();
        let err = complete(&http, &server.base_url(), "tiny", &[ChatTurn::user("hey")])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Upstream(_)));
    }
}
