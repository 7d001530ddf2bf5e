pub mod ai;
pub mod appointments;
pub mod auth;
pub mod chat;
pub mod luxury;
pub mod media;
pub mod positions;
pub mod settings;
pub mod stories;
pub mod toys;
pub mod tts;

use axum::Json;
use serde_json::{json, Value};

pub async fn health_check() -> Json<Value> {
    Json(json!({ "ok": true }))
}
