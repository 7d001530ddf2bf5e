use crate::health::{self, HealthReport};
use crate::health_watch::WatchStatsSnapshot;
use crate::models::OnboardingState;
use crate::settings::{APP_SETTINGS_KEY, ONBOARDING_KEY};
use crate::{auth, AppState, Result};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

pub async fn health_all(State(state): State<Arc<AppState>>) -> Json<HealthReport> {
    let report = health::check_all(&state).await;
    if !report.ok {
        tracing::warn!("Health check reported failures");
    }
    Json(report)
}

pub async fn watch_stats(State(state): State<Arc<AppState>>) -> Json<WatchStatsSnapshot> {
    Json(state.watch_stats.snapshot())
}

/// The stored blob exactly as it was saved, `{}` when nothing was saved yet.
pub async fn get_settings(State(state): State<Arc<AppState>>) -> Result<Json<Value>> {
    let value = state.settings.get(APP_SETTINGS_KEY).await?;
    Ok(Json(value.unwrap_or_else(|| json!({}))))
}

pub async fn save_settings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>> {
    let user = auth::require_user(&state, &headers).await?;
    let Json(value) = payload?;

    state.settings.set(APP_SETTINGS_KEY, &value).await?;
    tracing::info!("Settings updated by user {}", user.id);

    Ok(Json(json!({ "ok": true })))
}

pub async fn onboarding_state(State(state): State<Arc<AppState>>) -> Result<Json<Value>> {
    let value = state.settings.get(ONBOARDING_KEY).await?;
    Ok(Json(value.unwrap_or_else(|| json!(OnboardingState::default()))))
}

#[derive(Debug, Default, Deserialize)]
pub struct CompleteRequest {
    emails: Option<Value>,
    model: Option<String>,
}

pub async fn complete_onboarding(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<CompleteRequest>, JsonRejection>,
) -> Result<Json<Value>> {
    let req = payload.map(|Json(req)| req).unwrap_or_default();

    let onboarding = OnboardingState {
        completed: true,
        emails: req.emails,
        model: req.model,
    };
    state.settings.set(ONBOARDING_KEY, &json!(onboarding)).await?;

    Ok(Json(json!({ "ok": true })))
}
