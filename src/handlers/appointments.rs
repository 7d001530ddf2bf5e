use crate::{models, AppError, AppState, Result};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;

pub async fn list(State(state): State<Arc<AppState>>) -> Result<Json<Vec<models::Appointment>>> {
    let appointments: Vec<models::Appointment> =
        sqlx::query_as("SELECT * FROM appointments ORDER BY start_time DESC LIMIT 50")
            .fetch_all(&state.db)
            .await?;

    Ok(Json(appointments))
}

fn require_title(form: &models::AppointmentForm) -> Result<String> {
    form.title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AppError::BadRequest("Title is required".to_string()))
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<models::AppointmentForm>, JsonRejection>,
) -> Result<Json<models::Appointment>> {
    let Json(form) = payload?;
    let title = require_title(&form)?;

    let appointment: models::Appointment = sqlx::query_as(
        r#"
        INSERT INTO appointments (title, start_time, end_time, notes)
        VALUES (?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(&title)
    .bind(&form.start_time)
    .bind(&form.end_time)
    .bind(&form.notes)
    .fetch_one(&state.db)
    .await?;

    tracing::info!("Created appointment {}", appointment.id);
    Ok(Json(appointment))
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    payload: std::result::Result<Json<models::AppointmentForm>, JsonRejection>,
) -> Result<Json<models::Appointment>> {
    let Json(form) = payload?;

    // Absent fields keep their current value
    let appointment: Option<models::Appointment> = sqlx::query_as(
        r#"
        UPDATE appointments
        SET title = COALESCE(?, title),
            start_time = COALESCE(?, start_time),
            end_time = COALESCE(?, end_time),
            notes = COALESCE(?, notes)
        WHERE id = ?
        RETURNING *
        "#,
    )
    .bind(form.title.as_deref().map(str::trim).filter(|t| !t.is_empty()))
    .bind(&form.start_time)
    .bind(&form.end_time)
    .bind(&form.notes)
    .bind(id)
    .fetch_optional(&state.db)
    .await?;

    appointment
        .map(Json)
        .ok_or_else(|| AppError::NotFound("Appointment not found".to_string()))
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Value>> {
    let result = sqlx::query("DELETE FROM appointments WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Appointment not found".to_string()));
    }

    Ok(Json(json!({ "ok": true })))
}
