use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::Utc;

use crate::app::http::responses;
use crate::AppState;

/// Operator escape hatch: dispatch today's pending sends immediately,
/// regardless of their scheduled send time. Covers recipients registered on
/// their birthday after the local send time has passed.
#[utoipa::path(
    post,
    path = "/manual/send-birthday-message",
    tag = "Operations",
    summary = "Force-dispatch today's pending birthday sends",
    responses(
        (status = 200, description = "Dispatch summary", body = crate::app::services::sweeper_service::SweepSummary),
        (status = 500, description = "Dispatch failed")
    )
)]
pub async fn send_birthday_messages(State(state): State<AppState>) -> impl IntoResponse {
    match state.sweeper.dispatch_due(Utc::now(), true).await {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(e) => {
            tracing::error!("Manual dispatch failed: {}", e);
            responses::error(StatusCode::INTERNAL_SERVER_ERROR, "Dispatch failed")
        }
    }
}
