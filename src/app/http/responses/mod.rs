use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use serde_json::json;

/// Standard `{success, message, data?}` envelope for the user CRUD surface.
pub fn success<T: Serialize>(status: StatusCode, message: &str, data: T) -> Response {
    (
        status,
        Json(json!({
            "success": true,
            "message": message,
            "data": data,
        })),
    )
        .into_response()
}

pub fn error(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(json!({
            "success": false,
            "message": message,
        })),
    )
        .into_response()
}

pub fn validation_error(errors: Vec<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "success": false,
            "message": "Validation failed",
            "errors": errors,
        })),
    )
        .into_response()
}
