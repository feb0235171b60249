use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use std::sync::Arc;

use crate::app::events;
use crate::app::events::user_events::{UserCreatedEvent, UserDeletedEvent, UserUpdatedEvent};
use crate::app::http::middleware::CorrelationContext;
use crate::app::http::requests::user_requests::{CreateUserRequest, UpdateUserRequest};
use crate::app::http::responses;
use crate::app::services::user_service::{UserError, UserService};
use crate::AppState;

fn service_error(e: anyhow::Error) -> Response {
    match e.downcast_ref::<UserError>() {
        Some(UserError::NotFound(_)) => responses::error(StatusCode::NOT_FOUND, &e.to_string()),
        Some(UserError::EmailTaken(_)) => responses::error(StatusCode::CONFLICT, &e.to_string()),
        None => {
            tracing::error!("User operation failed: {}", e);
            responses::error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}

#[utoipa::path(
    post,
    path = "/user",
    tag = "Users",
    summary = "Create a user",
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "User created"),
        (status = 400, description = "Validation failed"),
        (status = 409, description = "Email already registered")
    )
)]
pub async fn store(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationContext>,
    Json(request): Json<CreateUserRequest>,
) -> impl IntoResponse {
    let data = match request.validate() {
        Ok(data) => data,
        Err(errors) => return responses::validation_error(errors),
    };

    match UserService::create_user(&state.pool, data) {
        Ok(user) => {
            events::event(Arc::new(UserCreatedEvent::new(
                user.clone(),
                correlation.id_string(),
            )))
            .await;

            responses::success(StatusCode::CREATED, "User created", user.to_response())
        }
        Err(e) => service_error(e),
    }
}

#[utoipa::path(
    get,
    path = "/user/{id}",
    tag = "Users",
    summary = "Get a user by id",
    params(("id" = String, Path, description = "User identifier (ULID)")),
    responses(
        (status = 200, description = "User details"),
        (status = 404, description = "User not found")
    )
)]
pub async fn show(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match UserService::find_live_by_id(&state.pool, &id) {
        Ok(Some(user)) => responses::success(StatusCode::OK, "User found", user.to_response()),
        Ok(None) => responses::error(StatusCode::NOT_FOUND, "User not found"),
        Err(e) => service_error(e),
    }
}

#[utoipa::path(
    put,
    path = "/user/{id}",
    tag = "Users",
    summary = "Update a user",
    params(("id" = String, Path, description = "User identifier (ULID)")),
    request_body = UpdateUserRequest,
    responses(
        (status = 200, description = "User updated"),
        (status = 400, description = "Validation failed"),
        (status = 404, description = "User not found"),
        (status = 409, description = "Email already registered")
    )
)]
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(correlation): Extension<CorrelationContext>,
    Json(request): Json<UpdateUserRequest>,
) -> impl IntoResponse {
    let data = match request.validate() {
        Ok(data) => data,
        Err(errors) => return responses::validation_error(errors),
    };

    let old_user = match UserService::find_live_by_id(&state.pool, &id) {
        Ok(Some(user)) => user,
        Ok(None) => return responses::error(StatusCode::NOT_FOUND, "User not found"),
        Err(e) => return service_error(e),
    };

    match UserService::update_user(&state.pool, &id, data) {
        Ok(user) => {
            events::event(Arc::new(UserUpdatedEvent::new(
                user.clone(),
                old_user,
                correlation.id_string(),
            )))
            .await;

            responses::success(StatusCode::OK, "User updated", user.to_response())
        }
        Err(e) => service_error(e),
    }
}

#[utoipa::path(
    delete,
    path = "/user/{id}",
    tag = "Users",
    summary = "Soft-delete a user",
    params(("id" = String, Path, description = "User identifier (ULID)")),
    responses(
        (status = 200, description = "User deleted"),
        (status = 404, description = "User not found")
    )
)]
pub async fn destroy(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(correlation): Extension<CorrelationContext>,
) -> impl IntoResponse {
    match UserService::soft_delete(&state.pool, &id) {
        Ok(user) => {
            events::event(Arc::new(UserDeletedEvent::new(
                user.clone(),
                correlation.id_string(),
            )))
            .await;

            responses::success(StatusCode::OK, "User deleted", user.to_response())
        }
        Err(e) => service_error(e),
    }
}
