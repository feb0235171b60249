use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};

use crate::app::http::controllers::{health_controller, send_controller, user_controller};
use crate::app::http::middleware::correlation_middleware;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_controller::health))
        // Recipient CRUD; writes emit lifecycle events after commit
        .route("/user", post(user_controller::store))
        .route("/user/{id}", get(user_controller::show))
        .route("/user/{id}", put(user_controller::update))
        .route("/user/{id}", delete(user_controller::destroy))
        // Operator endpoints
        .route(
            "/manual/send-birthday-message",
            post(send_controller::send_birthday_messages),
        )
        .layer(middleware::from_fn(correlation_middleware))
}
