pub mod app;
pub mod config;
pub mod database;
pub mod routes;
pub mod schema;

use axum::Router;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::app::services::sweeper_service::SweeperService;
use crate::database::DbPool;

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub sweeper: Arc<SweeperService>,
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .merge(routes::api::routes())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
