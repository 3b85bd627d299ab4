pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod repository;
pub mod services;
pub mod storage;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::services::ContentService;

/// Multipart framing allowance on top of the configured upload size
const MULTIPART_OVERHEAD: u64 = 64 * 1024;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ContentService>,
    pub config: Arc<Config>,
}

pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let body_limit = usize::try_from(
        state
            .config
            .server
            .max_upload_bytes
            .saturating_add(MULTIPART_OVERHEAD),
    )
    .unwrap_or(usize::MAX);

    let api_routes = Router::new()
        .route("/health", get(handlers::health))
        // Contents
        .route(
            "/contents",
            get(handlers::content::list_contents)
                .post(handlers::content::create_content)
                .layer(DefaultBodyLimit::max(body_limit)),
        )
        .route(
            "/contents/:id",
            get(handlers::content::get_content)
                .put(handlers::content::update_content)
                .delete(handlers::content::delete_content),
        )
        .route("/contents/:id/data", get(handlers::content::download_content))
        .route("/contents/:id/url", get(handlers::content::get_content_url))
        .route("/contents/:id/status", put(handlers::content::update_status))
        .route("/contents/:id/finalize", post(handlers::content::finalize_content))
        // Associations
        .route(
            "/contents/:id/associations",
            get(handlers::association::list_associations)
                .post(handlers::association::associate_content),
        )
        .route(
            "/contents/:id/associations/:entity_type/:entity_id",
            get(handlers::association::get_association)
                .delete(handlers::association::dissociate_content),
        )
        .route(
            "/entities/:entity_type/:entity_id/contents",
            get(handlers::association::content_for_entity),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::context::request_context,
        ));

    Router::new()
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
