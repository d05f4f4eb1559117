pub mod handlers;
pub mod middleware;
pub mod state;

use axum::{
    Router,
    routing::{get, patch, post},
};
use tower_http::{
    compression::CompressionLayer,
    cors::CorsLayer,
    trace::TraceLayer,
};
use std::sync::Arc;

use crate::{
    config::Settings,
    service::ServiceContext,
};
use state::AppState;

pub fn create_app(
    service_context: Arc<ServiceContext>,
    settings: Arc<Settings>,
) -> Router {
    let app_state = AppState::new(service_context, settings);

    Router::new()
        // Root and health endpoints
        .route("/", get(handlers::root::root))
        .route("/health", get(handlers::root::health_check))

        .nest("/announcements", announcement_routes_with_auth(app_state.clone()))

        // Add state to the router
        .with_state(app_state)

        // Middleware
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

fn announcement_routes_with_auth(state: AppState) -> Router<AppState> {
    Router::new()
        // Public routes
        .route("/", get(handlers::announcements::list))
        .route("/latest", get(handlers::announcements::latest))
        .route("/latest/id", get(handlers::announcements::latest_id))
        .route("/tags", get(handlers::announcements::tags))
        .route("/:id", get(handlers::announcements::get))
        // Protected routes - require a bearer token
        .merge(Router::new()
            .route("/", post(handlers::announcements::create))
            .route(
                "/:id",
                patch(handlers::announcements::update).delete(handlers::announcements::delete),
            )
            .route("/:id/archive", post(handlers::announcements::archive))
            .route("/:id/unarchive", post(handlers::announcements::unarchive))
            .route_layer(axum::middleware::from_fn_with_state(
                state,
                middleware::auth::require_auth,
            ))
        )
}
