//! API Router configuration

use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the main API router
pub fn create_router(state: AppState, enable_cors: bool) -> Router {
    let api_routes = Router::new()
        .route("/health", get(handlers::health_check))
        // Stacks
        .route(
            "/stacks",
            get(handlers::list_stacks).post(handlers::create_stack),
        )
        .route(
            "/stacks/:name",
            get(handlers::get_stack).delete(handlers::teardown_stack),
        )
        .route("/stacks/:name/urls", get(handlers::get_service_urls))
        // Teardown schedules
        .route(
            "/stacks/:name/teardown",
            get(handlers::get_teardown_status)
                .put(handlers::update_teardown_schedule)
                .delete(handlers::cancel_teardown),
        )
        .route("/stacks/:name/teardown/extend", post(handlers::extend_teardown))
        .route("/scheduler/sweep", post(handlers::trigger_sweep))
        // Doctor
        .route("/doctor", get(handlers::run_doctor));

    let router = Router::new()
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http());

    let router = if enable_cors {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        router
    };

    router.with_state(state)
}
