//! Route configuration.

use crate::auth::auth_middleware;
use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::http::HeaderValue;
use axum::http::header::ACCESS_CONTROL_ALLOW_ORIGIN;
use axum::middleware;
use axum::response::Response;
use axum::routing::{any, get};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let mount = state.mount_path();

    // Registry routes: everything below the mount goes through one dispatcher.
    let registry_routes = if mount.is_empty() {
        Router::new()
            .route("/", any(handlers::dispatch))
            .route("/{*path}", any(handlers::dispatch))
    } else {
        Router::new()
            .route(&mount, any(handlers::dispatch))
            .route(&format!("{mount}/"), any(handlers::dispatch))
            .route(&format!("{mount}/{{*path}}"), any(handlers::dispatch))
    };

    // Health check (unauthenticated, for load balancers and probes)
    let mut router = Router::new()
        .route("/health", get(handlers::health_check))
        .merge(registry_routes);

    // The metrics endpoint must be network-restricted when enabled.
    // See crate::metrics module documentation.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    // Layers run outermost first: TraceLayer -> CORS -> Auth -> Handler
    router
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(middleware::map_response(allow_any_origin))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn allow_any_origin(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response
}
