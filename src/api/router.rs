use axum::{
    http::{HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    delete_feed, fallback, get_feed, health, list_episodes, list_feeds, refresh_feed, subscribe,
    AppState,
};

/// Create the HTTP router.
///
/// `allow_origin` of `None` disables CORS entirely.
pub fn create_router(state: AppState, allow_origin: Option<&str>) -> Router {
    let router = Router::new()
        .route("/health", get(health))
        .route("/feeds", get(list_feeds).post(subscribe))
        .route("/feeds/:id", get(get_feed).delete(delete_feed))
        .route("/feeds/:id/refresh", post(refresh_feed))
        .route("/episodes", get(list_episodes))
        .fallback(fallback)
        .with_state(state);

    let router = match allow_origin.and_then(create_cors_layer) {
        Some(cors) => router.layer(cors),
        None => router,
    };

    router.layer(TraceLayer::new_for_http())
}

/// CORS for a single configured origin.
///
/// `*` allows any origin without credentials (browsers reject a wildcard
/// combined with credentials). A concrete origin is allowed with credentials.
fn create_cors_layer(origin: &str) -> Option<CorsLayer> {
    let methods = [Method::GET, Method::POST, Method::DELETE, Method::OPTIONS];
    let origin = origin.trim();

    if origin.is_empty() {
        return None;
    }
    if origin == "*" {
        return Some(
            CorsLayer::new()
                .allow_methods(methods)
                .allow_headers(Any)
                .allow_origin(Any),
        );
    }

    match origin.parse::<HeaderValue>() {
        Ok(value) => Some(
            CorsLayer::new()
                .allow_methods(methods)
                .allow_headers([
                    axum::http::header::CONTENT_TYPE,
                    axum::http::header::ACCEPT,
                ])
                .allow_credentials(true)
                .allow_origin(value),
        ),
        Err(e) => {
            tracing::warn!(origin = %origin, error = %e, "Ignoring unusable CORS origin");
            None
        }
    }
}
