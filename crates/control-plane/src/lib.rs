// Timekeeper Control Plane Library
// Decision: Router construction lives in the library so tests drive it with tower::oneshot

pub mod api;
pub mod config;

pub use config::Config;

use axum::http::{header, HeaderValue, Method};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the full application router
pub fn build_router(state: api::timers::AppState, cors_origins: &[String]) -> Router {
    let app = Router::new()
        .merge(api::health_routes())
        .merge(api::timers::routes(state));

    let origins: Vec<HeaderValue> = cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    // Add CORS layer only if origins are configured
    let app = if origins.is_empty() {
        app
    } else {
        app.layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::ORIGIN]),
        )
    };

    app.layer(TraceLayer::new_for_http())
}
