pub mod health;
pub mod onenet;

use axum::{
    http::{header, Method},
    middleware::from_fn,
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
};

use crate::middleware::request_id::request_id;
use crate::state::AppState;

pub fn api_router(state: AppState) -> Router {
    Router::new()
        .merge(health::router(state.clone()))
        .merge(onenet::router(state))
}

/// Full application: API routes, static frontend fallback, CORS and request ids.
pub fn app(state: AppState) -> Router {
    let static_dir = ServeDir::new(&state.settings.static_dir);

    api_router(state)
        .fallback_service(static_dir)
        .layer(cors_layer())
        .layer(from_fn(request_id))
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .expose_headers([header::HeaderName::from_static("x-request-id")])
}
