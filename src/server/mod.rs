//! HTTP surface: JSON routes over the shared `AppState`.

pub mod error;
pub mod routes;

#[cfg(test)]
mod test;

use std::sync::Arc;

use axum::http::HeaderValue;
use axum::Router;
use log::warn;
use tower_http::cors::{Any, CorsLayer};

pub use error::ApiError;

use crate::state::AppState;

/// Assemble the application router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.server.cors_origin);
    Router::new()
        .merge(routes::routes())
        .layer(cors)
        .with_state(state)
}

/// `*` allows any origin; anything else is matched exactly.
fn cors_layer(origin: &str) -> CorsLayer {
    if origin.trim() == "*" {
        return CorsLayer::permissive();
    }
    match HeaderValue::from_str(origin.trim()) {
        Ok(value) => CorsLayer::new()
            .allow_origin(value)
            .allow_methods(Any)
            .allow_headers(Any),
        Err(e) => {
            warn!("Ignoring invalid CORS origin {:?}: {}", origin, e);
            CorsLayer::new()
        }
    }
}
