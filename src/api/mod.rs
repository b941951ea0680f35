//! HTTP surface (§6): bootstrap/log endpoints plus the minimal health and
//! version routes carried as ambient surface (out of core scope per §1,
//! included here because the external interface names them).

pub mod bootstrap;
pub mod log;

#[cfg(test)]
mod integration_tests;

use std::sync::Arc;

use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    let prefix = state.config.path_prefix.clone();
    let standalone = state.config.standalone;

    // `log::handle` enforces the body-size cap itself (via `to_bytes` with
    // an explicit limit) rather than through `DefaultBodyLimit`/the `Bytes`
    // extractor: a rejection there short-circuits with axum's automatic 413,
    // but spec.md groups "body over cap" with the rest of ClientInputError —
    // silently dropped, HTTP 200 (§7).
    let routes = Router::new()
        .route("/bootstrap.js", get(bootstrap::handle))
        .route("/log", post(log::handle))
        .route("/health", get(health))
        .route("/version", get(version))
        .with_state(state.clone());

    let mut app = if prefix.is_empty() {
        routes
    } else {
        Router::new().nest(&prefix, routes)
    };

    app = app.layer(TraceLayer::new_for_http());

    if standalone {
        app = app.layer(build_cors_layer(&state.config));
    }

    app
}

fn build_cors_layer(config: &crate::config::AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .filter_map(|o| {
            if o == "*" {
                None
            } else {
                o.parse::<HeaderValue>().ok()
            }
        })
        .collect();

    let allow_origin = if config.cors_allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .max_age(std::time::Duration::from_secs(config.cors_max_age_secs))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

async fn version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
