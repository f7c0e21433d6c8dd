//! keyward HTTP server.
//!
//! Hosts the browser login flow and the credential exchange endpoint on
//! top of the keyward libraries.

pub mod auth;
pub mod config;
pub mod error;

use axum::{Router, routing::get};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use auth::AppState;

/// Builds the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/auth/login", get(auth::login))
        .route("/auth/callback", get(auth::callback))
        .route("/auth/logout", get(auth::logout))
        .route("/api/auth/sts-credentials", get(auth::sts_credentials))
        .route("/healthz", get(auth::healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
