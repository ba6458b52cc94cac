//! HTTP surface: the deploy webhook and build status endpoints.

pub mod builds;
pub mod webhook;

use axum::{Router, routing};

use crate::SharedState;

pub use builds::{cancel_build, get_build, list_builds};
pub use webhook::{handle_webhook, method_not_allowed};

/// Build the application router with the webhook served at `webhook_path`.
pub fn router(state: SharedState, webhook_path: &str) -> Router {
    Router::new()
        .route(
            webhook_path,
            routing::post(handle_webhook).fallback(method_not_allowed),
        )
        .route("/builds", routing::get(list_builds))
        .route("/builds/{id}", routing::get(get_build))
        .route("/builds/{id}/cancel", routing::post(cancel_build))
        .with_state(state)
}
