//! Webhook handler for repository push events

use axum::{
    body::Bytes,
    extract::State as AxumState,
    extract::rejection::BytesRejection,
    http::HeaderMap,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::SharedState;
use crate::credentials::inject_token;
use crate::dispatch::BuildTask;
use crate::error::RequestError;
use crate::payload::parse_event;
use crate::signature::{SIGNATURE_HEADER, verify_signature};

/// Handles the deploy webhook POST request.
///
/// Responds as soon as the build has been started; the outcome of the
/// build only shows up in the server log, the build log and `/builds`.
pub async fn handle_webhook(
    AxumState(state): AxumState<SharedState>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<String, RequestError> {
    accept_push(&state, &headers, body).inspect_err(|e| {
        if e.status_code().is_server_error() {
            error!("Rejected webhook request: {}", e);
        } else {
            warn!("Rejected webhook request: {}", e);
        }
    })
}

/// Any method other than POST on the webhook route.
pub async fn method_not_allowed() -> RequestError {
    RequestError::MethodNotAllowed
}

fn accept_push(
    state: &SharedState,
    headers: &HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<String, RequestError> {
    let body = body.map_err(|e| RequestError::BodyRead(e.body_text()))?;

    if let Some(secret) = &state.webhook_secret {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(RequestError::MissingSignature)?;
        if !verify_signature(secret, &body, signature) {
            return Err(RequestError::InvalidSignature);
        }
    }

    let event = parse_event(&body)?;
    let clone_url = inject_token(&event.clone_url, &state.token, &state.host_marker)?;

    info!(
        repo_id = event.id,
        repo_url = %event.clone_url,
        branch = %event.default_branch,
        "Push event accepted"
    );

    let task = BuildTask::new(&event, clone_url);
    let record = state.registry.spawn(Arc::clone(&state.dispatcher), task);
    debug!(build_id = %record.build_id, run_id = %record.run_id, "Build dispatched");

    Ok(format!("Deployment for {} started", event.id))
}
