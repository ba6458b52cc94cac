#![allow(dead_code)]

use autodeploy::config::Config;
use autodeploy::{AppState, SharedState, api};
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, Response};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const WEBHOOK_PATH: &str = "/auto-deploy";
pub const DRAIN: Duration = Duration::from_secs(20);

/// Build script that echoes its arguments, with some colored output.
pub const ECHO_SCRIPT: &str = "printf '%s\\n' \"$@\"\nprintf '\\033[32mdone\\033[0m\\n'";

pub fn write_script(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("docker_builder.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

pub fn test_config(dir: &Path, script_body: &str, token: &str) -> Config {
    Config {
        token: token.to_string(),
        script: write_script(dir, script_body),
        log_dir: dir.join("logs"),
        ..Config::default()
    }
}

pub fn test_app(config: &Config) -> (Router, SharedState) {
    let state = Arc::new(AppState::new(config));
    let app = api::router(Arc::clone(&state), &config.path);
    (app, state)
}

pub fn push_body(id: i64, clone_url: &str, branch: &str) -> String {
    serde_json::json!({
        "ref": format!("refs/heads/{}", branch),
        "repository": {
            "id": id,
            "name": "repo",
            "clone_url": clone_url,
            "default_branch": branch,
        }
    })
    .to_string()
}

pub fn post(uri: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(body.into())
        .expect("request should build")
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should be readable");
    String::from_utf8(bytes.to_vec()).expect("body should be utf-8")
}

/// `x-hub-signature-256` value for `payload`, as the sender computes it.
pub fn sign(secret: &str, payload: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(payload);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}
