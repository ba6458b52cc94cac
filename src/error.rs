use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

/// Errors that terminate an inbound webhook request.
///
/// Each variant maps to a status code and a short message; internal
/// detail stays in the server log.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Failed to read request body: {0}")]
    BodyRead(String),

    #[error("Failed to parse JSON body: {0}")]
    MalformedBody(#[from] serde_json::Error),

    #[error("Missing {0} in payload")]
    MissingField(&'static str),

    #[error("Invalid clone_url in payload: {0}")]
    InvalidCloneUrl(#[from] CredentialError),

    #[error("Missing signature header")]
    MissingSignature,

    #[error("Signature verification failed")]
    InvalidSignature,
}

impl RequestError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RequestError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            RequestError::BodyRead(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RequestError::MalformedBody(_)
            | RequestError::MissingField(_)
            | RequestError::InvalidCloneUrl(_) => StatusCode::BAD_REQUEST,
            RequestError::MissingSignature | RequestError::InvalidSignature => {
                StatusCode::UNAUTHORIZED
            }
        }
    }

    /// Message sent back to the caller.
    fn public_message(&self) -> String {
        match self {
            RequestError::BodyRead(_) => "Failed to read request body".to_string(),
            RequestError::MalformedBody(_) => "Failed to parse JSON body".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        (self.status_code(), self.public_message()).into_response()
    }
}

/// Clone URL could not be rewritten to carry a credential.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    #[error("host marker '{0}' not found")]
    MissingHostMarker(String),

    #[error("host marker '{0}' appears more than once")]
    AmbiguousHostMarker(String),
}

/// Failure of a single build task. Never surfaced to the HTTP caller.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("failed to create log file {}: {source}", path.display())]
    LogFile { path: PathBuf, source: io::Error },

    #[error("failed to write build log: {0}")]
    LogWrite(io::Error),

    #[error("failed to start build script: {0}")]
    Spawn(io::Error),

    #[error("failed to wait for build script: {0}")]
    Wait(io::Error),

    #[error("build script exited unsuccessfully ({0})")]
    Failed(ExitStatus),

    #[error("build timed out after {0:?}")]
    TimedOut(Duration),

    #[error("build cancelled")]
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read { path: String, source: io::Error },

    #[error("Failed to parse config file '{path}': {source}")]
    Yaml {
        path: String,
        source: serde_yaml::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    Toml {
        path: String,
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level error for server startup.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Helper type for Results that use AppError
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_errors_map_to_expected_status_codes() {
        assert_eq!(
            RequestError::MethodNotAllowed.status_code(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(
            RequestError::BodyRead("eof".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            RequestError::MissingField("clone_url").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RequestError::InvalidCloneUrl(CredentialError::MissingHostMarker("github.com".into()))
                .status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RequestError::InvalidSignature.status_code(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn malformed_body_message_hides_parser_detail() {
        let err = serde_json::from_slice::<serde_json::Value>(b"{nope").unwrap_err();
        let err = RequestError::MalformedBody(err);
        assert_eq!(err.public_message(), "Failed to parse JSON body");
    }
}
