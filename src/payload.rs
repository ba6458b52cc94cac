//! Push event payload parsing.

use serde::Deserialize;

use crate::error::RequestError;

/// A validated repository event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryEvent {
    pub id: i64,
    pub clone_url: String,
    pub default_branch: String,
}

#[derive(Debug, Deserialize)]
struct RawPayload {
    repository: Option<RawRepository>,
}

#[derive(Debug, Deserialize)]
struct RawRepository {
    id: Option<i64>,
    clone_url: Option<String>,
    default_branch: Option<String>,
}

/// Parse and validate a webhook body.
///
/// Field values are returned exactly as sent; nothing is trimmed.
pub fn parse_event(body: &[u8]) -> Result<RepositoryEvent, RequestError> {
    let payload: RawPayload = serde_json::from_slice(body)?;
    let repository = payload
        .repository
        .ok_or(RequestError::MissingField("repository"))?;

    let clone_url = non_empty(repository.clone_url, "clone_url")?;
    let default_branch = non_empty(repository.default_branch, "default_branch")?;
    let id = repository.id.ok_or(RequestError::MissingField("id"))?;

    Ok(RepositoryEvent {
        id,
        clone_url,
        default_branch,
    })
}

/// Absent, `null` and `""` all count as missing.
fn non_empty(value: Option<String>, field: &'static str) -> Result<String, RequestError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or(RequestError::MissingField(field))
}
