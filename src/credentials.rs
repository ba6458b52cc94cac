//! Embedding an access token into repository clone URLs.

use std::fmt;

use crate::error::CredentialError;

const REDACTED: &str = "***";

/// A clone URL carrying a credential.
///
/// `Debug` and `Display` redact the token; use [`AuthenticatedUrl::expose`]
/// only where the cleartext URL must be handed to the build script.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthenticatedUrl {
    url: String,
    prefix_len: usize,
    token_len: usize,
}

impl AuthenticatedUrl {
    pub fn expose(&self) -> &str {
        &self.url
    }

    pub fn redacted(&self) -> String {
        let (head, rest) = self.url.split_at(self.prefix_len);
        let tail = &rest[self.token_len..];
        if self.token_len == 0 {
            format!("{}{}", head, tail)
        } else {
            format!("{}{}{}", head, REDACTED, tail)
        }
    }
}

impl fmt::Display for AuthenticatedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

impl fmt::Debug for AuthenticatedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AuthenticatedUrl")
            .field(&self.redacted())
            .finish()
    }
}

/// Insert `token@` immediately before `host_marker` in `clone_url`.
///
/// The marker must occur exactly once. An empty token still produces the
/// `@` separator (`https://@github.com/...`).
pub fn inject_token(
    clone_url: &str,
    token: &str,
    host_marker: &str,
) -> Result<AuthenticatedUrl, CredentialError> {
    let mut matches = clone_url.match_indices(host_marker).map(|(idx, _)| idx);
    let Some(idx) = matches.next().filter(|_| !host_marker.is_empty()) else {
        return Err(CredentialError::MissingHostMarker(host_marker.to_string()));
    };
    if matches.next().is_some() {
        return Err(CredentialError::AmbiguousHostMarker(host_marker.to_string()));
    }

    let (prefix, rest) = clone_url.split_at(idx);
    let url = format!("{}{}@{}", prefix, token, rest);
    Ok(AuthenticatedUrl {
        url,
        prefix_len: prefix.len(),
        token_len: token.len(),
    })
}
