//! Shared-key authentication for mcrelay HTTP endpoints
//!
//! Every protected request must present the configured pre-shared key through one of
//! three channels, checked in this order:
//!
//! - `Authorization: Bearer <key>`
//! - `X-Auth-Key: <key>`
//! - `?auth=<key>` query parameter (browsers cannot set headers on WebSocket upgrades)
//!
//! The first channel carrying a non-empty value wins; later channels are not consulted.
//! The comparison against the configured key runs in constant time.
//!
//! # Usage
//!
//! ```
//! use http::HeaderMap;
//! use mcrelay_http_auth::{AuthResult, CredentialChannel, SharedKeyAuthenticator};
//!
//! let auth = SharedKeyAuthenticator::new("s3cret").unwrap();
//! let headers = HeaderMap::new();
//!
//! assert_eq!(
//!     auth.authenticate(&headers, Some("wrapper=survival&auth=s3cret")),
//!     AuthResult::Authenticated(CredentialChannel::QueryParameter)
//! );
//! assert_eq!(auth.authenticate(&headers, None), AuthResult::Missing);
//! ```

mod bearer;
mod header;
mod query;

pub use bearer::BearerExtractor;
pub use header::HeaderExtractor;
pub use query::QueryExtractor;

use http::HeaderMap;
use std::fmt;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::debug;

/// Header carrying the shared key, both for dashboard requests and for agent dials
pub const AUTH_KEY_HEADER: &str = "X-Auth-Key";

/// Query parameter carrying the shared key
pub const AUTH_QUERY_PARAM: &str = "auth";

/// Where a credential was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialChannel {
    BearerHeader,
    AuthKeyHeader,
    QueryParameter,
}

impl fmt::Display for CredentialChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CredentialChannel::BearerHeader => "bearer",
            CredentialChannel::AuthKeyHeader => "header",
            CredentialChannel::QueryParameter => "query",
        };
        f.write_str(name)
    }
}

/// Authentication result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthResult {
    Authenticated(CredentialChannel),
    /// No channel carried a credential
    Missing,
    /// A credential was presented and did not match
    Invalid(CredentialChannel),
}

impl AuthResult {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthResult::Authenticated(_))
    }
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Pulls a candidate credential out of a request
///
/// Extractors only locate the credential; comparing it is the authenticator's job.
pub trait CredentialExtractor: Send + Sync {
    /// Return the credential if this channel carries a non-empty one
    fn extract(&self, headers: &HeaderMap, query: Option<&str>) -> Option<String>;

    fn channel(&self) -> CredentialChannel;
}

/// Validates requests against a single pre-shared key
pub struct SharedKeyAuthenticator {
    key: Vec<u8>,
    extractors: Vec<Box<dyn CredentialExtractor>>,
}

impl fmt::Debug for SharedKeyAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedKeyAuthenticator")
            .field("key", &"<redacted>")
            .field("extractors", &self.extractors.len())
            .finish()
    }
}

impl SharedKeyAuthenticator {
    /// Create an authenticator with the standard channel order
    ///
    /// # Errors
    /// Returns [`AuthError::ConfigError`] for an empty key.
    pub fn new(key: impl Into<String>) -> Result<Self, AuthError> {
        Self::with_extractors(
            key,
            vec![
                Box::new(BearerExtractor),
                Box::new(HeaderExtractor::new(AUTH_KEY_HEADER)),
                Box::new(QueryExtractor::new(AUTH_QUERY_PARAM)),
            ],
        )
    }

    pub fn with_extractors(
        key: impl Into<String>,
        extractors: Vec<Box<dyn CredentialExtractor>>,
    ) -> Result<Self, AuthError> {
        let key = key.into();
        if key.is_empty() {
            return Err(AuthError::ConfigError("auth key must not be empty".to_string()));
        }

        Ok(Self {
            key: key.into_bytes(),
            extractors,
        })
    }

    /// Find the first credential in channel order
    pub fn extract(
        &self,
        headers: &HeaderMap,
        query: Option<&str>,
    ) -> Option<(String, CredentialChannel)> {
        self.extractors.iter().find_map(|extractor| {
            extractor
                .extract(headers, query)
                .map(|credential| (credential, extractor.channel()))
        })
    }

    pub fn authenticate(&self, headers: &HeaderMap, query: Option<&str>) -> AuthResult {
        let Some((credential, channel)) = self.extract(headers, query) else {
            debug!("Shared key auth: no credential presented");
            return AuthResult::Missing;
        };

        if self.verify(&credential) {
            debug!("Shared key auth: valid credential via {}", channel);
            AuthResult::Authenticated(channel)
        } else {
            debug!("Shared key auth: invalid credential via {}", channel);
            AuthResult::Invalid(channel)
        }
    }

    /// Constant-time comparison with the configured key
    pub fn verify(&self, candidate: &str) -> bool {
        self.key.as_slice().ct_eq(candidate.as_bytes()).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn auth() -> SharedKeyAuthenticator {
        SharedKeyAuthenticator::new("correct-key").unwrap()
    }

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_empty_key_rejected() {
        assert!(matches!(
            SharedKeyAuthenticator::new(""),
            Err(AuthError::ConfigError(_))
        ));
    }

    #[test]
    fn test_each_channel_accepts_correct_key() {
        let auth = auth();

        assert_eq!(
            auth.authenticate(&headers(&[("authorization", "Bearer correct-key")]), None),
            AuthResult::Authenticated(CredentialChannel::BearerHeader)
        );
        assert_eq!(
            auth.authenticate(&headers(&[("x-auth-key", "correct-key")]), None),
            AuthResult::Authenticated(CredentialChannel::AuthKeyHeader)
        );
        assert_eq!(
            auth.authenticate(&HeaderMap::new(), Some("auth=correct-key")),
            AuthResult::Authenticated(CredentialChannel::QueryParameter)
        );
    }

    #[test]
    fn test_each_channel_rejects_wrong_key() {
        let auth = auth();

        assert_eq!(
            auth.authenticate(&headers(&[("authorization", "Bearer nope")]), None),
            AuthResult::Invalid(CredentialChannel::BearerHeader)
        );
        assert_eq!(
            auth.authenticate(&headers(&[("x-auth-key", "correct-key-2")]), None),
            AuthResult::Invalid(CredentialChannel::AuthKeyHeader)
        );
        assert_eq!(
            auth.authenticate(&HeaderMap::new(), Some("auth=CORRECT-KEY")),
            AuthResult::Invalid(CredentialChannel::QueryParameter)
        );
    }

    #[test]
    fn test_first_non_empty_channel_wins() {
        let auth = auth();

        // A wrong bearer token is not rescued by a correct header
        let both = headers(&[("authorization", "Bearer wrong"), ("x-auth-key", "correct-key")]);
        assert_eq!(
            auth.authenticate(&both, Some("auth=correct-key")),
            AuthResult::Invalid(CredentialChannel::BearerHeader)
        );

        // An empty header falls through to the query string
        let empty = headers(&[("x-auth-key", "")]);
        assert_eq!(
            auth.authenticate(&empty, Some("auth=correct-key")),
            AuthResult::Authenticated(CredentialChannel::QueryParameter)
        );
    }

    #[test]
    fn test_missing_credential() {
        let auth = auth();
        assert_eq!(auth.authenticate(&HeaderMap::new(), None), AuthResult::Missing);
        assert_eq!(
            auth.authenticate(&HeaderMap::new(), Some("wrapper=survival&auth=")),
            AuthResult::Missing
        );
        assert!(!AuthResult::Missing.is_authenticated());
    }
}
