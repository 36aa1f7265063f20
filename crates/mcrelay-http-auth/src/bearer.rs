//! Bearer token extraction
//!
//! ```text
//! Authorization: Bearer <key>
//! ```

use crate::{CredentialChannel, CredentialExtractor};
use http::header::AUTHORIZATION;
use http::HeaderMap;
use tracing::debug;

/// Reads the key from an `Authorization: Bearer` header
#[derive(Debug, Clone, Copy, Default)]
pub struct BearerExtractor;

impl CredentialExtractor for BearerExtractor {
    fn extract(&self, headers: &HeaderMap, _query: Option<&str>) -> Option<String> {
        let value = headers.get(AUTHORIZATION)?.to_str().ok()?;

        // Scheme is case-insensitive (RFC 6750)
        let (scheme, token) = value.split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            debug!("Bearer auth: ignoring Authorization scheme '{}'", scheme);
            return None;
        }

        let token = token.trim();
        (!token.is_empty()).then(|| token.to_string())
    }

    fn channel(&self) -> CredentialChannel {
        CredentialChannel::BearerHeader
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn extract(value: &str) -> Option<String> {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        BearerExtractor.extract(&headers, None)
    }

    #[test]
    fn test_extracts_token() {
        assert_eq!(extract("Bearer abc123"), Some("abc123".to_string()));
        assert_eq!(extract("bearer abc123"), Some("abc123".to_string()));
    }

    #[test]
    fn test_ignores_other_schemes_and_empty_tokens() {
        assert_eq!(extract("Basic dXNlcjpwYXNz"), None);
        assert_eq!(extract("Bearer "), None);
        assert_eq!(extract("Bearer"), None);
        assert_eq!(BearerExtractor.extract(&HeaderMap::new(), None), None);
    }
}
