//! Custom header extraction

use crate::{CredentialChannel, CredentialExtractor};
use http::HeaderMap;

/// Reads the key verbatim from a named header (case-insensitive name)
#[derive(Debug, Clone)]
pub struct HeaderExtractor {
    header_name: String,
}

impl HeaderExtractor {
    pub fn new(header_name: impl Into<String>) -> Self {
        Self {
            header_name: header_name.into().to_lowercase(),
        }
    }
}

impl CredentialExtractor for HeaderExtractor {
    fn extract(&self, headers: &HeaderMap, _query: Option<&str>) -> Option<String> {
        let value = headers.get(self.header_name.as_str())?.to_str().ok()?;
        (!value.is_empty()).then(|| value.to_string())
    }

    fn channel(&self) -> CredentialChannel {
        CredentialChannel::AuthKeyHeader
    }
}
