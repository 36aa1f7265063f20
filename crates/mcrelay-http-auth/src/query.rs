//! Query parameter extraction
//!
//! WebSocket clients in browsers cannot attach headers to the upgrade request, so the
//! key may also travel as `?auth=<key>`.

use crate::{CredentialChannel, CredentialExtractor};
use http::HeaderMap;
use url::form_urlencoded;

#[derive(Debug, Clone)]
pub struct QueryExtractor {
    param: String,
}

impl QueryExtractor {
    pub fn new(param: impl Into<String>) -> Self {
        Self {
            param: param.into(),
        }
    }
}

impl CredentialExtractor for QueryExtractor {
    fn extract(&self, _headers: &HeaderMap, query: Option<&str>) -> Option<String> {
        form_urlencoded::parse(query?.as_bytes())
            .find(|(name, value)| name == self.param.as_str() && !value.is_empty())
            .map(|(_, value)| value.into_owned())
    }

    fn channel(&self) -> CredentialChannel {
        CredentialChannel::QueryParameter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_decoding() {
        let extractor = QueryExtractor::new("auth");
        assert_eq!(
            extractor.extract(&HeaderMap::new(), Some("wrapper=a&auth=a%2Bb%3D")),
            Some("a+b=".to_string())
        );
    }

    #[test]
    fn test_absent_parameter() {
        let extractor = QueryExtractor::new("auth");
        assert_eq!(extractor.extract(&HeaderMap::new(), Some("wrapper=a")), None);
        assert_eq!(extractor.extract(&HeaderMap::new(), None), None);
    }
}
