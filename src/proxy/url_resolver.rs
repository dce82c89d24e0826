//! Target URL resolution for passthrough requests

use crate::proxy::types::{ProxyError, ProxyResult, UpstreamBaseUrl};
use http::Uri;
use reqwest::Url;

/// Combines the configured upstream base with an inbound request target
pub struct UrlResolver;

impl UrlResolver {
    /// Build the upstream URL for an inbound request
    ///
    /// The base path and the inbound path are joined with exactly one
    /// separator and runs of `/` are collapsed. When the inbound path already
    /// starts with the base path (a base of `.../v1` and a request for
    /// `/v1/models`), the shared prefix is not repeated. The inbound query is
    /// appended unchanged.
    pub fn merge(base: &UpstreamBaseUrl, inbound: &Uri) -> ProxyResult<String> {
        let base_url = Url::parse(base.as_ref())
            .map_err(|e| ProxyError::InvalidTargetUrl(format!("{}: {e}", base.as_ref())))?;
        if base_url.cannot_be_a_base() {
            return Err(ProxyError::InvalidTargetUrl(base.as_ref().to_string()));
        }

        let base_path = base_url.path().trim_end_matches('/');
        let inbound_path = inbound.path();

        let joined = if !base_path.is_empty() && Self::has_segment_prefix(inbound_path, base_path)
        {
            inbound_path.to_string()
        } else {
            format!("{base_path}/{}", inbound_path.trim_start_matches('/'))
        };

        let mut target = base_url.origin().ascii_serialization();
        target.push_str(&Self::collapse_separators(&joined));
        if let Some(query) = inbound.query() {
            target.push('?');
            target.push_str(query);
        }
        Ok(target)
    }

    fn has_segment_prefix(path: &str, prefix: &str) -> bool {
        path.strip_prefix(prefix)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    }

    fn collapse_separators(path: &str) -> String {
        let mut out = String::with_capacity(path.len());
        for c in path.chars() {
            if c == '/' && out.ends_with('/') {
                continue;
            }
            out.push(c);
        }
        out
    }
}
