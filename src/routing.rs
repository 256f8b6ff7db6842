//! Request classification
//!
//! Maps each intercepted request to the strategy that serves it. The
//! mapping depends only on request attributes and static configuration.

use crate::models::{InterceptedRequest, RequestMode};
use serde::Serialize;
use thiserror::Error;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StrategyKind {
    /// Not fetchable by the cache layer; handed straight to the network
    Bypass,
    NetworkFirstStructured,
    CacheFirst,
    OpportunisticCache,
}

#[derive(Debug, Error)]
#[error("invalid origin pattern {pattern:?}: {reason}")]
pub struct PatternError {
    pattern: String,
    reason: &'static str,
}

impl PatternError {
    fn new(pattern: &str, reason: &'static str) -> Self {
        Self {
            pattern: pattern.to_string(),
            reason,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum HostPattern {
    Exact(String),
    /// `*.example.com`: any subdomain, not the bare domain
    Subdomains(String),
}

/// Origin matcher such as `https://api.example.com`, `api.example.com:8443`
/// or `https://*.example.com`. A scheme without a port implies the scheme's
/// default port; neither given matches any port over http or https.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginPattern {
    scheme: Option<String>,
    host: HostPattern,
    port: Option<u16>,
}

impl OriginPattern {
    pub fn parse(pattern: &str) -> Result<Self, PatternError> {
        let trimmed = pattern.trim();
        let (scheme, rest) = match trimmed.split_once("://") {
            Some((scheme, rest)) => (Some(scheme.to_ascii_lowercase()), rest),
            None => (None, trimmed),
        };
        if let Some(scheme) = &scheme {
            if scheme != "http" && scheme != "https" {
                return Err(PatternError::new(pattern, "scheme must be http or https"));
            }
        }

        let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
        if authority.is_empty() {
            return Err(PatternError::new(pattern, "missing host"));
        }

        let (host, port) = split_host_port(authority)
            .ok_or_else(|| PatternError::new(pattern, "port is not a number"))?;
        let host = host.to_ascii_lowercase();
        let host = match host.strip_prefix("*.") {
            Some("") => return Err(PatternError::new(pattern, "empty wildcard domain")),
            Some(domain) => HostPattern::Subdomains(domain.to_string()),
            None if host.contains('*') => {
                return Err(PatternError::new(pattern, "wildcard only allowed as leading label"))
            }
            None => HostPattern::Exact(host),
        };

        let port = port.or_else(|| match scheme.as_deref() {
            Some("http") => Some(80),
            Some("https") => Some(443),
            _ => None,
        });

        Ok(Self { scheme, host, port })
    }

    pub fn matches(&self, url: &Url) -> bool {
        if let Some(scheme) = &self.scheme {
            if url.scheme() != scheme {
                return false;
            }
        }
        if let Some(port) = self.port {
            if url.port_or_known_default() != Some(port) {
                return false;
            }
        }
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        match &self.host {
            HostPattern::Exact(expected) => host == *expected,
            HostPattern::Subdomains(domain) => host
                .strip_suffix(domain.as_str())
                .is_some_and(|prefix| prefix.len() > 1 && prefix.ends_with('.')),
        }
    }
}

fn split_host_port(authority: &str) -> Option<(&str, Option<u16>)> {
    // Bracketed IPv6 literal
    if authority.starts_with('[') {
        let end = authority.find(']')?;
        let host = &authority[..=end];
        return match authority[end + 1..].strip_prefix(':') {
            Some(port) => Some((host, Some(port.parse().ok()?))),
            None => Some((host, None)),
        };
    }
    match authority.rsplit_once(':') {
        Some((host, port)) => Some((host, Some(port.parse().ok()?))),
        None => Some((authority, None)),
    }
}

/// Schemes the cache layer can fetch and store
pub fn is_fetchable_scheme(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}

#[derive(Debug, Clone)]
pub struct Router {
    api_origin: OriginPattern,
}

impl Router {
    pub fn new(api_origin: OriginPattern) -> Self {
        Self { api_origin }
    }

    /// Rules, first match wins: unfetchable scheme, structured API origin,
    /// navigation, everything else.
    pub fn classify(&self, request: &InterceptedRequest) -> StrategyKind {
        let url = request.url();
        if !is_fetchable_scheme(url) {
            StrategyKind::Bypass
        } else if self.api_origin.matches(url) {
            StrategyKind::NetworkFirstStructured
        } else if request.mode() == RequestMode::Navigate {
            StrategyKind::CacheFirst
        } else {
            StrategyKind::OpportunisticCache
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> Router {
        Router::new(OriginPattern::parse("https://api.example.com").unwrap())
    }

    fn request(url: &str, mode: RequestMode) -> InterceptedRequest {
        InterceptedRequest::get(url, mode).unwrap()
    }

    #[test]
    fn unfetchable_schemes_bypass_before_any_other_rule() {
        let router = router();
        for url in [
            "chrome-extension://abcdef/popup.html",
            "data:text/html,<p>hi</p>",
            "blob:https://app.example.com/0b9c5e1e",
        ] {
            assert_eq!(
                router.classify(&request(url, RequestMode::Navigate)),
                StrategyKind::Bypass,
                "{url}"
            );
        }
    }

    #[test]
    fn api_origin_wins_over_navigation() {
        let router = router();
        assert_eq!(
            router.classify(&request("https://api.example.com/v1/items", RequestMode::Navigate)),
            StrategyKind::NetworkFirstStructured
        );
        assert_eq!(
            router.classify(&request(
                "https://api.example.com/v1/items",
                RequestMode::CrossOriginApi
            )),
            StrategyKind::NetworkFirstStructured
        );
    }

    #[test]
    fn navigations_are_cache_first_and_the_rest_opportunistic() {
        let router = router();
        assert_eq!(
            router.classify(&request("https://app.example.com/inbox", RequestMode::Navigate)),
            StrategyKind::CacheFirst
        );
        assert_eq!(
            router.classify(&request("https://app.example.com/app.js", RequestMode::Subresource)),
            StrategyKind::OpportunisticCache
        );
        assert_eq!(
            router.classify(&request("https://cdn.example.net/font.woff2", RequestMode::Other)),
            StrategyKind::OpportunisticCache
        );
    }

    #[test]
    fn origin_pattern_respects_scheme_and_port() {
        let pattern = OriginPattern::parse("https://api.example.com").unwrap();
        assert!(pattern.matches(&Url::parse("https://API.example.com/x").unwrap()));
        assert!(!pattern.matches(&Url::parse("http://api.example.com/x").unwrap()));
        assert!(!pattern.matches(&Url::parse("https://api.example.com:8443/x").unwrap()));

        let any_port = OriginPattern::parse("api.example.com").unwrap();
        assert!(any_port.matches(&Url::parse("http://api.example.com:3000/").unwrap()));

        let explicit = OriginPattern::parse("http://127.0.0.1:3000/ignored/path").unwrap();
        assert!(explicit.matches(&Url::parse("http://127.0.0.1:3000/items").unwrap()));
        assert!(!explicit.matches(&Url::parse("http://127.0.0.1:3001/items").unwrap()));
    }

    #[test]
    fn wildcard_matches_subdomains_only() {
        let pattern = OriginPattern::parse("https://*.example.com").unwrap();
        assert!(pattern.matches(&Url::parse("https://api.example.com/").unwrap()));
        assert!(pattern.matches(&Url::parse("https://eu.api.example.com/").unwrap()));
        assert!(!pattern.matches(&Url::parse("https://example.com/").unwrap()));
        assert!(!pattern.matches(&Url::parse("https://badexample.com/").unwrap()));
    }

    #[test]
    fn malformed_patterns_are_rejected() {
        assert!(OriginPattern::parse("ftp://files.example.com").is_err());
        assert!(OriginPattern::parse("https://").is_err());
        assert!(OriginPattern::parse("https://api.example.com:http").is_err());
        assert!(OriginPattern::parse("https://api.*.com").is_err());
    }
}
