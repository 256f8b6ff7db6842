//! Intercepted request model
//!
//! Represents a single outgoing request handed to the interceptor by the
//! host application. A request is immutable once intercepted.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// HTTP methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
    Connect,
    Trace,
}

impl HttpMethod {
    /// Convert from string (lossy, defaults to GET)
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "GET" => HttpMethod::Get,
            "POST" => HttpMethod::Post,
            "PUT" => HttpMethod::Put,
            "PATCH" => HttpMethod::Patch,
            "DELETE" => HttpMethod::Delete,
            "HEAD" => HttpMethod::Head,
            "OPTIONS" => HttpMethod::Options,
            "CONNECT" => HttpMethod::Connect,
            "TRACE" => HttpMethod::Trace,
            _ => HttpMethod::Get,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Connect => "CONNECT",
            HttpMethod::Trace => "TRACE",
        }
    }

    /// Whether responses to this method may be written to the response store
    pub fn is_cacheable(&self) -> bool {
        matches!(self, HttpMethod::Get | HttpMethod::Head)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for HttpMethod {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(HttpMethod::from_str_lossy(s))
    }
}

/// How the host application issued the request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestMode {
    /// Full-page document load
    Navigate,
    /// Script, style, image and other same-origin sub-resources
    Subresource,
    /// Cross-origin API call
    CrossOriginApi,
    Other,
}

/// Key used to look up a stored response: method plus URL, headers excluded.
///
/// The URL fragment never reaches the network, so it is not part of the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestIdentity {
    pub method: HttpMethod,
    pub url: String,
}

impl RequestIdentity {
    pub fn new(method: HttpMethod, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            method,
            url: url.into(),
        }
    }

    /// Identity of a plain GET, used for manifest entries and fallback keys
    pub fn get(url: &Url) -> Self {
        Self::new(HttpMethod::Get, url)
    }
}

impl fmt::Display for RequestIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// A request captured at the interception hook
#[derive(Debug, Clone)]
pub struct InterceptedRequest {
    method: HttpMethod,
    url: Url,
    mode: RequestMode,
    headers: Vec<(String, String)>,
    body: Option<Bytes>,
}

impl InterceptedRequest {
    pub fn new(method: HttpMethod, url: Url, mode: RequestMode) -> Self {
        Self {
            method,
            url,
            mode,
            headers: Vec::new(),
            body: None,
        }
    }

    /// Parse `url` and build a GET request with the given mode
    pub fn get(url: &str, mode: RequestMode) -> Result<Self, url::ParseError> {
        Ok(Self::new(HttpMethod::Get, Url::parse(url)?, mode))
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn mode(&self) -> RequestMode {
        self.mode
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn identity(&self) -> RequestIdentity {
        RequestIdentity::new(self.method, &self.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_ignores_headers_and_fragment() {
        let plain = InterceptedRequest::get("https://app.example.com/inbox", RequestMode::Navigate)
            .unwrap();
        let decorated =
            InterceptedRequest::get("https://app.example.com/inbox#unread", RequestMode::Navigate)
                .unwrap()
                .with_header("Accept", "text/html")
                .with_header("Cookie", "session=abc");

        assert_eq!(plain.identity(), decorated.identity());
        assert_eq!(
            decorated.identity().to_string(),
            "GET https://app.example.com/inbox"
        );
    }

    #[test]
    fn identity_distinguishes_methods() {
        let url = Url::parse("https://app.example.com/items").unwrap();
        assert_ne!(
            RequestIdentity::new(HttpMethod::Get, &url),
            RequestIdentity::new(HttpMethod::Post, &url)
        );
    }

    #[test]
    fn method_parsing_is_lossy_and_case_insensitive() {
        assert_eq!(HttpMethod::from_str_lossy("post"), HttpMethod::Post);
        assert_eq!(HttpMethod::from_str_lossy("BREW"), HttpMethod::Get);
        assert!(HttpMethod::Head.is_cacheable());
        assert!(!HttpMethod::Put.is_cacheable());
    }
}
