//! Response model
//!
//! A response produced either by the network layer or from one of the
//! stores. Bodies are reference-counted so a response can be returned to
//! the caller and persisted at the same time.

use bytes::Bytes;
use serde_json::Value;

pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Header attached to responses synthesised by the orchestrator
pub const SOURCE_HEADER: &str = "x-offline-cache";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: Bytes,
}

impl CachedResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    /// Build a response from parts already in storage order
    pub fn from_parts(status: u16, headers: Vec<(String, String)>, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// `200 OK` carrying a stored structured document. Only the payload is
    /// restored, never the original envelope.
    pub fn json(document: &Value) -> Self {
        Self::new(200)
            .with_header("content-type", JSON_CONTENT_TYPE)
            .with_header(SOURCE_HEADER, "structured")
            .with_body(document.to_string())
    }

    /// `200 OK` with an empty JSON array, returned when a listing API has
    /// neither network nor stored data
    pub fn empty_collection() -> Self {
        Self::new(200)
            .with_header("content-type", JSON_CONTENT_TYPE)
            .with_header(SOURCE_HEADER, "empty")
            .with_body("[]")
    }

    /// Terminal response once every fallback tier is exhausted
    pub fn service_unavailable() -> Self {
        Self::new(503).with_header(SOURCE_HEADER, "degraded")
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// First value of a header, matched case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }
}
