//! Outbound network layer
//!
//! The orchestrator never talks to sockets directly: every cache miss,
//! revalidation and manifest install goes through a [`Fetcher`].

mod client;

pub use client::HttpFetcher;

use crate::models::{CachedResponse, InterceptedRequest};
use futures::future::BoxFuture;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("scheme {0:?} cannot be fetched")]
    UnsupportedScheme(String),
    #[error("failed to read response body: {0}")]
    Body(String),
}

/// `fetch(request) -> response | failure`
pub trait Fetcher: Send + Sync {
    fn fetch<'a>(
        &'a self,
        request: &'a InterceptedRequest,
    ) -> BoxFuture<'a, Result<CachedResponse, FetchError>>;
}

/// Request headers that are not forwarded upstream: hop-specific ones,
/// plus `accept-encoding`, which the client negotiates itself so that
/// bodies always arrive decoded.
const HOP_BY_HOP: &[&str] = &[
    "host",
    "accept-encoding",
    "content-length",
    "transfer-encoding",
    "connection",
    "proxy-connection",
    "keep-alive",
    "upgrade",
];

/// Headers of `request` that are safe to forward upstream
pub(crate) fn forwardable_headers(
    request: &InterceptedRequest,
) -> impl Iterator<Item = &(String, String)> {
    request
        .headers()
        .iter()
        .filter(|(name, _)| !HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h)))
}
