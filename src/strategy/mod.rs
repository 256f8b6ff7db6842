//! Serving strategies
//!
//! Each strategy composes response-store or structured-store access with
//! a network fetch. They share one [`StrategyContext`] holding the stores,
//! the network layer and the fixed fallback keys.

mod cache_first;
mod network_first;
mod opportunistic;
mod pending;

pub use cache_first::CacheFirst;
pub use network_first::NetworkFirstStructured;
pub use opportunistic::OpportunisticCache;
pub use pending::PendingWrites;

use crate::error::CacheError;
use crate::models::{CachedResponse, InterceptedRequest, RequestIdentity};
use crate::network::Fetcher;
use crate::storage::{ResponseStore, StructuredStore};
use futures::future::BoxFuture;
use std::sync::Arc;

/// `serve(request) -> Response`
pub trait Strategy: Send + Sync {
    fn serve<'a>(
        &'a self,
        request: &'a InterceptedRequest,
    ) -> BoxFuture<'a, Result<CachedResponse, CacheError>>;
}

pub struct StrategyContext {
    pub responses: Arc<ResponseStore>,
    pub structured: Arc<StructuredStore>,
    pub fetcher: Arc<dyn Fetcher>,
    /// Offline page served when a navigation or sub-resource cannot be fetched
    pub navigation_fallback: RequestIdentity,
    /// Last-resort entry consulted before synthesising a 503
    pub generic_fallback: Option<RequestIdentity>,
    pub pending: Arc<PendingWrites>,
}

impl StrategyContext {
    pub(crate) async fn fetch(
        &self,
        request: &InterceptedRequest,
    ) -> Result<CachedResponse, CacheError> {
        Ok(self.fetcher.fetch(request).await?)
    }

    /// Look up a fixed fallback key in the active generation
    pub(crate) async fn stored_fallback(
        &self,
        key: &RequestIdentity,
    ) -> Result<CachedResponse, CacheError> {
        match self.responses.match_active(key).await {
            Ok(Some(response)) => Ok(response),
            Ok(None) => Err(CacheError::StoreMiss {
                key: key.to_string(),
            }),
            Err(e) => Err(CacheError::StoreRead(e)),
        }
    }

    pub(crate) async fn offline_fallback(&self) -> Option<CachedResponse> {
        match self.stored_fallback(&self.navigation_fallback).await {
            Ok(page) => {
                tracing::debug!("Serving offline fallback {}", self.navigation_fallback);
                Some(page)
            }
            Err(err) => {
                tracing::warn!("Offline fallback unavailable: {}", err);
                None
            }
        }
    }

    /// Response once every tier is exhausted
    pub(crate) async fn degraded_response(&self) -> CachedResponse {
        if let Some(key) = &self.generic_fallback {
            match self.stored_fallback(key).await {
                Ok(response) => return response,
                Err(err) => tracing::debug!("Generic fallback unavailable: {}", err),
            }
        }
        CachedResponse::service_unavailable()
    }
}
