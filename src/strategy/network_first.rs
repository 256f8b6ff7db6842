use super::{Strategy, StrategyContext};
use crate::error::CacheError;
use crate::models::{CachedResponse, InterceptedRequest};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::sync::Arc;

/// Always try the network; keep decoded payloads, not envelopes.
///
/// On failure the stored document for the URL is replayed as a `200` JSON
/// body. Without one the caller gets an empty collection, never an error.
pub struct NetworkFirstStructured {
    ctx: Arc<StrategyContext>,
}

impl NetworkFirstStructured {
    pub fn new(ctx: Arc<StrategyContext>) -> Self {
        Self { ctx }
    }

    async fn run(&self, request: &InterceptedRequest) -> Result<CachedResponse, CacheError> {
        let key = request.identity().url;

        match self.ctx.fetch(request).await {
            Ok(response) if response.is_success() => {
                self.remember(&key, &response).await;
                return Ok(response);
            }
            Ok(response) => {
                let err = CacheError::NonSuccessStatus {
                    status: response.status(),
                };
                tracing::warn!("{} for {}; serving stored document", err, key);
            }
            Err(err) => tracing::warn!("{} for {}; serving stored document", err, key),
        }

        match self.ctx.structured.get(&key).await {
            Ok(Some(document)) => Ok(CachedResponse::json(&document)),
            Ok(None) => {
                tracing::debug!("No stored document for {}; serving empty collection", key);
                Ok(CachedResponse::empty_collection())
            }
            Err(e) => {
                tracing::warn!("{} for {}", CacheError::StoreRead(e), key);
                Ok(CachedResponse::empty_collection())
            }
        }
    }

    /// Decode and persist the body; failures are logged and never affect
    /// the live response.
    async fn remember(&self, key: &str, response: &CachedResponse) {
        let document: Value = match serde_json::from_slice(response.body()) {
            Ok(document) => document,
            Err(e) => {
                tracing::warn!("{} for {}", CacheError::DecodeFailure(e), key);
                return;
            }
        };
        if let Err(e) = self.ctx.structured.put(key, &document).await {
            tracing::warn!("{} for {}", CacheError::StoreWriteFailure(e), key);
        }
    }
}

impl Strategy for NetworkFirstStructured {
    fn serve<'a>(
        &'a self,
        request: &'a InterceptedRequest,
    ) -> BoxFuture<'a, Result<CachedResponse, CacheError>> {
        self.run(request).boxed()
    }
}
