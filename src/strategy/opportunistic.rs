use super::{Strategy, StrategyContext};
use crate::error::CacheError;
use crate::models::{CachedResponse, InterceptedRequest};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;

/// Pass through to the network, keeping successful responses on the side.
///
/// The snapshot write runs on a tracked background task so the caller gets
/// the live response without waiting for it. Failures never escape this
/// strategy: it degrades to the stored entry, the offline page, and finally
/// the generic degraded response.
pub struct OpportunisticCache {
    ctx: Arc<StrategyContext>,
}

impl OpportunisticCache {
    pub fn new(ctx: Arc<StrategyContext>) -> Self {
        Self { ctx }
    }

    async fn run(&self, request: &InterceptedRequest) -> Result<CachedResponse, CacheError> {
        let identity = request.identity();

        let err = match self.ctx.fetch(request).await {
            Ok(response) => {
                if response.is_success() && request.method().is_cacheable() {
                    let store = Arc::clone(&self.ctx.responses);
                    let snapshot = response.clone();
                    self.ctx.pending.spawn(async move {
                        match store.put_active(&identity, &snapshot).await {
                            Ok(()) => tracing::trace!("Stored {}", identity),
                            Err(e) => tracing::warn!(
                                "{} for {}",
                                CacheError::StoreWriteFailure(e),
                                identity
                            ),
                        }
                    });
                }
                return Ok(response);
            }
            Err(err) => err,
        };

        tracing::warn!("{} for {}; trying stored copy", err, identity);
        match self.ctx.responses.match_active(&identity).await {
            Ok(Some(hit)) => return Ok(hit),
            Ok(None) => {}
            Err(e) => tracing::warn!("{} for {}", CacheError::StoreRead(e), identity),
        }
        if let Some(page) = self.ctx.offline_fallback().await {
            return Ok(page);
        }
        Ok(self.ctx.degraded_response().await)
    }
}

impl Strategy for OpportunisticCache {
    fn serve<'a>(
        &'a self,
        request: &'a InterceptedRequest,
    ) -> BoxFuture<'a, Result<CachedResponse, CacheError>> {
        self.run(request).boxed()
    }
}
