use super::{Strategy, StrategyContext};
use crate::error::CacheError;
use crate::models::{CachedResponse, InterceptedRequest};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;

/// Serve from the active generation; fetch and keep on a miss.
///
/// Stored entries are returned as-is with no revalidation. Every network
/// miss grows the active generation; navigable pages are a bounded set.
pub struct CacheFirst {
    ctx: Arc<StrategyContext>,
}

impl CacheFirst {
    pub fn new(ctx: Arc<StrategyContext>) -> Self {
        Self { ctx }
    }

    async fn run(&self, request: &InterceptedRequest) -> Result<CachedResponse, CacheError> {
        let identity = request.identity();
        match self.ctx.responses.match_active(&identity).await {
            Ok(Some(hit)) => {
                tracing::debug!("Cache hit for {}", identity);
                return Ok(hit);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("{}; treating as miss", CacheError::StoreRead(e)),
        }

        match self.ctx.fetch(request).await {
            Ok(response) => {
                if response.is_success() && request.method().is_cacheable() {
                    // Must commit before the response goes back to the caller.
                    if let Err(e) = self.ctx.responses.put_active(&identity, &response).await {
                        tracing::warn!("{} for {}", CacheError::StoreWriteFailure(e), identity);
                    }
                } else {
                    tracing::debug!(
                        "Not storing {} (status {})",
                        identity,
                        response.status()
                    );
                }
                Ok(response)
            }
            Err(err) => {
                tracing::warn!("{} for {}; trying offline fallback", err, identity);
                match self.ctx.offline_fallback().await {
                    Some(page) => Ok(page),
                    None => Err(err),
                }
            }
        }
    }
}

impl Strategy for CacheFirst {
    fn serve<'a>(
        &'a self,
        request: &'a InterceptedRequest,
    ) -> BoxFuture<'a, Result<CachedResponse, CacheError>> {
        self.run(request).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RequestMode;
    use crate::network::testing::ScriptedFetcher;
    use crate::strategy::testing::{activate_with_offline_page, context};
    use tempfile::tempdir;

    const PAGE: &str = "https://app.example.com/inbox";

    #[tokio::test]
    async fn first_visit_fetches_once_and_second_is_served_from_store() {
        let dir = tempdir().expect("temp dir");
        let fetcher = Arc::new(ScriptedFetcher::default());
        let ctx = context(dir.path(), Arc::clone(&fetcher));
        activate_with_offline_page(&ctx).await;
        fetcher.respond(PAGE, 200, "<h1>inbox</h1>");
        let strategy = CacheFirst::new(Arc::clone(&ctx));
        let request = InterceptedRequest::get(PAGE, RequestMode::Navigate).unwrap();

        let writes_before = ctx.responses.stats().writes;
        let first = strategy.serve(&request).await.unwrap();
        assert_eq!(first.body().as_ref(), b"<h1>inbox</h1>");
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(ctx.responses.stats().writes, writes_before + 1);

        fetcher.respond(PAGE, 200, "<h1>inbox v2</h1>");
        let second = strategy.serve(&request).await.unwrap();
        assert_eq!(fetcher.calls(), 1, "stored page is served without a fetch");
        assert_eq!(second.body().as_ref(), b"<h1>inbox</h1>", "no revalidation");
    }

    #[tokio::test]
    async fn network_failure_serves_offline_page() {
        let dir = tempdir().expect("temp dir");
        let fetcher = Arc::new(ScriptedFetcher::default());
        let ctx = context(dir.path(), Arc::clone(&fetcher));
        activate_with_offline_page(&ctx).await;
        let strategy = CacheFirst::new(ctx);

        let request = InterceptedRequest::get(PAGE, RequestMode::Navigate).unwrap();
        let response = strategy.serve(&request).await.unwrap();
        assert_eq!(response.body().as_ref(), b"<h1>You are offline</h1>");
    }

    #[tokio::test]
    async fn failure_propagates_when_offline_page_is_missing() {
        let dir = tempdir().expect("temp dir");
        let fetcher = Arc::new(ScriptedFetcher::default());
        fetcher.fail(PAGE);
        let strategy = CacheFirst::new(context(dir.path(), fetcher));

        let request = InterceptedRequest::get(PAGE, RequestMode::Navigate).unwrap();
        let err = strategy.serve(&request).await.unwrap_err();
        assert!(matches!(err, CacheError::NetworkFailure(_)));
    }

    #[tokio::test]
    async fn error_statuses_are_returned_but_not_stored() {
        let dir = tempdir().expect("temp dir");
        let fetcher = Arc::new(ScriptedFetcher::default());
        let ctx = context(dir.path(), Arc::clone(&fetcher));
        activate_with_offline_page(&ctx).await;
        fetcher.respond(PAGE, 500, "boom");
        let strategy = CacheFirst::new(Arc::clone(&ctx));
        let request = InterceptedRequest::get(PAGE, RequestMode::Navigate).unwrap();

        assert_eq!(strategy.serve(&request).await.unwrap().status(), 500);
        assert!(ctx
            .responses
            .match_active(&request.identity())
            .await
            .unwrap()
            .is_none());
        strategy.serve(&request).await.unwrap();
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn store_write_failure_still_returns_live_response() {
        let dir = tempdir().expect("temp dir");
        let fetcher = Arc::new(ScriptedFetcher::default());
        // No generation has been activated, so every write is rejected.
        let ctx = context(dir.path(), Arc::clone(&fetcher));
        fetcher.respond(PAGE, 200, "<h1>inbox</h1>");
        let strategy = CacheFirst::new(ctx);

        let request = InterceptedRequest::get(PAGE, RequestMode::Navigate).unwrap();
        let response = strategy.serve(&request).await.unwrap();
        assert_eq!(response.body().as_ref(), b"<h1>inbox</h1>");
    }
}
