//! The per-request interception hook

use crate::config::{ConfigError, OfflineConfig};
use crate::error::CacheError;
use crate::models::{CachedResponse, InterceptedRequest};
use crate::network::Fetcher;
use crate::routing::{Router, StrategyKind};
use crate::storage::{ResponseStore, StoreStats, StructuredStore};
use crate::strategy::{
    CacheFirst, NetworkFirstStructured, OpportunisticCache, PendingWrites, Strategy,
    StrategyContext,
};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

/// Snapshot of what the interceptor has done since it was created
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterceptorStatus {
    pub active_generation: Option<String>,
    pub bypass: u64,
    pub network_first_structured: u64,
    pub cache_first: u64,
    pub opportunistic: u64,
    /// Requests answered with the degraded response after a strategy failed
    pub degraded: u64,
    pub pending_writes: usize,
    pub response_store: StoreStats,
    pub structured_store: StoreStats,
}

#[derive(Debug, Default)]
struct DispatchCounters {
    bypass: AtomicU64,
    network_first_structured: AtomicU64,
    cache_first: AtomicU64,
    opportunistic: AtomicU64,
    degraded: AtomicU64,
}

impl DispatchCounters {
    fn record(&self, kind: StrategyKind) {
        let counter = match kind {
            StrategyKind::Bypass => &self.bypass,
            StrategyKind::NetworkFirstStructured => &self.network_first_structured,
            StrategyKind::CacheFirst => &self.cache_first,
            StrategyKind::OpportunisticCache => &self.opportunistic,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// `{request} -> response`, the only inbound entry point.
///
/// Classification is stateless; everything a strategy needs is owned here.
pub struct Interceptor {
    router: Router,
    ctx: Arc<StrategyContext>,
    cache_first: CacheFirst,
    network_first: NetworkFirstStructured,
    opportunistic: OpportunisticCache,
    counters: DispatchCounters,
}

impl Interceptor {
    pub fn new(
        config: &OfflineConfig,
        responses: Arc<ResponseStore>,
        structured: Arc<StructuredStore>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self, ConfigError> {
        let ctx = Arc::new(StrategyContext {
            responses,
            structured,
            fetcher,
            navigation_fallback: config.navigation_fallback_key()?,
            generic_fallback: config.generic_fallback_key()?,
            pending: PendingWrites::new(),
        });
        Ok(Self {
            router: Router::new(config.api_origin_pattern()?),
            cache_first: CacheFirst::new(Arc::clone(&ctx)),
            network_first: NetworkFirstStructured::new(Arc::clone(&ctx)),
            opportunistic: OpportunisticCache::new(Arc::clone(&ctx)),
            ctx,
            counters: DispatchCounters::default(),
        })
    }

    pub fn classify(&self, request: &InterceptedRequest) -> StrategyKind {
        self.router.classify(request)
    }

    /// Serve one request. Never fails: a strategy error becomes the
    /// degraded response.
    pub async fn handle(&self, request: &InterceptedRequest) -> CachedResponse {
        let kind = self.classify(request);
        let span = tracing::info_span!(
            "intercept",
            id = %Uuid::new_v4(),
            method = %request.method(),
            url = %request.url(),
            strategy = ?kind,
        );

        async {
            match self.dispatch(kind, request).await {
                Ok(response) => {
                    tracing::debug!("{} via {:?}", response.status(), kind);
                    response
                }
                // Bypassed requests must not reach either store, not even
                // the generic fallback lookup.
                Err(err) if kind == StrategyKind::Bypass => {
                    tracing::warn!("Bypassed request failed: {}", err);
                    self.counters.degraded.fetch_add(1, Ordering::Relaxed);
                    CachedResponse::service_unavailable()
                }
                Err(err) => {
                    if err.is_recoverable() {
                        tracing::warn!("{}; serving degraded response", err);
                    } else {
                        tracing::error!("{}; serving degraded response", err);
                    }
                    self.counters.degraded.fetch_add(1, Ordering::Relaxed);
                    self.ctx.degraded_response().await
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Run the strategy for `kind` and surface its error, if any
    pub async fn dispatch(
        &self,
        kind: StrategyKind,
        request: &InterceptedRequest,
    ) -> Result<CachedResponse, CacheError> {
        self.counters.record(kind);
        let strategy: &dyn Strategy = match kind {
            StrategyKind::Bypass => return self.ctx.fetch(request).await,
            StrategyKind::NetworkFirstStructured => &self.network_first,
            StrategyKind::CacheFirst => &self.cache_first,
            StrategyKind::OpportunisticCache => &self.opportunistic,
        };
        strategy.serve(request).await
    }

    pub async fn status(&self) -> InterceptorStatus {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        InterceptorStatus {
            active_generation: self
                .ctx
                .responses
                .active()
                .await
                .map(|handle| handle.name().to_string()),
            bypass: load(&self.counters.bypass),
            network_first_structured: load(&self.counters.network_first_structured),
            cache_first: load(&self.counters.cache_first),
            opportunistic: load(&self.counters.opportunistic),
            degraded: load(&self.counters.degraded),
            pending_writes: self.ctx.pending.in_flight(),
            response_store: self.ctx.responses.stats(),
            structured_store: self.ctx.structured.stats(),
        }
    }

    /// Process stop hook: wait for every background store write
    pub async fn shutdown(&self) {
        let outstanding = self.ctx.pending.in_flight();
        if outstanding > 0 {
            tracing::info!("Waiting for {} pending store writes", outstanding);
        }
        self.ctx.pending.drain().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HttpMethod, RequestMode, SOURCE_HEADER};
    use crate::network::testing::ScriptedFetcher;
    use serde_json::{json, Value};
    use std::path::Path;
    use tempfile::tempdir;

    const API_ITEMS: &str = "https://api.example.com/v1/items";
    const PAGE: &str = "https://app.example.com/inbox";
    const SCRIPT: &str = "https://app.example.com/app.js";
    const OFFLINE: &str = "https://app.example.com/offline.html";

    fn config() -> OfflineConfig {
        OfflineConfig {
            app_origin: "https://app.example.com".into(),
            api_origin: "https://api.example.com".into(),
            ..Default::default()
        }
    }

    fn interceptor(dir: &Path, config: &OfflineConfig, fetcher: Arc<ScriptedFetcher>) -> Interceptor {
        Interceptor::new(
            config,
            Arc::new(ResponseStore::new(dir).unwrap()),
            Arc::new(StructuredStore::new(dir).unwrap()),
            fetcher,
        )
        .unwrap()
    }

    async fn install_offline_page(interceptor: &Interceptor) {
        let store = &interceptor.ctx.responses;
        let handle = store.open_generation("offline-cache-test").await.unwrap();
        let key = interceptor.ctx.navigation_fallback.clone();
        store
            .put(&handle, &key, &CachedResponse::new(200).with_body("offline"))
            .await
            .unwrap();
        store.activate("offline-cache-test").await.unwrap();
    }

    #[tokio::test]
    async fn bypass_never_touches_either_store() {
        let dir = tempdir().unwrap();
        let fetcher = Arc::new(ScriptedFetcher::default());
        let interceptor = interceptor(dir.path(), &config(), Arc::clone(&fetcher));
        let request =
            InterceptedRequest::get("chrome-extension://abc/popup.html", RequestMode::Navigate)
                .unwrap();

        let response = interceptor.handle(&request).await;
        assert_eq!(response.status(), 503);
        assert_eq!(fetcher.calls(), 1, "handed to the network layer untouched");

        let status = interceptor.status().await;
        assert_eq!(status.bypass, 1);
        assert_eq!(status.response_store, StoreStats::default());
        assert_eq!(status.structured_store, StoreStats::default());
    }

    #[tokio::test]
    async fn requests_are_dispatched_by_classification() {
        let dir = tempdir().unwrap();
        let fetcher = Arc::new(ScriptedFetcher::default());
        let interceptor = interceptor(dir.path(), &config(), Arc::clone(&fetcher));
        install_offline_page(&interceptor).await;
        fetcher.respond(API_ITEMS, 200, r#"[{"id":1}]"#);
        fetcher.respond(PAGE, 200, "<h1>inbox</h1>");
        fetcher.respond(SCRIPT, 200, "console.log(1)");

        interceptor
            .handle(&InterceptedRequest::get(API_ITEMS, RequestMode::CrossOriginApi).unwrap())
            .await;
        interceptor
            .handle(&InterceptedRequest::get(PAGE, RequestMode::Navigate).unwrap())
            .await;
        interceptor
            .handle(&InterceptedRequest::get(SCRIPT, RequestMode::Subresource).unwrap())
            .await;
        interceptor.shutdown().await;

        let status = interceptor.status().await;
        assert_eq!(status.active_generation.as_deref(), Some("offline-cache-test"));
        assert_eq!(
            (status.network_first_structured, status.cache_first, status.opportunistic),
            (1, 1, 1)
        );
        assert_eq!(status.pending_writes, 0);
        assert_eq!(
            interceptor.ctx.structured.get(API_ITEMS).await.unwrap(),
            Some(json!([{"id": 1}]))
        );
    }

    #[tokio::test]
    async fn offline_api_listing_is_an_empty_collection() {
        let dir = tempdir().unwrap();
        let interceptor = interceptor(dir.path(), &config(), Arc::new(ScriptedFetcher::default()));

        let response = interceptor
            .handle(&InterceptedRequest::get(API_ITEMS, RequestMode::CrossOriginApi).unwrap())
            .await;
        assert_eq!(response.status(), 200);
        let body: Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body, json!([]));
    }

    #[tokio::test]
    async fn exhausted_cache_first_degrades_to_503() {
        let dir = tempdir().unwrap();
        let interceptor = interceptor(dir.path(), &config(), Arc::new(ScriptedFetcher::default()));

        let response = interceptor
            .handle(&InterceptedRequest::get(PAGE, RequestMode::Navigate).unwrap())
            .await;
        assert_eq!(response.status(), 503);
        assert_eq!(response.header(SOURCE_HEADER), Some("degraded"));
        assert_eq!(interceptor.status().await.degraded, 1);
    }

    #[tokio::test]
    async fn serialized_status_carries_store_counters() {
        let dir = tempdir().unwrap();
        let fetcher = Arc::new(ScriptedFetcher::default());
        let interceptor = interceptor(dir.path(), &config(), Arc::clone(&fetcher));
        install_offline_page(&interceptor).await;
        fetcher.respond(PAGE, 200, "<h1>inbox</h1>");
        interceptor
            .handle(&InterceptedRequest::get(PAGE, RequestMode::Navigate).unwrap())
            .await;

        let status = interceptor.status().await;
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["cache_first"], json!(1));
        assert_eq!(
            value["response_store"]["writes"],
            json!(status.response_store.writes)
        );
        assert!(status.response_store.writes >= 2);
        assert_eq!(value["structured_store"], json!({"reads": 0, "writes": 0}));
    }

    #[tokio::test]
    async fn generic_fallback_replaces_the_synthesised_503() {
        let dir = tempdir().unwrap();
        let config = OfflineConfig {
            generic_fallback: Some("/unavailable.json".into()),
            ..config()
        };
        let interceptor = interceptor(dir.path(), &config, Arc::new(ScriptedFetcher::default()));
        let store = &interceptor.ctx.responses;
        let handle = store.open_generation("g1").await.unwrap();
        let key = config.generic_fallback_key().unwrap().unwrap();
        store
            .put(&handle, &key, &CachedResponse::json(&json!({"offline": true})))
            .await
            .unwrap();
        store.activate("g1").await.unwrap();

        // The navigation fallback is not stored, so CacheFirst fails outright.
        let response = interceptor
            .handle(&InterceptedRequest::get(PAGE, RequestMode::Navigate).unwrap())
            .await;
        assert_eq!(response.status(), 200);
        let body: Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body, json!({"offline": true}));
    }

    #[tokio::test]
    async fn offline_navigation_gets_offline_page() {
        let dir = tempdir().unwrap();
        let interceptor = interceptor(dir.path(), &config(), Arc::new(ScriptedFetcher::default()));
        install_offline_page(&interceptor).await;

        let request = InterceptedRequest::new(
            HttpMethod::Get,
            url::Url::parse(PAGE).unwrap(),
            RequestMode::Navigate,
        );
        let response = interceptor.handle(&request).await;
        assert_eq!(response.body().as_ref(), b"offline");
        assert_eq!(interceptor.ctx.navigation_fallback.url, OFFLINE);
        assert_eq!(interceptor.status().await.degraded, 0);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let dir = tempdir().unwrap();
        let config = OfflineConfig {
            api_origin: "ftp://api.example.com".into(),
            ..config()
        };
        let result = Interceptor::new(
            &config,
            Arc::new(ResponseStore::new(dir.path()).unwrap()),
            Arc::new(StructuredStore::new(dir.path()).unwrap()),
            Arc::new(ScriptedFetcher::default()),
        );
        assert!(matches!(result, Err(ConfigError::Pattern(_))));
    }
}
