//! Local interception endpoint
//!
//! Accepts absolute-form HTTP/1.1 proxy requests and answers each one
//! through [`Interceptor::handle`]. CONNECT tunnels are refused: the
//! orchestrator only sees plaintext requests.

use crate::api::Interceptor;
use crate::models::{CachedResponse, HttpMethod, InterceptedRequest, RequestMode};
use anyhow::{anyhow, Context};
use bytes::Bytes;
use http::header::{ACCEPT, ORIGIN};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use url::Url;

/// How often the accept loop re-checks the running flag
const ACCEPT_POLL: Duration = Duration::from_millis(500);

const SEC_FETCH_MODE: &str = "sec-fetch-mode";

/// Headers describing the stored body's framing; hyper recomputes them
const FRAMING_HEADERS: &[&str] = &["content-length", "transfer-encoding", "connection"];

/// Accept connections until `running` is cleared.
///
/// One task per connection; each request on it is handed to the interceptor.
pub async fn run_server(
    interceptor: Arc<Interceptor>,
    listener: TcpListener,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let local = listener.local_addr().context("reading listener address")?;
    tracing::info!("Interception endpoint listening on {}", local);

    while running.load(Ordering::SeqCst) {
        let (socket, peer) = match tokio::time::timeout(ACCEPT_POLL, listener.accept()).await {
            Ok(Ok(accepted)) => accepted,
            Ok(Err(e)) => {
                tracing::error!("Accept error: {}", e);
                continue;
            }
            Err(_) => continue,
        };

        tracing::debug!("Connection from {}", peer);
        let interceptor = Arc::clone(&interceptor);
        tokio::spawn(async move {
            let service = service_fn(move |req: Request<Incoming>| {
                let interceptor = Arc::clone(&interceptor);
                async move { Ok::<_, Infallible>(serve(&interceptor, req, peer).await) }
            });
            if let Err(e) = http1::Builder::new()
                .serve_connection(TokioIo::new(socket), service)
                .await
            {
                // Clients closing mid-request are routine.
                tracing::debug!("Connection from {} ended: {}", peer, e);
            }
        });
    }

    tracing::info!("Interception endpoint stopped");
    Ok(())
}

/// Bind `addr` and run until `running` is cleared
pub async fn bind_and_run(
    interceptor: Arc<Interceptor>,
    addr: &str,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding interception endpoint to {}", addr))?;
    run_server(interceptor, listener, running).await
}

async fn serve(
    interceptor: &Interceptor,
    req: Request<Incoming>,
    peer: SocketAddr,
) -> Response<Full<Bytes>> {
    if req.method() == Method::CONNECT {
        tracing::debug!("Refusing CONNECT from {}", peer);
        return plain_response(StatusCode::NOT_IMPLEMENTED, "CONNECT is not supported");
    }

    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            tracing::warn!("Failed to read request body from {}: {}", peer, e);
            return plain_response(StatusCode::BAD_REQUEST, "Unable to read request body");
        }
    };

    let request = match intercepted_request(&parts, body) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!("Rejected request from {}: {:#}", peer, e);
            return plain_response(StatusCode::BAD_REQUEST, "Expected an absolute-form request");
        }
    };

    let response = interceptor.handle(&request).await;
    into_hyper_response(response)
}

/// Build the orchestrator's request from a proxied HTTP request
fn intercepted_request(
    parts: &http::request::Parts,
    body: Bytes,
) -> anyhow::Result<InterceptedRequest> {
    if parts.uri.scheme().is_none() {
        return Err(anyhow!("request target {} is not absolute", parts.uri));
    }
    let url = Url::parse(&parts.uri.to_string())
        .with_context(|| format!("parsing request target {}", parts.uri))?;
    let method = HttpMethod::from_str_lossy(parts.method.as_str());
    let mode = request_mode(method, &url, &parts.headers);

    let mut request = InterceptedRequest::new(method, url, mode);
    for (name, value) in &parts.headers {
        if let Ok(value) = value.to_str() {
            request = request.with_header(name.as_str(), value);
        }
    }
    if !body.is_empty() {
        request = request.with_body(body);
    }
    Ok(request)
}

/// Derive the request mode from `Sec-Fetch-Mode`, falling back to a
/// heuristic for clients that do not send it
fn request_mode(method: HttpMethod, url: &Url, headers: &HeaderMap) -> RequestMode {
    let cross_origin = || {
        header_str(headers, ORIGIN.as_str())
            .and_then(|origin| Url::parse(origin).ok())
            .is_some_and(|origin| origin.origin() != url.origin())
    };

    match header_str(headers, SEC_FETCH_MODE).map(str::to_ascii_lowercase).as_deref() {
        Some("navigate") => RequestMode::Navigate,
        Some("cors") if cross_origin() => RequestMode::CrossOriginApi,
        Some("cors") | Some("no-cors") | Some("same-origin") => RequestMode::Subresource,
        Some(_) => RequestMode::Other,
        None => {
            let wants_html = header_str(headers, ACCEPT.as_str())
                .is_some_and(|accept| accept.contains("text/html"));
            if method == HttpMethod::Get && wants_html {
                RequestMode::Navigate
            } else if cross_origin() {
                RequestMode::CrossOriginApi
            } else {
                RequestMode::Other
            }
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn into_hyper_response(response: CachedResponse) -> Response<Full<Bytes>> {
    let status = StatusCode::from_u16(response.status()).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut out = Response::new(Full::new(response.body().clone()));
    *out.status_mut() = status;

    let headers = out.headers_mut();
    for (name, value) in response.headers() {
        if FRAMING_HEADERS.iter().any(|h| name.eq_ignore_ascii_case(h)) {
            continue;
        }
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => tracing::debug!("Dropping unrepresentable header {:?}", name),
        }
    }
    out
}

fn plain_response(status: StatusCode, message: &'static str) -> Response<Full<Bytes>> {
    let mut out = Response::new(Full::new(Bytes::from_static(message.as_bytes())));
    *out.status_mut() = status;
    out.headers_mut().insert(
        http::header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain"),
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OfflineConfig;
    use crate::models::SOURCE_HEADER;
    use crate::network::testing::ScriptedFetcher;
    use crate::storage::{ResponseStore, StructuredStore};

    fn parts(uri: &str, headers: &[(&str, &str)]) -> http::request::Parts {
        let mut builder = Request::builder().method("GET").uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn sec_fetch_mode_drives_the_request_mode() {
        let url = Url::parse("https://api.example.com/v1/items").unwrap();
        let mode = |headers: &[(&str, &str)]| {
            request_mode(HttpMethod::Get, &url, &parts(url.as_str(), headers).headers)
        };

        assert_eq!(mode(&[("sec-fetch-mode", "navigate")]), RequestMode::Navigate);
        assert_eq!(
            mode(&[("sec-fetch-mode", "cors"), ("origin", "https://app.example.com")]),
            RequestMode::CrossOriginApi
        );
        assert_eq!(
            mode(&[("sec-fetch-mode", "cors"), ("origin", "https://api.example.com")]),
            RequestMode::Subresource
        );
        assert_eq!(mode(&[("sec-fetch-mode", "no-cors")]), RequestMode::Subresource);
        assert_eq!(mode(&[("sec-fetch-mode", "websocket")]), RequestMode::Other);
    }

    #[test]
    fn missing_sec_fetch_mode_uses_accept_heuristic() {
        let url = Url::parse("https://app.example.com/inbox").unwrap();
        let html = parts(url.as_str(), &[("accept", "text/html,application/xhtml+xml")]);
        assert_eq!(
            request_mode(HttpMethod::Get, &url, &html.headers),
            RequestMode::Navigate
        );
        assert_eq!(
            request_mode(HttpMethod::Post, &url, &html.headers),
            RequestMode::Other
        );
        let bare = parts(url.as_str(), &[]);
        assert_eq!(request_mode(HttpMethod::Get, &url, &bare.headers), RequestMode::Other);
    }

    #[test]
    fn origin_form_targets_are_rejected() {
        let relative = parts("/inbox", &[("host", "app.example.com")]);
        assert!(intercepted_request(&relative, Bytes::new()).is_err());

        let absolute = parts("http://app.example.com/inbox?tab=1", &[("x-trace", "1")]);
        let request = intercepted_request(&absolute, Bytes::from_static(b"")).unwrap();
        assert_eq!(request.url().as_str(), "http://app.example.com/inbox?tab=1");
        assert_eq!(request.method(), HttpMethod::Get);
        assert!(request.body().is_none());
        assert!(request.headers().iter().any(|(n, v)| n == "x-trace" && v == "1"));
    }

    #[test]
    fn cached_headers_survive_but_framing_is_recomputed() {
        let cached = CachedResponse::new(200)
            .with_header("Content-Type", "text/html")
            .with_header("Content-Length", "999")
            .with_header("bad header", "x")
            .with_body("<p>hi</p>");

        let response = into_hyper_response(cached);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "text/html");
        assert!(response.headers().get("content-length").is_none());
        assert_eq!(response.headers().len(), 1);
    }

    #[tokio::test]
    #[ignore = "Requires opening local TCP ports"]
    async fn proxied_request_is_answered_by_the_interceptor() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(ScriptedFetcher::default());
        fetcher.respond("http://app.example.com/app.js", 200, "console.log(1)");
        let config = OfflineConfig {
            app_origin: "http://app.example.com".into(),
            api_origin: "http://api.example.com".into(),
            ..Default::default()
        };
        let interceptor = Arc::new(
            Interceptor::new(
                &config,
                Arc::new(ResponseStore::new(dir.path()).unwrap()),
                Arc::new(StructuredStore::new(dir.path()).unwrap()),
                fetcher,
            )
            .unwrap(),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let running = Arc::new(AtomicBool::new(true));
        let server = tokio::spawn(run_server(
            Arc::clone(&interceptor),
            listener,
            Arc::clone(&running),
        ));

        let client = reqwest::Client::builder()
            .proxy(reqwest::Proxy::http(format!("http://{addr}")).unwrap())
            .build()
            .unwrap();
        let live = client
            .get("http://app.example.com/app.js")
            .send()
            .await
            .unwrap();
        assert_eq!(live.status(), 200);
        assert_eq!(live.text().await.unwrap(), "console.log(1)");

        // Nothing scripted and nothing stored: the degraded response.
        let missing = client
            .get("http://app.example.com/missing.js")
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), 503);
        assert_eq!(missing.headers()[SOURCE_HEADER], "degraded");

        running.store(false, Ordering::SeqCst);
        server.await.unwrap().unwrap();
    }
}
