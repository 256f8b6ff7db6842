use super::{forwardable_headers, FetchError, Fetcher};
use crate::models::{CachedResponse, HttpMethod, InterceptedRequest};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::time::Duration;

/// [`Fetcher`] backed by a shared `reqwest` client
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            // Never loop back through a system proxy that may point at us.
            .no_proxy()
            .build()?;
        Ok(Self { client })
    }

    async fn send(&self, request: &InterceptedRequest) -> Result<CachedResponse, FetchError> {
        let url = request.url();
        if !matches!(url.scheme(), "http" | "https") {
            return Err(FetchError::UnsupportedScheme(url.scheme().to_string()));
        }

        let mut builder = self
            .client
            .request(reqwest_method(request.method()), url.clone());
        for (key, value) in forwardable_headers(request) {
            if let Ok(header_name) = reqwest::header::HeaderName::try_from(key.as_str()) {
                if let Ok(header_value) = reqwest::header::HeaderValue::from_str(value) {
                    builder = builder.header(header_name, header_value);
                }
            }
        }
        if let Some(body) = request.body() {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(classify_error)?;
        let status = response.status().as_u16();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| Some((k.to_string(), v.to_str().ok()?.to_string())))
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Body(e.to_string()))?;

        tracing::trace!("Fetched {} {} -> {}", request.method(), url, status);
        Ok(CachedResponse::from_parts(status, headers, body))
    }
}

impl Fetcher for HttpFetcher {
    fn fetch<'a>(
        &'a self,
        request: &'a InterceptedRequest,
    ) -> BoxFuture<'a, Result<CachedResponse, FetchError>> {
        self.send(request).boxed()
    }
}

fn classify_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Transport(err.to_string())
    }
}

fn reqwest_method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Delete => reqwest::Method::DELETE,
        HttpMethod::Head => reqwest::Method::HEAD,
        HttpMethod::Options => reqwest::Method::OPTIONS,
        HttpMethod::Connect => reqwest::Method::CONNECT,
        HttpMethod::Trace => reqwest::Method::TRACE,
    }
}
