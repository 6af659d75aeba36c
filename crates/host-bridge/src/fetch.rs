//! The network fetch capability.
//!
//! The rewriting core never opens sockets itself; it asks the host to fetch
//! on its behalf (e.g. to hash a script for a CSP `'sha256-…'` source).

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use http::{HeaderMap, Method, StatusCode};
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: HeaderMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// Final URL after redirects.
    pub url: String,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl FetchResponse {
    /// A `200 OK` response with `body` and no headers.
    pub fn ok(url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            url: url.into(),
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error fetching {url}: {reason}")]
    Network { url: String, reason: String },

    #[error("fetch of {url} returned {status}")]
    Status { url: String, status: StatusCode },
}

/// Host-provided fetch.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError>;
}

/// Fetcher answering from a fixed URL → response table. Unknown URLs fail
/// with [`FetchError::Network`]. Used by embedders without network access
/// and in tests.
#[derive(Debug, Default)]
pub struct StaticFetcher {
    responses: DashMap<String, FetchResponse>,
    calls: AtomicUsize,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, response: FetchResponse) {
        self.responses.insert(response.url.clone(), response);
    }

    /// Number of fetches served or refused so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(method = %request.method, url = %request.url, "static fetch");
        self.responses
            .get(&request.url)
            .map(|r| r.value().clone())
            .ok_or(FetchError::Network {
                url: request.url,
                reason: "no route".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_fetcher_serves_known_urls() {
        let fetcher = StaticFetcher::new();
        fetcher.insert(FetchResponse::ok("https://site.example/a.js", "alert(1)"));

        let resp = fetcher
            .fetch(FetchRequest::get("https://site.example/a.js"))
            .await
            .unwrap();
        assert!(resp.is_success());
        assert_eq!(resp.body, b"alert(1)");

        let err = fetcher
            .fetch(FetchRequest::get("https://site.example/missing.js"))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Network { .. }));
        assert_eq!(fetcher.calls(), 2);
    }
}
