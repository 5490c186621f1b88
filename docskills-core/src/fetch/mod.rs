//! Remote text fetching
//!
//! Every artifact and registry download goes through a [`Fetcher`]. All
//! clones of a fetcher share one admission gate, so no more than
//! [`MAX_CONCURRENT_FETCHES`] requests are in flight at once. Waiters are
//! admitted in FIFO order as permits are released.
//!
//! ```text
//! fetch(url, validator)
//!     │
//!     ├── acquire gate permit (queues when 5 are in flight)
//!     ├── conditional GET with timeout
//!     ├── 304           → FetchResult { not_modified: true }
//!     ├── non-2xx       → FetchError::Status
//!     ├── text/html     → FetchError::HtmlContent
//!     ├── > 10 MB       → FetchError::TooLarge
//!     └── 2xx text      → FetchResult { content, etag, last_modified }
//! ```

mod transport;

pub use transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};

use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::error::FetchError;

/// Process-wide cap on in-flight fetches
pub const MAX_CONCURRENT_FETCHES: usize = 5;

/// Per-fetch timeout
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest accepted body (10 MB)
pub const MAX_CONTENT_BYTES: u64 = 10 * 1024 * 1024;

/// Conditional request validators from a previous fetch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validator {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl Validator {
    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }
}

/// Outcome of a successful fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResult {
    /// Body text, empty when `not_modified`
    pub content: String,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    /// The server confirmed the cached copy is current
    pub not_modified: bool,
}

/// Fetches remote text under the shared concurrency gate
#[derive(Clone)]
pub struct Fetcher {
    transport: Arc<dyn HttpTransport>,
    gate: Arc<Semaphore>,
    timeout: Duration,
    max_bytes: u64,
}

impl Fetcher {
    /// Create a fetcher over the given transport with default limits
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            gate: Arc::new(Semaphore::new(MAX_CONCURRENT_FETCHES)),
            timeout: FETCH_TIMEOUT,
            max_bytes: MAX_CONTENT_BYTES,
        }
    }

    /// Create a fetcher backed by `reqwest`
    pub fn with_http() -> anyhow::Result<Self> {
        Ok(Self::new(Arc::new(ReqwestTransport::new()?)))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Replace the gate with one of a different capacity
    pub fn with_concurrency(mut self, permits: usize) -> Self {
        self.gate = Arc::new(Semaphore::new(permits));
        self
    }

    /// Gate permits not currently held
    pub fn available_slots(&self) -> usize {
        self.gate.available_permits()
    }

    /// Fetch `url`, sending `validator` as conditional request headers
    pub async fn fetch(
        &self,
        url: &str,
        validator: Option<&Validator>,
    ) -> Result<FetchResult, FetchError> {
        // Held until this function returns, on every path
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| FetchError::Transport {
                url: url.to_string(),
                message: "fetch gate closed".to_string(),
            })?;

        let request = HttpRequest {
            url: url.to_string(),
            if_none_match: validator.and_then(|v| v.etag.clone()),
            if_modified_since: validator.and_then(|v| v.last_modified.clone()),
            max_body_bytes: self.max_bytes,
        };

        tracing::debug!(
            url,
            conditional = validator.is_some_and(|v| !v.is_empty()),
            "fetching"
        );

        let response = match tokio::time::timeout(self.timeout, self.transport.get(&request)).await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(FetchError::Timeout {
                    url: url.to_string(),
                    seconds: self.timeout.as_secs(),
                })
            }
        };

        self.interpret(url, validator, response)
    }

    fn interpret(
        &self,
        url: &str,
        validator: Option<&Validator>,
        response: HttpResponse,
    ) -> Result<FetchResult, FetchError> {
        if response.status == 304 {
            let previous = validator.cloned().unwrap_or_default();
            return Ok(FetchResult {
                content: String::new(),
                etag: response.etag.or(previous.etag),
                last_modified: response.last_modified.or(previous.last_modified),
                not_modified: true,
            });
        }

        if !(200..300).contains(&response.status) {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status,
            });
        }

        if let Some(content_type) = &response.content_type {
            if content_type.to_ascii_lowercase().contains("text/html") {
                return Err(FetchError::HtmlContent {
                    url: url.to_string(),
                    content_type: content_type.clone(),
                });
            }
        }

        let size = response
            .content_length
            .unwrap_or(0)
            .max(response.body.len() as u64);
        if size > self.max_bytes {
            return Err(FetchError::TooLarge {
                url: url.to_string(),
                size,
                limit: self.max_bytes,
            });
        }

        let content = String::from_utf8(response.body).map_err(|_| FetchError::InvalidUtf8 {
            url: url.to_string(),
        })?;

        Ok(FetchResult {
            content,
            etag: response.etag,
            last_modified: response.last_modified,
            not_modified: false,
        })
    }
}

/// Content checksum as stored in the lockfile (`sha256:<hex>`)
pub fn checksum(content: &str) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(content.as_bytes())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted transport that records requests and concurrency
    #[derive(Default)]
    struct ScriptedTransport {
        responses: HashMap<String, HttpResponse>,
        delay: Duration,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedTransport {
        fn with(mut self, url: &str, response: HttpResponse) -> Self {
            self.responses.insert(url.to_string(), response);
            self
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn get(&self, request: &HttpRequest) -> Result<HttpResponse, FetchError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request.clone());

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(self
                .responses
                .get(&request.url)
                .cloned()
                .unwrap_or_else(|| HttpResponse::status(404)))
        }
    }

    fn fetcher(transport: ScriptedTransport) -> (Fetcher, Arc<ScriptedTransport>) {
        let transport = Arc::new(transport);
        (Fetcher::new(transport.clone()), transport)
    }

    #[tokio::test]
    async fn test_fetch_returns_content_and_validators() {
        let (fetcher, _) = fetcher(ScriptedTransport::default().with(
            "https://react.dev/llms.txt",
            HttpResponse::text("# React")
                .with_etag("\"v1\"")
                .with_last_modified("Tue, 01 Jul 2025 00:00:00 GMT"),
        ));

        let result = fetcher
            .fetch("https://react.dev/llms.txt", None)
            .await
            .unwrap();

        assert_eq!(result.content, "# React");
        assert_eq!(result.etag.as_deref(), Some("\"v1\""));
        assert_eq!(
            result.last_modified.as_deref(),
            Some("Tue, 01 Jul 2025 00:00:00 GMT")
        );
        assert!(!result.not_modified);
    }

    #[tokio::test]
    async fn test_not_modified_preserves_prior_validator() {
        let (fetcher, transport) = fetcher(
            ScriptedTransport::default().with("https://astro.build/llms.txt", HttpResponse::status(304)),
        );
        let validator = Validator {
            etag: Some("\"v1\"".to_string()),
            last_modified: None,
        };

        let result = fetcher
            .fetch("https://astro.build/llms.txt", Some(&validator))
            .await
            .unwrap();

        assert!(result.not_modified);
        assert!(result.content.is_empty());
        assert_eq!(result.etag.as_deref(), Some("\"v1\""));

        let requests = transport.requests.lock().unwrap();
        assert_eq!(requests[0].if_none_match.as_deref(), Some("\"v1\""));
        assert_eq!(requests[0].if_modified_since, None);
    }

    #[tokio::test]
    async fn test_error_status_carries_code() {
        let (fetcher, _) = fetcher(ScriptedTransport::default());
        let err = fetcher
            .fetch("https://example.com/missing.txt", None)
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(404));
    }

    #[tokio::test]
    async fn test_html_is_rejected() {
        let (fetcher, _) = fetcher(ScriptedTransport::default().with(
            "https://example.com/docs",
            HttpResponse::text("<html></html>").with_content_type("text/html; charset=utf-8"),
        ));

        let err = fetcher
            .fetch("https://example.com/docs", None)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::HtmlContent { .. }));
    }

    #[tokio::test]
    async fn test_oversize_declared_and_actual_bodies_are_rejected() {
        let mut declared = HttpResponse::text("small");
        declared.content_length = Some(MAX_CONTENT_BYTES + 1);

        let (fetcher, _) = fetcher(
            ScriptedTransport::default()
                .with("https://example.com/declared.txt", declared)
                .with("https://example.com/actual.txt", HttpResponse::text("x".repeat(64))),
        );

        let err = fetcher
            .fetch("https://example.com/declared.txt", None)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::TooLarge { .. }));

        let err = fetcher
            .with_max_bytes(32)
            .fetch("https://example.com/actual.txt", None)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::TooLarge { size: 64, limit: 32, .. }));
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_rejected() {
        let mut response = HttpResponse::text("");
        response.body = vec![0xff, 0xfe, 0xfd];
        response.content_length = Some(3);

        let (fetcher, _) =
            fetcher(ScriptedTransport::default().with("https://example.com/bin", response));
        let err = fetcher.fetch("https://example.com/bin", None).await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidUtf8 { .. }));
    }

    #[tokio::test]
    async fn test_timeout_releases_slot() {
        let (fetcher, _) = fetcher(
            ScriptedTransport::default()
                .with("https://slow.example.com/llms.txt", HttpResponse::text("late"))
                .with_delay(Duration::from_secs(5)),
        );
        let fetcher = fetcher.with_timeout(Duration::from_millis(50));

        let err = fetcher
            .fetch("https://slow.example.com/llms.txt", None)
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Timeout { .. }));
        assert_eq!(fetcher.available_slots(), MAX_CONCURRENT_FETCHES);
    }

    #[tokio::test]
    async fn test_slots_released_after_success_and_failure() {
        let (fetcher, _) = fetcher(
            ScriptedTransport::default().with("https://example.com/ok.txt", HttpResponse::text("ok")),
        );

        fetcher.fetch("https://example.com/ok.txt", None).await.unwrap();
        let _ = fetcher.fetch("https://example.com/404.txt", None).await;

        assert_eq!(fetcher.available_slots(), MAX_CONCURRENT_FETCHES);
    }

    #[tokio::test]
    async fn test_gate_caps_concurrent_requests() {
        let mut transport = ScriptedTransport::default().with_delay(Duration::from_millis(20));
        for i in 0..20 {
            transport = transport.with(
                &format!("https://example.com/{i}.txt"),
                HttpResponse::text(format!("doc {i}")),
            );
        }
        let (fetcher, transport) = fetcher(transport);

        let fetches = (0..20).map(|i| {
            let fetcher = fetcher.clone();
            async move { fetcher.fetch(&format!("https://example.com/{i}.txt"), None).await }
        });
        let results = futures::future::join_all(fetches).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(
            transport.max_in_flight.load(Ordering::SeqCst),
            MAX_CONCURRENT_FETCHES
        );
        assert_eq!(transport.requests.lock().unwrap().len(), 20);
    }

    #[tokio::test]
    async fn test_reqwest_transport_end_to_end() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/big.txt")
            .with_status(200)
            .with_header("content-type", "text/plain")
            .with_body("x".repeat(4096))
            .create_async()
            .await;

        let fetcher = Fetcher::with_http().unwrap().with_max_bytes(1024);
        let err = fetcher
            .fetch(&format!("{}/big.txt", server.url()), None)
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::TooLarge { .. }));
    }

    #[test]
    fn test_checksum_format() {
        let sum = checksum("hello");
        assert!(sum.starts_with("sha256:"));
        assert_eq!(sum.len(), "sha256:".len() + 64);
        assert_eq!(sum, checksum("hello"));
        assert_ne!(sum, checksum("hello!"));
    }
}
