//! HTTP transport behind the fetcher
//!
//! The fetcher only needs a conditional GET that reports status, validators
//! and a size-bounded body. Keeping that behind a trait lets tests count and
//! script requests without a network.

use async_trait::async_trait;
use reqwest::header::{
    HeaderName, CONTENT_TYPE, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED,
};

use crate::error::FetchError;

/// A conditional GET request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    /// Sent as `If-None-Match`
    pub if_none_match: Option<String>,
    /// Sent as `If-Modified-Since`
    pub if_modified_since: Option<String>,
    /// Transports stop buffering once the body grows past this
    pub max_body_bytes: u64,
}

/// What the fetcher needs to know about a response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    /// Declared `Content-Length`, if any
    pub content_length: Option<u64>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    /// Empty for non-2xx responses and for declared oversize bodies
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// A 200 response with a plain text body
    pub fn text(body: impl Into<String>) -> Self {
        let body = body.into().into_bytes();
        Self {
            status: 200,
            content_type: Some("text/plain; charset=utf-8".to_string()),
            content_length: Some(body.len() as u64),
            body,
            ..Default::default()
        }
    }

    /// A bodiless response with the given status
    pub fn status(status: u16) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    pub fn with_last_modified(mut self, last_modified: impl Into<String>) -> Self {
        self.last_modified = Some(last_modified.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Performs conditional GET requests
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, request: &HttpRequest) -> Result<HttpResponse, FetchError>;
}

/// `reqwest` backed transport
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Create a transport with the default client
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("docskills/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {e}"))?;

        Ok(Self::with_client(client))
    }

    /// Use a preconfigured client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn transport_error(url: &str, err: reqwest::Error) -> FetchError {
    FetchError::Transport {
        url: url.to_string(),
        message: err.to_string(),
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, request: &HttpRequest) -> Result<HttpResponse, FetchError> {
        let mut builder = self.client.get(&request.url);
        if let Some(etag) = &request.if_none_match {
            builder = builder.header(IF_NONE_MATCH, etag);
        }
        if let Some(last_modified) = &request.if_modified_since {
            builder = builder.header(IF_MODIFIED_SINCE, last_modified);
        }

        let mut response = builder
            .send()
            .await
            .map_err(|e| transport_error(&request.url, e))?;

        let header = |name: HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };

        let mut result = HttpResponse {
            status: response.status().as_u16(),
            content_type: header(CONTENT_TYPE),
            content_length: response.content_length(),
            etag: header(ETAG),
            last_modified: header(LAST_MODIFIED),
            body: Vec::new(),
        };

        let declared_too_large = result
            .content_length
            .is_some_and(|len| len > request.max_body_bytes);

        if response.status().is_success() && !declared_too_large {
            while let Some(chunk) = response
                .chunk()
                .await
                .map_err(|e| transport_error(&request.url, e))?
            {
                result.body.extend_from_slice(&chunk);
                if result.body.len() as u64 > request.max_body_bytes {
                    break;
                }
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(url: String) -> HttpRequest {
        HttpRequest {
            url,
            max_body_bytes: 1024,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_get_reads_body_and_validators() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/llms.txt")
            .with_status(200)
            .with_header("content-type", "text/plain")
            .with_header("etag", "\"abc\"")
            .with_header("last-modified", "Wed, 21 Oct 2025 07:28:00 GMT")
            .with_body("# React\n")
            .create_async()
            .await;

        let transport = ReqwestTransport::new().unwrap();
        let response = transport
            .get(&request(format!("{}/llms.txt", server.url())))
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"# React\n");
        assert_eq!(response.etag.as_deref(), Some("\"abc\""));
        assert_eq!(
            response.last_modified.as_deref(),
            Some("Wed, 21 Oct 2025 07:28:00 GMT")
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_get_sends_conditional_headers() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/llms.txt")
            .match_header("if-none-match", "\"abc\"")
            .match_header("if-modified-since", "Wed, 21 Oct 2025 07:28:00 GMT")
            .with_status(304)
            .create_async()
            .await;

        let transport = ReqwestTransport::new().unwrap();
        let mut req = request(format!("{}/llms.txt", server.url()));
        req.if_none_match = Some("\"abc\"".to_string());
        req.if_modified_since = Some("Wed, 21 Oct 2025 07:28:00 GMT".to_string());

        let response = transport.get(&req).await.unwrap();
        assert_eq!(response.status, 304);
        assert!(response.body.is_empty());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_get_skips_body_of_error_responses() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/missing.txt")
            .with_status(404)
            .with_body("not found")
            .create_async()
            .await;

        let transport = ReqwestTransport::new().unwrap();
        let response = transport
            .get(&request(format!("{}/missing.txt", server.url())))
            .await
            .unwrap();

        assert_eq!(response.status, 404);
        assert!(response.body.is_empty());
    }

    #[tokio::test]
    async fn test_connection_failure_is_a_transport_error() {
        let transport = ReqwestTransport::new().unwrap();
        let result = transport
            .get(&request("http://127.0.0.1:1/llms.txt".to_string()))
            .await;

        assert!(matches!(result, Err(FetchError::Transport { .. })));
    }
}
