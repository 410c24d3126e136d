use futures::StreamExt;
use reqwest::header::{
    HeaderMap, HeaderValue, ACCEPT, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED,
};
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

use crate::config::Config;

const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB
const MAX_REDIRECTS: usize = 10;

const FEED_ACCEPT: &str =
    "application/rss+xml, application/atom+xml, application/xml;q=0.9, */*;q=0.8";

/// Errors that can occur while fetching a feed.
///
/// Any of these surfaces to API clients as "upstream unavailable".
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, redirect loop, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with status >= 400
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

impl FetchError {
    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Network(err)
        }
    }
}

/// Raw feed body plus the caching validators the server returned.
#[derive(Debug, Clone)]
pub struct FetchedBytes {
    pub body: Vec<u8>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

/// Classified result of a conditional fetch.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// HTTP 304: the validators still match.
    NotModified,
    Fetched(FetchedBytes),
}

/// HTTP client for feed documents.
///
/// Sends the configured `User-Agent`, an `Accept` header favouring RSS/Atom,
/// follows redirects, and enforces the configured timeout. Never retries;
/// retry policy belongs to the caller.
#[derive(Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    max_body_size: usize,
}

impl Fetcher {
    /// Build a fetcher from the server configuration.
    pub fn new(config: &Config) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.http_timeout())
            .connect_timeout(config.http_timeout().min(Duration::from_secs(10)))
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()?;

        Ok(Self {
            client,
            max_body_size: MAX_FEED_SIZE,
        })
    }

    /// Override the response body size cap.
    pub fn with_max_body_size(mut self, limit: usize) -> Self {
        self.max_body_size = limit;
        self
    }

    /// Fetch `url`, sending `If-None-Match` / `If-Modified-Since` when prior
    /// validators are supplied.
    ///
    /// # Returns
    ///
    /// - [`FetchOutcome::NotModified`] on HTTP 304
    /// - [`FetchOutcome::Fetched`] for any other status below 400
    ///
    /// # Errors
    ///
    /// - [`FetchError::HttpStatus`] for status >= 400
    /// - [`FetchError::Timeout`] when the request exceeds the configured timeout
    /// - [`FetchError::Network`] for transport failures
    /// - [`FetchError::ResponseTooLarge`] / [`FetchError::IncompleteResponse`] for bad bodies
    pub async fn fetch(
        &self,
        url: &str,
        prior_etag: Option<&str>,
        prior_last_modified: Option<&str>,
    ) -> Result<FetchOutcome, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(FEED_ACCEPT));
        insert_validator(&mut headers, IF_NONE_MATCH, prior_etag);
        insert_validator(&mut headers, IF_MODIFIED_SINCE, prior_last_modified);

        let response = self
            .client
            .get(url)
            .headers(headers)
            .send()
            .await
            .map_err(FetchError::from_reqwest)?;

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            tracing::debug!(feed = %url, "Feed not modified");
            return Ok(FetchOutcome::NotModified);
        }
        if status.as_u16() >= 400 {
            tracing::warn!(feed = %url, status = %status, "Feed fetch failed");
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        let etag = header_string(response.headers(), ETAG);
        let last_modified = header_string(response.headers(), LAST_MODIFIED);
        let body = read_limited_bytes(response, self.max_body_size).await?;

        tracing::debug!(
            feed = %url,
            bytes = body.len(),
            etag = ?etag,
            "Feed fetched"
        );

        Ok(FetchOutcome::Fetched(FetchedBytes {
            body,
            etag,
            last_modified,
        }))
    }
}

/// Stored validators come from remote servers; one that isn't a legal header
/// value is dropped, which just turns the request into an unconditional GET.
fn insert_validator(
    headers: &mut HeaderMap,
    name: reqwest::header::HeaderName,
    value: Option<&str>,
) {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return;
    };
    match HeaderValue::from_str(value) {
        Ok(v) => {
            headers.insert(name, v);
        }
        Err(e) => {
            tracing::warn!(header = %name, error = %e, "Ignoring unusable cached validator");
        }
    }
}

fn header_string(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub(crate) async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::from_reqwest)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    const VALID_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <item><guid>1</guid><title>Test</title></item>
</channel></rss>"#;

    /// Whole-value header match. `matchers::header` splits the received
    /// value on commas, which breaks on Accept lists and HTTP dates.
    fn raw_header(
        name: &'static str,
        value: &'static str,
    ) -> impl Fn(&Request) -> bool + Send + Sync {
        move |request: &Request| {
            request
                .headers
                .get(name)
                .is_some_and(|v| v.as_bytes() == value.as_bytes())
        }
    }

    fn fetcher() -> Fetcher {
        let config = Config {
            user_agent: "rsscast-test/1.0".to_string(),
            feed_http_timeout: 1.0,
            ..Config::default()
        };
        Fetcher::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_success_returns_body_and_validators() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .and(header("User-Agent", "rsscast-test/1.0"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .insert_header("ETag", "\"abc\"")
                    .insert_header("Last-Modified", "Wed, 21 Oct 2015 07:28:00 GMT"),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let outcome = fetcher()
            .fetch(&format!("{}/feed", mock_server.uri()), None, None)
            .await
            .unwrap();

        match outcome {
            FetchOutcome::Fetched(bytes) => {
                assert_eq!(bytes.body, VALID_RSS.as_bytes());
                assert_eq!(bytes.etag.as_deref(), Some("\"abc\""));
                assert_eq!(
                    bytes.last_modified.as_deref(),
                    Some("Wed, 21 Oct 2015 07:28:00 GMT")
                );
            }
            FetchOutcome::NotModified => panic!("Expected Fetched"),
        }
    }

    #[tokio::test]
    async fn test_accept_header_prefers_feeds() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(raw_header("Accept", FEED_ACCEPT))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .expect(1)
            .mount(&mock_server)
            .await;

        let outcome = fetcher().fetch(&mock_server.uri(), None, None).await.unwrap();
        assert!(matches!(outcome, FetchOutcome::Fetched(_)));
    }

    #[tokio::test]
    async fn test_conditional_headers_yield_not_modified() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("If-None-Match", "\"abc\""))
            .and(raw_header("If-Modified-Since", "Wed, 21 Oct 2015 07:28:00 GMT"))
            .respond_with(ResponseTemplate::new(304))
            .expect(1)
            .mount(&mock_server)
            .await;

        let outcome = fetcher()
            .fetch(
                &mock_server.uri(),
                Some("\"abc\""),
                Some("Wed, 21 Oct 2015 07:28:00 GMT"),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, FetchOutcome::NotModified));
    }

    #[tokio::test]
    async fn test_404_is_http_status_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let err = fetcher().fetch(&mock_server.uri(), None, None).await.unwrap_err();
        assert!(matches!(err, FetchError::HttpStatus(404)));
    }

    #[tokio::test]
    async fn test_500_is_not_retried() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&mock_server)
            .await;

        let err = fetcher().fetch(&mock_server.uri(), None, None).await.unwrap_err();
        assert!(matches!(err, FetchError::HttpStatus(500)));
    }

    #[tokio::test]
    async fn test_redirect_followed() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(
                ResponseTemplate::new(301)
                    .insert_header("Location", format!("{}/new", mock_server.uri()).as_str()),
            )
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/new"))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .mount(&mock_server)
            .await;

        let outcome = fetcher()
            .fetch(&format!("{}/old", mock_server.uri()), None, None)
            .await
            .unwrap();
        assert!(matches!(outcome, FetchOutcome::Fetched(_)));
    }

    #[tokio::test]
    async fn test_slow_server_times_out() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&mock_server)
            .await;

        let err = fetcher().fetch(&mock_server.uri(), None, None).await.unwrap_err();
        assert!(matches!(err, FetchError::Timeout), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(2048)))
            .mount(&mock_server)
            .await;

        let err = fetcher()
            .with_max_body_size(1024)
            .fetch(&mock_server.uri(), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::ResponseTooLarge));
    }

    #[tokio::test]
    async fn test_invalid_cached_validator_is_dropped() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .expect(1)
            .mount(&mock_server)
            .await;

        let outcome = fetcher()
            .fetch(&mock_server.uri(), Some("bad\nvalue"), None)
            .await
            .unwrap();
        assert!(matches!(outcome, FetchOutcome::Fetched(_)));
    }
}
