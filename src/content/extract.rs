use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::redirect::Policy;
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use super::html::element_to_text;
use crate::config::Config;
use crate::feed::{read_limited_bytes, FetchError};
use crate::util::{validate_feed_url, validate_public_url, UrlValidationError};

const MAX_PAGE_SIZE: usize = 5 * 1024 * 1024; // 5MB
const MAX_REDIRECTS: usize = 10;

const ARTICLE_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// CSS selectors targeting main article content across common blog platforms.
/// Order matters: more specific selectors first, generic fallbacks last.
const ARTICLE_SELECTORS: &[&str] = &[
    "article",
    "[itemprop=articleBody]",
    ".entry-content",
    ".post-content",
    ".article-content",
    ".article-body",
    ".post-body",
    "#content",
    "main",
    "[role=main]",
];

/// Page chrome removed before looking for the article.
const BOILERPLATE: &str = "nav, header, footer, aside, form, script, style, noscript, iframe";

/// A candidate with less text than this is probably a teaser card, not the article.
const MIN_ARTICLE_LEN: usize = 200;

#[derive(Debug, Error)]
enum ExtractError {
    #[error(transparent)]
    Url(#[from] UrlValidationError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("Not an HTML page: {0}")]
    NotHtml(String),
}

/// Best-effort full-article extraction for an entry's link.
///
/// Uses the feed fetcher's user agent and timeout but its own client, so
/// that redirects can be checked: links to loopback or private addresses
/// are refused unless `allow_private_hosts` is set, whether they appear in
/// the feed or in a `Location` header along the way.
#[derive(Clone)]
pub struct ContentExtractor {
    client: reqwest::Client,
    allow_private_hosts: bool,
}

impl ContentExtractor {
    pub fn new(config: &Config) -> Result<Self, FetchError> {
        let allow_private_hosts = config.allow_private_hosts;
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.http_timeout())
            .connect_timeout(config.http_timeout().min(Duration::from_secs(10)))
            .redirect(redirect_policy(allow_private_hosts))
            .build()?;

        Ok(Self {
            client,
            allow_private_hosts,
        })
    }

    /// Fetch `link` and return the readable text of its main article.
    ///
    /// Never fails: every problem (bad URL, network, status, non-HTML, empty
    /// article) yields `None` and a debug log.
    pub async fn fetch_full_content(&self, link: &str) -> Option<String> {
        match self.try_fetch(link).await {
            Ok(text) => {
                if text.is_none() {
                    tracing::debug!(link = %link, "No article text found");
                }
                text
            }
            Err(e) => {
                tracing::debug!(link = %link, error = %e, "Full content extraction failed");
                None
            }
        }
    }

    async fn try_fetch(&self, link: &str) -> Result<Option<String>, ExtractError> {
        let url = check_link(link, self.allow_private_hosts)?;

        let response = self
            .client
            .get(url)
            .header(ACCEPT, ARTICLE_ACCEPT)
            .send()
            .await
            .map_err(FetchError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()).into());
        }

        if let Some(content_type) = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        {
            if !content_type.contains("html") {
                return Err(ExtractError::NotHtml(content_type.to_string()));
            }
        }

        let body = read_limited_bytes(response, MAX_PAGE_SIZE).await?;
        Ok(extract_article(&String::from_utf8_lossy(&body)))
    }
}

fn check_link(link: &str, allow_private_hosts: bool) -> Result<Url, UrlValidationError> {
    if allow_private_hosts {
        validate_feed_url(link)
    } else {
        validate_public_url(link)
    }
}

/// Limit redirect hops and hold every hop to the same host rules as the
/// link itself.
fn redirect_policy(allow_private_hosts: bool) -> Policy {
    Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error(format!("Too many redirects (max {})", MAX_REDIRECTS));
        }

        if let Err(e) = check_link(attempt.url().as_str(), allow_private_hosts) {
            tracing::debug!(to = %attempt.url(), error = %e, "Refusing article redirect");
            return attempt.error(e);
        }

        tracing::debug!(
            from = %attempt.previous().last().map(|u| u.as_str()).unwrap_or("initial"),
            to = %attempt.url(),
            hop = attempt.previous().len() + 1,
            "Following article redirect"
        );
        attempt.follow()
    })
}

/// Strip page chrome, pick the main article element, render it as text.
fn extract_article(page: &str) -> Option<String> {
    let mut document = Html::parse_document(page);

    if let Ok(boilerplate) = Selector::parse(BOILERPLATE) {
        let ids: Vec<_> = document.select(&boilerplate).map(|el| el.id()).collect();
        for id in ids {
            if let Some(mut node) = document.tree.get_mut(id) {
                node.detach();
            }
        }
    }

    let article = ARTICLE_SELECTORS
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .find_map(|selector| {
            document
                .select(&selector)
                .map(|el| (text_len(el), el))
                .max_by_key(|(len, _)| *len)
                .filter(|(len, _)| *len >= MIN_ARTICLE_LEN)
                .map(|(_, el)| el)
        })
        .or_else(|| {
            let body = Selector::parse("body").ok()?;
            document.select(&body).next()
        })?;

    element_to_text(article)
}

fn text_len(element: ElementRef<'_>) -> usize {
    element.text().map(|t| t.trim().len()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    fn long_paragraph(word: &str) -> String {
        format!("<p>{}</p>", format!("{} ", word).repeat(60))
    }

    fn page() -> String {
        format!(
            r#"<html><head><title>T</title><style>body{{}}</style></head><body>
<nav><a href="/">Home</a></nav>
<header><h1>Site name</h1></header>
<div class="sidebar"><p>Teaser</p></div>
<article><h1>The Story</h1>{}<script>track()</script></article>
<footer>Copyright</footer>
</body></html>"#,
            long_paragraph("story")
        )
    }

    fn extractor(allow_private_hosts: bool) -> ContentExtractor {
        let config = Config {
            allow_private_hosts,
            ..Config::default()
        };
        ContentExtractor::new(&config).unwrap()
    }

    fn redirect_to(location: String) -> ResponseTemplate {
        ResponseTemplate::new(302).insert_header("Location", location.as_str())
    }

    #[test]
    fn test_extract_prefers_article() {
        let text = extract_article(&page()).unwrap();
        assert!(text.starts_with("# The Story\n\nstory story"));
        assert!(!text.contains("Home"));
        assert!(!text.contains("Teaser"));
        assert!(!text.contains("Copyright"));
        assert!(!text.contains("track()"));
    }

    #[test]
    fn test_extract_skips_short_candidates() {
        let html = format!(
            r#"<body><article>Share this</article><div class="entry-content">{}</div></body>"#,
            long_paragraph("body")
        );
        let text = extract_article(&html).unwrap();
        assert!(text.starts_with("body body"));
        assert!(!text.contains("Share this"));
    }

    #[test]
    fn test_extract_falls_back_to_body() {
        let text = extract_article("<body><nav>Menu</nav><p>Short page</p></body>");
        assert_eq!(text.as_deref(), Some("Short page"));

        assert_eq!(extract_article("<body><nav>Only chrome</nav></body>"), None);
    }

    #[tokio::test]
    async fn test_fetch_full_content() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/post"))
            // Whole-value match: the Accept list contains commas
            .and(|request: &Request| {
                request
                    .headers
                    .get("accept")
                    .is_some_and(|v| v.as_bytes() == ARTICLE_ACCEPT.as_bytes())
            })
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(page(), "text/html; charset=utf-8"),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let text = extractor(true)
            .fetch_full_content(&format!("{}/post", mock_server.uri()))
            .await;
        assert!(text.unwrap().starts_with("# The Story"));
    }

    #[tokio::test]
    async fn test_failures_degrade_to_none() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/audio"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "audio/mpeg")
                    .set_body_bytes(vec![0u8; 16]),
            )
            .mount(&mock_server)
            .await;

        let extractor = extractor(true);
        let base = mock_server.uri();
        assert_eq!(extractor.fetch_full_content(&format!("{}/missing", base)).await, None);
        assert_eq!(extractor.fetch_full_content(&format!("{}/audio", base)).await, None);
        assert_eq!(extractor.fetch_full_content("not a url").await, None);
    }

    #[tokio::test]
    async fn test_private_hosts_refused_by_default() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(page()))
            .expect(0)
            .mount(&mock_server)
            .await;

        let text = extractor(false).fetch_full_content(&mock_server.uri()).await;
        assert_eq!(text, None);
    }

    #[tokio::test]
    async fn test_redirect_to_private_host_refused() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/start"))
            .respond_with(redirect_to(format!("{}/internal", mock_server.uri())))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/internal"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(page(), "text/html"))
            .expect(0)
            .mount(&mock_server)
            .await;

        // The loopback origin stands in for a public page; only the
        // redirect target goes through the client's policy.
        let err = extractor(false)
            .client
            .get(format!("{}/start", mock_server.uri()))
            .send()
            .await
            .unwrap_err();
        assert!(err.is_redirect());
    }

    #[tokio::test]
    async fn test_redirects_followed_when_private_allowed() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(redirect_to(format!("{}/post", mock_server.uri())))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/post"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(page(), "text/html"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let text = extractor(true)
            .fetch_full_content(&format!("{}/old", mock_server.uri()))
            .await;
        assert!(text.unwrap().starts_with("# The Story"));
    }

    #[tokio::test]
    async fn test_redirect_loop_stops() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/loop"))
            .respond_with(redirect_to(format!("{}/loop", mock_server.uri())))
            .mount(&mock_server)
            .await;

        let extractor = extractor(true);
        let err = extractor
            .client
            .get(format!("{}/loop", mock_server.uri()))
            .send()
            .await
            .unwrap_err();
        assert!(err.is_redirect());
        assert_eq!(
            extractor
                .fetch_full_content(&format!("{}/loop", mock_server.uri()))
                .await,
            None
        );
    }
}
