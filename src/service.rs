//! Feed subscription service.
//!
//! [`FeedService`] is the only thing the HTTP layer talks to. It owns the
//! refresh pipeline: fetch, parse, normalize, optionally enrich, then merge.

use futures::stream::{self, StreamExt};
use thiserror::Error;

use crate::config::Config;
use crate::content::{html_to_text, ContentExtractor};
use crate::feed::{
    parse_feed, EntryRecord, FetchError, FetchOutcome, FetchResult, Fetcher, ParseError,
    ParsedFeed,
};
use crate::storage::{
    Database, DatabaseError, Episode, FeedWithEpisodes, RefreshStats, MAX_EPISODE_LIMIT,
};
use crate::util::{validate_feed_url, UrlValidationError};

/// Article pages fetched at once during enrichment.
const ENRICH_CONCURRENCY: usize = 4;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Feed already subscribed: {0}")]
    DuplicateSubscription(String),
    #[error("Feed {0} not found")]
    NotFound(i64),
    #[error("Invalid feed URL: {0}")]
    InvalidUrl(#[from] UrlValidationError),
    #[error("limit must be between 1 and {max}, got {got}")]
    InvalidLimit { got: i64, max: i64 },
    #[error("Failed to fetch feed: {0}")]
    Fetch(#[from] FetchError),
    #[error("Failed to parse feed: {0}")]
    Parse(#[from] ParseError),
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl ServiceError {
    /// Fetch and parse failures both mean the upstream feed is unusable right now.
    pub fn is_upstream(&self) -> bool {
        matches!(self, Self::Fetch(_) | Self::Parse(_))
    }
}

#[derive(Clone)]
pub struct FeedService {
    db: Database,
    fetcher: Fetcher,
    /// Present only when full-content extraction is switched on
    extractor: Option<ContentExtractor>,
}

impl FeedService {
    pub fn new(db: Database, config: &Config) -> Result<Self, FetchError> {
        let fetcher = Fetcher::new(config)?;
        let extractor = if config.extract_full_content {
            Some(ContentExtractor::new(config)?)
        } else {
            None
        };

        Ok(Self {
            db,
            fetcher,
            extractor,
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    /// Subscribe to `url`, optionally running a first refresh.
    ///
    /// The subscription is committed before the first refresh starts. If that
    /// refresh fails upstream (fetch or parse), the failure is logged and the
    /// feed is returned without episodes; a later refresh can retry.
    pub async fn subscribe(
        &self,
        url: &str,
        auto_refresh: bool,
    ) -> Result<FeedWithEpisodes, ServiceError> {
        let url = validate_feed_url(url)?;

        let feed = match self.db.insert_feed(url.as_str()).await {
            Ok(feed) => feed,
            Err(DatabaseError::Duplicate) => {
                return Err(ServiceError::DuplicateSubscription(url.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        if auto_refresh {
            match self.refresh_feed(feed.id).await {
                Ok(stats) => {
                    tracing::debug!(feed_id = feed.id, new = stats.new_items, "Initial refresh done");
                }
                Err(e) if e.is_upstream() => {
                    tracing::warn!(
                        feed_id = feed.id,
                        url = %feed.url,
                        error = %e,
                        "Initial refresh failed; subscription kept"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        self.get_feed(feed.id).await
    }

    pub async fn list_feeds(&self) -> Result<Vec<FeedWithEpisodes>, ServiceError> {
        Ok(self.db.list_feeds().await?)
    }

    pub async fn get_feed(&self, feed_id: i64) -> Result<FeedWithEpisodes, ServiceError> {
        self.db
            .get_feed_with_episodes(feed_id)
            .await?
            .ok_or(ServiceError::NotFound(feed_id))
    }

    pub async fn delete_feed(&self, feed_id: i64) -> Result<(), ServiceError> {
        if self.db.delete_feed(feed_id).await? {
            Ok(())
        } else {
            Err(ServiceError::NotFound(feed_id))
        }
    }

    /// Episodes across all feeds (or one), newest first, undated last.
    ///
    /// An unknown `feed_id` simply matches nothing.
    pub async fn list_episodes(
        &self,
        feed_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<Episode>, ServiceError> {
        if !(1..=MAX_EPISODE_LIMIT).contains(&limit) {
            return Err(ServiceError::InvalidLimit {
                got: limit,
                max: MAX_EPISODE_LIMIT,
            });
        }
        Ok(self.db.list_episodes(feed_id, limit).await?)
    }

    // ========================================================================
    // Refresh Pipeline
    // ========================================================================

    /// Fetch, parse and merge one feed.
    ///
    /// Fetch and parse errors leave the store untouched. A partial parse is
    /// merged like a full one.
    pub async fn refresh_feed(&self, feed_id: i64) -> Result<RefreshStats, ServiceError> {
        let feed = self
            .db
            .get_feed(feed_id)
            .await?
            .ok_or(ServiceError::NotFound(feed_id))?;

        let outcome = self
            .fetcher
            .fetch(
                &feed.url,
                feed.etag.as_deref(),
                feed.last_modified.as_deref(),
            )
            .await?;

        let result = match outcome {
            FetchOutcome::NotModified => FetchResult::NotModified,
            FetchOutcome::Fetched(bytes) => {
                let outcome = parse_feed(&bytes.body);
                for warning in outcome.warnings() {
                    tracing::warn!(feed_id = feed_id, warning = %warning, "Feed parsed partially");
                }
                let ParsedFeed { feed, mut entries } = normalize(outcome.into_result()?);

                if let Some(extractor) = &self.extractor {
                    self.enrich(extractor, feed_id, &mut entries).await;
                }

                FetchResult::Fetched {
                    feed,
                    entries,
                    etag: bytes.etag,
                    last_modified: bytes.last_modified,
                }
            }
        };

        self.db
            .apply_refresh(feed_id, &result)
            .await?
            .ok_or(ServiceError::NotFound(feed_id))
    }

    /// Attach full article text to entries that are not stored yet.
    ///
    /// Best-effort: nothing here can fail the refresh.
    async fn enrich(&self, extractor: &ContentExtractor, feed_id: i64, entries: &mut [EntryRecord]) {
        let guids: Vec<&str> = entries.iter().filter_map(|e| e.guid.as_deref()).collect();
        let known = match self.db.existing_guids(feed_id, &guids).await {
            Ok(known) => known,
            Err(e) => {
                tracing::warn!(feed_id = feed_id, error = %e, "Skipping enrichment");
                return;
            }
        };

        let targets: Vec<(usize, String)> = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.guid.as_deref().is_some_and(|g| !known.contains(g)))
            .filter_map(|(i, e)| e.link.clone().map(|link| (i, link)))
            .collect();

        if targets.is_empty() {
            return;
        }
        let requested = targets.len();

        let extracted: Vec<(usize, Option<String>)> = stream::iter(targets)
            .map(|(i, link)| async move { (i, extractor.fetch_full_content(&link).await) })
            .buffer_unordered(ENRICH_CONCURRENCY)
            .collect()
            .await;

        let mut filled = 0usize;
        for (i, content) in extracted {
            if content.is_some() {
                filled += 1;
            }
            entries[i].content = content;
        }
        tracing::debug!(
            feed_id = feed_id,
            requested = requested,
            filled = filled,
            "Full content enrichment finished"
        );
    }
}

/// HTML in the feed description and entry summaries becomes plain text.
fn normalize(mut parsed: ParsedFeed) -> ParsedFeed {
    parsed.feed.description = parsed.feed.description.as_deref().and_then(html_to_text);
    for entry in &mut parsed.entries {
        entry.summary = entry.summary.as_deref().and_then(html_to_text);
    }
    parsed
}
