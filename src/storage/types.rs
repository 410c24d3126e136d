use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors surfaced by the record store.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// A uniqueness constraint rejected the write (e.g. a feed URL that is already subscribed).
    #[error("Record already exists")]
    Duplicate,
    /// Schema migration failed at startup.
    #[error("Migration failed: {0}")]
    Migration(String),
    /// Any other database failure.
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Classify a raw sqlx error, lifting unique violations into [`DatabaseError::Duplicate`].
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => Self::Duplicate,
            _ => Self::Sqlx(err),
        }
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// A subscribed feed.
///
/// Metadata fields are only ever written by a refresh; `etag` and
/// `last_modified` are the validators from the last successful fetch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Feed {
    pub id: i64,
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub link: Option<String>,
    pub language: Option<String>,
    #[serde(skip)]
    pub etag: Option<String>,
    #[serde(skip)]
    pub last_modified: Option<String>,
    pub last_checked: Option<DateTime<Utc>>,
    pub last_published: Option<DateTime<Utc>>,
}

/// One entry belonging to a feed. `(feed_id, guid)` is unique.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Episode {
    pub id: i64,
    pub feed_id: i64,
    pub guid: String,
    pub title: Option<String>,
    pub link: Option<String>,
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub audio_url: Option<String>,
    pub duration: Option<String>,
    pub published: Option<DateTime<Utc>>,
}

/// A feed with its episodes eager-loaded, newest first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedWithEpisodes {
    #[serde(flatten)]
    pub feed: Feed,
    pub episodes: Vec<Episode>,
}

/// Outcome counters of a merged refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RefreshStats {
    pub feed_id: i64,
    pub new_items: usize,
    pub skipped_items: usize,
    pub last_checked: DateTime<Utc>,
}

// ============================================================================
// Row Types
// ============================================================================

/// Internal row type for feed queries (timestamps as unix seconds).
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FeedDbRow {
    pub id: i64,
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub link: Option<String>,
    pub language: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub last_checked: Option<i64>,
    pub last_published: Option<i64>,
}

impl FeedDbRow {
    pub(crate) fn into_feed(self) -> Feed {
        Feed {
            id: self.id,
            url: self.url,
            title: self.title,
            description: self.description,
            link: self.link,
            language: self.language,
            etag: self.etag,
            last_modified: self.last_modified,
            last_checked: self.last_checked.and_then(from_timestamp),
            last_published: self.last_published.and_then(from_timestamp),
        }
    }
}

/// Internal row type for episode queries.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct EpisodeDbRow {
    pub id: i64,
    pub feed_id: i64,
    pub guid: String,
    pub title: Option<String>,
    pub link: Option<String>,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub audio_url: Option<String>,
    pub duration: Option<String>,
    pub published: Option<i64>,
}

impl EpisodeDbRow {
    pub(crate) fn into_episode(self) -> Episode {
        Episode {
            id: self.id,
            feed_id: self.feed_id,
            guid: self.guid,
            title: self.title,
            link: self.link,
            summary: self.summary,
            content: self.content,
            audio_url: self.audio_url,
            duration: self.duration,
            published: self.published.and_then(from_timestamp),
        }
    }
}

pub(crate) fn from_timestamp(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}
