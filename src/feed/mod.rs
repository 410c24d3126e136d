//! Feed retrieval and parsing.
//!
//! - [`fetcher`] - Conditional HTTP fetch with ETag/Last-Modified validators
//! - [`parser`] - Tolerant RSS 2.0 / RSS 1.0 / Atom parsing into a normalized model
//!
//! The two halves meet in [`FetchResult`], which the storage layer merges.
//!
//! # Example
//!
//! ```ignore
//! let outcome = fetcher.fetch(&feed.url, feed.etag.as_deref(), feed.last_modified.as_deref()).await?;
//! if let FetchOutcome::Fetched(bytes) = outcome {
//!     let parsed = parse_feed(&bytes.body).into_result()?;
//! }
//! ```

mod fetcher;
mod parser;

pub(crate) use fetcher::read_limited_bytes;
pub use fetcher::{FetchError, FetchOutcome, FetchedBytes, Fetcher};
pub use parser::{
    parse_date, parse_feed, select_audio_url, EntryRecord, FeedMetadata, MediaRef, ParseError,
    ParseOutcome, ParsedFeed,
};

/// Output of fetch + parse + normalize for one refresh, consumed once by
/// [`Database::apply_refresh`](crate::storage::Database::apply_refresh).
#[derive(Debug, Clone)]
pub enum FetchResult {
    /// The server answered 304; nothing but `last_checked` changes.
    NotModified,
    Fetched {
        feed: FeedMetadata,
        entries: Vec<EntryRecord>,
        etag: Option<String>,
        last_modified: Option<String>,
    },
}
