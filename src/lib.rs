//! rsscast: an RSS/Atom and podcast subscription server.
//!
//! Clients register feed URLs; refreshes fetch them conditionally, parse them
//! tolerantly, and merge new episodes into SQLite at most once per
//! `(feed, guid)`.
//!
//! - [`feed`] - Conditional fetching and RSS/Atom parsing
//! - [`content`] - HTML to text, optional full-article extraction
//! - [`storage`] - SQLite record store and the refresh merge
//! - [`service`] - Subscription and refresh orchestration
//! - [`api`] - HTTP routes
//! - [`config`] - Startup configuration

pub mod api;
pub mod config;
pub mod content;
pub mod feed;
pub mod service;
pub mod storage;
pub mod util;
