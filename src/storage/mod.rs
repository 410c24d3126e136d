mod episodes;
mod feeds;
mod schema;
mod types;

pub use episodes::{DEFAULT_EPISODE_LIMIT, MAX_EPISODE_LIMIT};
pub use schema::Database;
pub use types::{DatabaseError, Episode, Feed, FeedWithEpisodes, RefreshStats};
