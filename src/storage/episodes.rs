use std::collections::{HashMap, HashSet};

use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{DatabaseError, Episode, EpisodeDbRow};

// ============================================================================
// Query Limit Constants
// ============================================================================

/// Default page size for episode listings.
pub const DEFAULT_EPISODE_LIMIT: i64 = 50;

/// Maximum page size for episode listings.
pub const MAX_EPISODE_LIMIT: i64 = 200;

/// SQLite's default bound-parameter ceiling is 999; stay well under it.
const BATCH_SIZE: usize = 500;

const EPISODE_COLUMNS: &str =
    "id, feed_id, guid, title, link, summary, content, audio_url, duration, published";

/// Newest first; episodes without a publish date go last.
const EPISODE_ORDER: &str = "published IS NULL, published DESC, id DESC";

impl Database {
    // ========================================================================
    // Episode Queries
    // ========================================================================

    /// List episodes across all feeds, or for one feed, newest first.
    ///
    /// `limit` is clamped to `[1, MAX_EPISODE_LIMIT]`; callers at the API
    /// boundary reject out-of-range values before getting here.
    pub async fn list_episodes(
        &self,
        feed_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<Episode>, DatabaseError> {
        let limit = limit.clamp(1, MAX_EPISODE_LIMIT);

        let mut builder: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new(format!("SELECT {} FROM episodes", EPISODE_COLUMNS));
        if let Some(feed_id) = feed_id {
            builder.push(" WHERE feed_id = ");
            builder.push_bind(feed_id);
        }
        builder.push(format!(" ORDER BY {} LIMIT ", EPISODE_ORDER));
        builder.push_bind(limit);

        let rows = builder
            .build_query_as::<EpisodeDbRow>()
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(EpisodeDbRow::into_episode).collect())
    }

    /// All episodes of one feed, newest first.
    pub async fn get_episodes_for_feed(&self, feed_id: i64) -> Result<Vec<Episode>, DatabaseError> {
        let rows = sqlx::query_as::<_, EpisodeDbRow>(&format!(
            "SELECT {} FROM episodes WHERE feed_id = ? ORDER BY {}",
            EPISODE_COLUMNS, EPISODE_ORDER
        ))
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(EpisodeDbRow::into_episode).collect())
    }

    /// Episodes for several feeds at once, grouped by feed id, each group newest first.
    pub async fn get_episodes_for_feeds(
        &self,
        feed_ids: &[i64],
    ) -> Result<HashMap<i64, Vec<Episode>>, DatabaseError> {
        let mut grouped: HashMap<i64, Vec<Episode>> = HashMap::new();

        for chunk in feed_ids.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(format!(
                "SELECT {} FROM episodes WHERE feed_id IN (",
                EPISODE_COLUMNS
            ));
            let mut separated = builder.separated(", ");
            for feed_id in chunk {
                separated.push_bind(*feed_id);
            }
            separated.push_unseparated(")");
            builder.push(format!(" ORDER BY feed_id, {}", EPISODE_ORDER));

            let rows = builder
                .build_query_as::<EpisodeDbRow>()
                .fetch_all(&self.pool)
                .await?;

            for row in rows {
                let episode = row.into_episode();
                grouped.entry(episode.feed_id).or_default().push(episode);
            }
        }

        Ok(grouped)
    }

    /// Which of `guids` are already stored for `feed_id`.
    ///
    /// A read-only pre-check used to decide which entries are worth enriching;
    /// the merge itself relies on the unique constraint, not on this.
    pub async fn existing_guids(
        &self,
        feed_id: i64,
        guids: &[&str],
    ) -> Result<HashSet<String>, DatabaseError> {
        let mut found = HashSet::new();

        for chunk in guids.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> =
                QueryBuilder::new("SELECT guid FROM episodes WHERE feed_id = ");
            builder.push_bind(feed_id);
            builder.push(" AND guid IN (");
            let mut separated = builder.separated(", ");
            for guid in chunk {
                separated.push_bind(*guid);
            }
            separated.push_unseparated(")");

            let rows: Vec<(String,)> = builder.build_query_as().fetch_all(&self.pool).await?;
            found.extend(rows.into_iter().map(|(guid,)| guid));
        }

        Ok(found)
    }
}
