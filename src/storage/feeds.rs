use chrono::Utc;

use super::schema::Database;
use super::types::{
    from_timestamp, DatabaseError, Feed, FeedDbRow, FeedWithEpisodes, RefreshStats,
};
use crate::feed::{EntryRecord, FetchResult};

const FEED_COLUMNS: &str = "id, url, title, description, link, language, etag, last_modified, \
                            last_checked, last_published";

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Subscribe to a feed URL, returning the new feed.
    ///
    /// # Errors
    ///
    /// [`DatabaseError::Duplicate`] if the URL is already subscribed. The
    /// insert runs in its own transaction, so nothing is left behind.
    pub async fn insert_feed(&self, url: &str) -> Result<Feed, DatabaseError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, FeedDbRow>(&format!(
            "INSERT INTO feeds (url) VALUES (?) RETURNING {}",
            FEED_COLUMNS
        ))
        .bind(url)
        .fetch_one(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        tx.commit().await?;
        tracing::info!(feed_id = row.id, url = %url, "Feed subscribed");
        Ok(row.into_feed())
    }

    /// Get a single feed by id.
    pub async fn get_feed(&self, feed_id: i64) -> Result<Option<Feed>, DatabaseError> {
        let row = sqlx::query_as::<_, FeedDbRow>(&format!(
            "SELECT {} FROM feeds WHERE id = ?",
            FEED_COLUMNS
        ))
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(FeedDbRow::into_feed))
    }

    /// Get a feed with all its episodes, newest first.
    pub async fn get_feed_with_episodes(
        &self,
        feed_id: i64,
    ) -> Result<Option<FeedWithEpisodes>, DatabaseError> {
        let Some(feed) = self.get_feed(feed_id).await? else {
            return Ok(None);
        };
        let episodes = self.get_episodes_for_feed(feed_id).await?;
        Ok(Some(FeedWithEpisodes { feed, episodes }))
    }

    /// List all feeds, most recently subscribed first, with episodes eager-loaded.
    ///
    /// Episodes are fetched with one batched query rather than one query per feed.
    pub async fn list_feeds(&self) -> Result<Vec<FeedWithEpisodes>, DatabaseError> {
        let rows = sqlx::query_as::<_, FeedDbRow>(&format!(
            "SELECT {} FROM feeds ORDER BY id DESC",
            FEED_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        let feed_ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        let mut by_feed = self.get_episodes_for_feeds(&feed_ids).await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let episodes = by_feed.remove(&row.id).unwrap_or_default();
                FeedWithEpisodes {
                    feed: row.into_feed(),
                    episodes,
                }
            })
            .collect())
    }

    /// Delete a feed and, through the foreign key cascade, all of its episodes.
    ///
    /// Returns `false` if no feed had that id.
    pub async fn delete_feed(&self, feed_id: i64) -> Result<bool, DatabaseError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("DELETE FROM feeds WHERE id = ?")
            .bind(feed_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            tracing::info!(feed_id = feed_id, "Feed deleted");
        }
        Ok(deleted)
    }

    // ========================================================================
    // Refresh Merge
    // ========================================================================

    /// Merge a fetch result into the store as one transaction.
    ///
    /// - `NotModified`: only `last_checked` moves.
    /// - `Fetched`: title/description/link/language/last_published take the new
    ///   value when it is present and retain the stored one otherwise; the
    ///   validators are always overwritten. Each entry with a guid is inserted
    ///   unless `(feed_id, guid)` already exists, in which case it is counted as
    ///   skipped and the stored episode is left untouched. Entries without a
    ///   guid are dropped without being counted.
    ///
    /// A conflicting insert, including one lost to a concurrent refresh of the
    /// same feed, is a skip rather than an error. Any other failure rolls the
    /// whole merge back.
    ///
    /// Returns `None` if the feed no longer exists.
    pub async fn apply_refresh(
        &self,
        feed_id: i64,
        result: &FetchResult,
    ) -> Result<Option<RefreshStats>, DatabaseError> {
        let now = Utc::now().timestamp();
        let last_checked = from_timestamp(now).unwrap_or_else(Utc::now);
        let mut tx = self.pool.begin().await?;

        let (feed, entries, etag, last_modified) = match result {
            FetchResult::NotModified => {
                let updated = sqlx::query("UPDATE feeds SET last_checked = ? WHERE id = ?")
                    .bind(now)
                    .bind(feed_id)
                    .execute(&mut *tx)
                    .await?;
                if updated.rows_affected() == 0 {
                    return Ok(None);
                }
                tx.commit().await?;
                tracing::debug!(feed_id = feed_id, "Feed not modified");
                return Ok(Some(RefreshStats {
                    feed_id,
                    new_items: 0,
                    skipped_items: 0,
                    last_checked,
                }));
            }
            FetchResult::Fetched {
                feed,
                entries,
                etag,
                last_modified,
            } => (feed, entries, etag, last_modified),
        };

        let updated = sqlx::query(
            r#"
            UPDATE feeds SET
                title = COALESCE(?, title),
                description = COALESCE(?, description),
                link = COALESCE(?, link),
                language = COALESCE(?, language),
                last_published = COALESCE(?, last_published),
                etag = ?,
                last_modified = ?,
                last_checked = ?
            WHERE id = ?
        "#,
        )
        .bind(non_empty(&feed.title))
        .bind(non_empty(&feed.description))
        .bind(non_empty(&feed.link))
        .bind(non_empty(&feed.language))
        .bind(feed.published.map(|dt| dt.timestamp()))
        .bind(etag.as_deref())
        .bind(last_modified.as_deref())
        .bind(now)
        .bind(feed_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            // Dropping the transaction rolls it back
            return Ok(None);
        }

        let mut new_items = 0usize;
        let mut skipped_items = 0usize;
        let mut dropped = 0usize;

        for entry in entries {
            let Some(guid) = non_empty(&entry.guid) else {
                dropped += 1;
                continue;
            };

            if insert_episode(&mut tx, feed_id, guid, entry).await? {
                new_items += 1;
            } else {
                skipped_items += 1;
            }
        }

        tx.commit().await?;

        if dropped > 0 {
            tracing::debug!(feed_id = feed_id, dropped = dropped, "Entries without guid skipped");
        }
        tracing::info!(
            feed_id = feed_id,
            new = new_items,
            skipped = skipped_items,
            "Feed refresh merged"
        );

        Ok(Some(RefreshStats {
            feed_id,
            new_items,
            skipped_items,
            last_checked,
        }))
    }
}

/// Insert one episode unless `(feed_id, guid)` exists. Returns whether a row was created.
async fn insert_episode(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    feed_id: i64,
    guid: &str,
    entry: &EntryRecord,
) -> Result<bool, DatabaseError> {
    let result = sqlx::query(
        r#"
        INSERT INTO episodes (feed_id, guid, title, link, summary, content, audio_url, duration, published)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(feed_id, guid) DO NOTHING
    "#,
    )
    .bind(feed_id)
    .bind(guid)
    .bind(entry.title.as_deref())
    .bind(entry.link.as_deref())
    .bind(entry.summary.as_deref())
    .bind(entry.content.as_deref())
    .bind(entry.audio_url.as_deref())
    .bind(entry.duration.as_deref())
    .bind(entry.published.map(|dt| dt.timestamp()))
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected() > 0)
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}
