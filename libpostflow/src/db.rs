//! Storage layer for Postflow
//!
//! Posts and their audit trail live in a single SQLite file. Every write goes
//! through one process-wide lock and one transaction, and appends its
//! activity entry inside that same transaction. Reads use the pool directly.

use serde::Serialize;
use sqlx::migrate::{MigrateError, Migrator};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, Transaction};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::error::{DbError, PostflowError, Result};
use crate::types::{
    ActivityAction, ActivityLogEntry, ContentTone, MediaType, Post, PostStatus,
};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const POST_COLUMNS: &str = "id, title, description, hashtags, image_prompt, topic, tone, \
    media_type, image_path, video_path, scheduled_time, status, remote_post_id, \
    error_message, generation_service, generation_params, created_at, updated_at";

/// A post whose selected media column is set.
const MEDIA_ATTACHED: &str = "((media_type = 'video' AND video_path IS NOT NULL) \
    OR (media_type <> 'video' AND image_path IS NOT NULL))";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Post counts per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PostStats {
    pub total: i64,
    pub draft: i64,
    pub scheduled: i64,
    pub processing: i64,
    pub published: i64,
    pub failed: i64,
    /// Scheduled, due and with media attached
    pub ready_to_publish: i64,
}

impl PostStats {
    pub fn count(&self, status: PostStatus) -> i64 {
        match status {
            PostStatus::Draft => self.draft,
            PostStatus::Scheduled => self.scheduled,
            PostStatus::Processing => self.processing,
            PostStatus::Published => self.published,
            PostStatus::Failed => self.failed,
        }
    }

    fn set(&mut self, status: PostStatus, count: i64) {
        match status {
            PostStatus::Draft => self.draft = count,
            PostStatus::Scheduled => self.scheduled = count,
            PostStatus::Processing => self.processing = count,
            PostStatus::Published => self.published = count,
            PostStatus::Failed => self.failed = count,
        }
    }
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
}

impl Database {
    /// Open (creating if needed) the database at `db_path` and apply pending
    /// migrations.
    ///
    /// When migrations are pending on a database that already holds tables,
    /// the file is first copied to `<path>.backup_<YYYYmmdd_HHMMSS>`. If a
    /// migration then fails, the copy is restored over the original and
    /// [`DbError::MigrationRolledBack`] is returned.
    pub async fn new(db_path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = PathBuf::from(&expanded_path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT);

        let mut pool = SqlitePool::connect_with(options.clone())
            .await
            .map_err(DbError::SqlxError)?;

        let mut backup = None;
        if needs_backup(&pool).await? {
            pool.close().await;
            let backup_path = backup_path_for(&path);
            std::fs::copy(&path, &backup_path).map_err(DbError::IoError)?;
            tracing::info!(backup = %backup_path.display(), "Backed up database before migrating");
            backup = Some(backup_path);
            pool = SqlitePool::connect_with(options)
                .await
                .map_err(DbError::SqlxError)?;
        }

        if let Err(e) = MIGRATOR.run(&pool).await {
            pool.close().await;
            return Err(migration_failure(&path, backup.as_deref(), e));
        }

        Ok(Self::from_pool(pool))
    }

    /// Fresh, fully migrated in-memory database.
    ///
    /// The pool holds exactly one connection so every query sees the same
    /// database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(DbError::SqlxError)?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(DbError::SqlxError)?;

        MIGRATOR.run(&pool).await.map_err(DbError::MigrationError)?;

        Ok(Self::from_pool(pool))
    }

    fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Insert a new post and return its id.
    ///
    /// New posts start as `draft` or `scheduled`; a scheduled post must carry
    /// a `scheduled_time`, which may already be in the past. Both timestamps
    /// are set to now.
    pub async fn create_post(&self, post: &Post) -> Result<i64> {
        if !matches!(post.status, PostStatus::Draft | PostStatus::Scheduled) {
            return Err(PostflowError::InvalidInput(format!(
                "New posts must be draft or scheduled, not {}",
                post.status
            )));
        }
        post.check_invariants()?;

        let _guard = self.write_lock.lock().await;
        let now = now();
        let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;

        let result = sqlx::query(
            r#"
            INSERT INTO posts (title, description, hashtags, image_prompt, topic, tone,
                               media_type, image_path, video_path, scheduled_time, status,
                               remote_post_id, error_message, generation_service,
                               generation_params, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&post.title)
        .bind(&post.description)
        .bind(&post.hashtags)
        .bind(&post.image_prompt)
        .bind(&post.topic)
        .bind(post.tone.as_str())
        .bind(post.media_type.as_str())
        .bind(&post.image_path)
        .bind(&post.video_path)
        .bind(post.scheduled_time)
        .bind(post.status.as_str())
        .bind(&post.remote_post_id)
        .bind(&post.error_message)
        .bind(&post.generation_service)
        .bind(&post.generation_params)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(DbError::SqlxError)?;

        let id = result.last_insert_rowid();
        let details = format!("Post created as {}: {}", post.status, post.title);
        append_activity(&mut tx, id, ActivityAction::Created, Some(&details), now).await?;

        tx.commit().await.map_err(DbError::SqlxError)?;
        tracing::debug!(post_id = id, status = %post.status, "Created post");

        Ok(id)
    }

    pub async fn get_post(&self, id: i64) -> Result<Option<Post>> {
        fetch_post(&self.pool, id).await
    }

    /// Newest first.
    pub async fn list_posts(&self, limit: i64, offset: i64) -> Result<Vec<Post>> {
        let sql = format!(
            "SELECT {} FROM posts ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
            POST_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        rows.iter().map(post_from_row).collect()
    }

    pub async fn list_posts_by_status(&self, status: PostStatus) -> Result<Vec<Post>> {
        let sql = format!(
            "SELECT {} FROM posts WHERE status = ? ORDER BY created_at DESC, id DESC",
            POST_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        rows.iter().map(post_from_row).collect()
    }

    /// Scheduled posts due at `now` with media attached, earliest first.
    pub async fn list_due_posts(&self, now: i64) -> Result<Vec<Post>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM posts
            WHERE status = 'scheduled'
              AND scheduled_time IS NOT NULL
              AND scheduled_time <= ?
              AND {}
            ORDER BY scheduled_time ASC, id ASC
            "#,
            POST_COLUMNS, MEDIA_ATTACHED
        );
        let rows = sqlx::query(&sql)
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        rows.iter().map(post_from_row).collect()
    }

    /// Posts created within `[start, end]`, newest first.
    pub async fn list_posts_by_date_range(&self, start: i64, end: i64) -> Result<Vec<Post>> {
        let sql = format!(
            "SELECT {} FROM posts WHERE created_at >= ? AND created_at <= ? \
             ORDER BY created_at DESC, id DESC",
            POST_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(start)
            .bind(end)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        rows.iter().map(post_from_row).collect()
    }

    /// Literal substring match over title, description, hashtags and topic.
    pub async fn search_posts(&self, query: &str, limit: i64) -> Result<Vec<Post>> {
        let pattern = like_pattern(query);
        let sql = format!(
            r#"
            SELECT {}
            FROM posts
            WHERE title LIKE ? ESCAPE '\'
               OR description LIKE ? ESCAPE '\'
               OR hashtags LIKE ? ESCAPE '\'
               OR topic LIKE ? ESCAPE '\'
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
            POST_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(&pattern)
            .bind(&pattern)
            .bind(&pattern)
            .bind(&pattern)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        rows.iter().map(post_from_row).collect()
    }

    /// Full-row update. Returns `false` if the post does not exist.
    ///
    /// A status change must be a legal edge; moving a failed post back to
    /// `scheduled` clamps its time to now and clears the error. Claiming a
    /// post for publication is left to [`Database::update_status`].
    pub async fn update_post(&self, post: &Post) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;

        let Some(stored) = fetch_post(&mut *tx, post.id).await? else {
            return Ok(false);
        };
        let now = now().max(stored.updated_at);

        if post.status == PostStatus::Processing && stored.status != PostStatus::Processing {
            return Err(PostflowError::InvalidTransition {
                from: stored.status,
                to: PostStatus::Processing,
            });
        }

        let mut next = post.clone();
        next.created_at = stored.created_at;
        next.updated_at = now;
        if stored.status == PostStatus::Failed && next.status == PostStatus::Scheduled {
            next.scheduled_time = next.scheduled_time.map(|at| at.max(now));
            next.error_message = None;
        }
        if next.status == PostStatus::Draft && stored.status == PostStatus::Scheduled {
            next.scheduled_time = None;
        }
        stored.validate_change(&next, now)?;

        if !write_row(&mut tx, &stored, &next).await? {
            return Ok(false);
        }
        append_activity(&mut tx, post.id, ActivityAction::Updated, Some("Post updated"), now)
            .await?;
        if stored.status != next.status {
            let details = transition_details(&stored, &next);
            append_activity(&mut tx, post.id, ActivityAction::StatusChanged, Some(&details), now)
                .await?;
        }

        tx.commit().await.map_err(DbError::SqlxError)?;
        tracing::debug!(post_id = post.id, status = %next.status, "Updated post");

        Ok(true)
    }

    /// Move a post along one edge of the state machine.
    ///
    /// Returns `Ok(false)` if the post does not exist or changed underneath
    /// the caller, and [`PostflowError::InvalidTransition`] for an illegal
    /// edge (the row is left untouched). `error_message` is recorded on
    /// `failed`; `remote_post_id` on `published`. Moving to `scheduled` from
    /// `failed` clamps the time to now and clears the error; moving to
    /// `draft` clears the time.
    pub async fn update_status(
        &self,
        id: i64,
        status: PostStatus,
        error_message: Option<&str>,
        remote_post_id: Option<&str>,
    ) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;

        let Some(stored) = fetch_post(&mut *tx, id).await? else {
            return Ok(false);
        };
        if !stored.status.can_transition_to(status) {
            return Err(PostflowError::InvalidTransition {
                from: stored.status,
                to: status,
            });
        }
        let now = now().max(stored.updated_at);

        let mut next = stored.clone();
        next.status = status;
        next.updated_at = now;
        match status {
            PostStatus::Scheduled => {
                if stored.status == PostStatus::Failed {
                    next.scheduled_time = Some(stored.scheduled_time.unwrap_or(now).max(now));
                }
                next.error_message = None;
            }
            PostStatus::Draft => next.scheduled_time = None,
            PostStatus::Processing => {}
            PostStatus::Published => {
                next.remote_post_id = remote_post_id.map(str::to_string);
                next.error_message = None;
            }
            PostStatus::Failed => {
                next.error_message =
                    Some(error_message.unwrap_or("Publication failed").to_string());
            }
        }
        stored.validate_change(&next, now)?;

        if !write_row(&mut tx, &stored, &next).await? {
            return Ok(false);
        }
        let details = transition_details(&stored, &next);
        append_activity(&mut tx, id, ActivityAction::StatusChanged, Some(&details), now).await?;

        tx.commit().await.map_err(DbError::SqlxError)?;
        tracing::debug!(post_id = id, from = %stored.status, to = %status, "Status changed");

        Ok(true)
    }

    /// Schedule a draft or failed post at `when`, or move an already
    /// scheduled post to a new time.
    ///
    /// Drafts and scheduled posts need a future time; failed posts are
    /// clamped to now.
    pub async fn schedule_at(&self, id: i64, when: i64) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;

        let Some(stored) = fetch_post(&mut *tx, id).await? else {
            return Ok(false);
        };
        let now = now().max(stored.updated_at);

        let mut next = stored.clone();
        next.updated_at = now;
        next.status = PostStatus::Scheduled;
        next.error_message = None;
        let action = match stored.status {
            PostStatus::Draft => {
                next.scheduled_time = Some(when);
                ActivityAction::StatusChanged
            }
            PostStatus::Failed => {
                next.scheduled_time = Some(when.max(now));
                ActivityAction::StatusChanged
            }
            PostStatus::Scheduled => {
                if when <= now {
                    return Err(PostflowError::InvalidInput(
                        "A new scheduled_time must be in the future".to_string(),
                    ));
                }
                next.scheduled_time = Some(when);
                ActivityAction::Updated
            }
            from => {
                return Err(PostflowError::InvalidTransition {
                    from,
                    to: PostStatus::Scheduled,
                })
            }
        };
        stored.validate_change(&next, now)?;

        if !write_row(&mut tx, &stored, &next).await? {
            return Ok(false);
        }
        let details = match action {
            ActivityAction::Updated => format!("Rescheduled for {}", when),
            _ => transition_details(&stored, &next),
        };
        append_activity(&mut tx, id, action, Some(&details), now).await?;

        tx.commit().await.map_err(DbError::SqlxError)?;
        tracing::debug!(post_id = id, scheduled_time = next.scheduled_time, "Scheduled post");

        Ok(true)
    }

    /// `scheduled -> draft`, clearing the scheduled time.
    pub async fn cancel_schedule(&self, id: i64) -> Result<bool> {
        self.update_status(id, PostStatus::Draft, None, None).await
    }

    /// Delete a post and its activity entries, then best-effort remove its
    /// media files. Returns `false` if the post does not exist.
    pub async fn delete_post(&self, id: i64) -> Result<bool> {
        let stored = {
            let _guard = self.write_lock.lock().await;
            let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;

            let Some(stored) = fetch_post(&mut *tx, id).await? else {
                return Ok(false);
            };

            sqlx::query("DELETE FROM activity_logs WHERE post_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(DbError::SqlxError)?;
            sqlx::query("DELETE FROM posts WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(DbError::SqlxError)?;

            tx.commit().await.map_err(DbError::SqlxError)?;
            stored
        };
        tracing::debug!(post_id = id, "Deleted post");

        for path in [stored.image_path.as_deref(), stored.video_path.as_deref()]
            .into_iter()
            .flatten()
            .filter(|p| !p.trim().is_empty())
        {
            match tokio::fs::remove_file(path).await {
                Ok(()) => tracing::debug!(post_id = id, path, "Removed media file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(post_id = id, path, error = %e, "Could not remove media file")
                }
            }
        }

        Ok(true)
    }

    /// Move up to `max` publishable failed posts back to `scheduled`, due
    /// now. Posts changed by another writer in the meantime are skipped.
    pub async fn retry_failed(&self, max: usize) -> Result<usize> {
        let failed = self.list_posts_by_status(PostStatus::Failed).await?;

        let mut retried = 0;
        for post in failed.iter().filter(|p| p.can_be_published()) {
            if retried >= max {
                break;
            }
            match self
                .update_status(post.id, PostStatus::Scheduled, None, None)
                .await
            {
                Ok(true) => {
                    tracing::info!(post_id = post.id, "Post queued for retry");
                    retried += 1;
                }
                Ok(false) | Err(PostflowError::InvalidTransition { .. }) => {
                    tracing::debug!(post_id = post.id, "Post changed before retry, skipping");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(retried)
    }

    /// Move every `processing` post to `failed` with `reason`.
    pub async fn recover_stranded(&self, reason: &str) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;

        let sql = format!("SELECT {} FROM posts WHERE status = 'processing'", POST_COLUMNS);
        let rows = sqlx::query(&sql)
            .fetch_all(&mut *tx)
            .await
            .map_err(DbError::SqlxError)?;
        let stranded = rows.iter().map(post_from_row).collect::<Result<Vec<_>>>()?;

        let mut recovered = 0;
        for stored in stranded {
            let now = now().max(stored.updated_at);
            let mut next = stored.clone();
            next.status = PostStatus::Failed;
            next.error_message = Some(reason.to_string());
            next.updated_at = now;

            if write_row(&mut tx, &stored, &next).await? {
                let details = transition_details(&stored, &next);
                append_activity(&mut tx, stored.id, ActivityAction::StatusChanged, Some(&details), now)
                    .await?;
                tracing::warn!(post_id = stored.id, "Recovered post stranded in processing");
                recovered += 1;
            }
        }

        tx.commit().await.map_err(DbError::SqlxError)?;
        Ok(recovered)
    }

    pub async fn stats(&self) -> Result<PostStats> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS count FROM posts GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        let mut stats = PostStats::default();
        for row in &rows {
            let status: String = row.try_get("status").map_err(DbError::SqlxError)?;
            let count: i64 = row.try_get("count").map_err(DbError::SqlxError)?;
            let status = parse_status(&status)?;
            stats.set(status, count);
            stats.total += count;
        }

        let sql = format!(
            "SELECT COUNT(*) FROM posts WHERE status = 'scheduled' \
             AND scheduled_time IS NOT NULL AND scheduled_time <= ? AND {}",
            MEDIA_ATTACHED
        );
        stats.ready_to_publish = sqlx::query_scalar(&sql)
            .bind(now())
            .fetch_one(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(stats)
    }

    /// Newest activity across all posts.
    pub async fn recent_activity(&self, limit: i64) -> Result<Vec<ActivityLogEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, post_id, action, details, timestamp
            FROM activity_logs
            ORDER BY timestamp DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(activity_from_row).collect()
    }

    pub async fn activity_for_post(&self, post_id: i64) -> Result<Vec<ActivityLogEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, post_id, action, details, timestamp
            FROM activity_logs
            WHERE post_id = ?
            ORDER BY timestamp DESC, id DESC
            "#,
        )
        .bind(post_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(activity_from_row).collect()
    }

    /// Remove activity entries older than `older_than_days`.
    pub async fn cleanup_activity(&self, older_than_days: u32) -> Result<u64> {
        let cutoff = now() - i64::from(older_than_days) * 86_400;

        let _guard = self.write_lock.lock().await;
        let result = sqlx::query("DELETE FROM activity_logs WHERE timestamp < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        let removed = result.rows_affected();
        if removed > 0 {
            tracing::info!(removed, older_than_days, "Cleaned up old activity entries");
        }
        Ok(removed)
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

async fn fetch_post<'e, E>(executor: E, id: i64) -> Result<Option<Post>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {} FROM posts WHERE id = ?", POST_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(executor)
        .await
        .map_err(DbError::SqlxError)?;

    row.as_ref().map(post_from_row).transpose()
}

/// Write every mutable column of `next`, provided the row still has the
/// status it was read with.
async fn write_row(tx: &mut Transaction<'_, Sqlite>, stored: &Post, next: &Post) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE posts
        SET title = ?, description = ?, hashtags = ?, image_prompt = ?, topic = ?, tone = ?,
            media_type = ?, image_path = ?, video_path = ?, scheduled_time = ?, status = ?,
            remote_post_id = ?, error_message = ?, generation_service = ?,
            generation_params = ?, updated_at = ?
        WHERE id = ? AND status = ?
        "#,
    )
    .bind(&next.title)
    .bind(&next.description)
    .bind(&next.hashtags)
    .bind(&next.image_prompt)
    .bind(&next.topic)
    .bind(next.tone.as_str())
    .bind(next.media_type.as_str())
    .bind(&next.image_path)
    .bind(&next.video_path)
    .bind(next.scheduled_time)
    .bind(next.status.as_str())
    .bind(&next.remote_post_id)
    .bind(&next.error_message)
    .bind(&next.generation_service)
    .bind(&next.generation_params)
    .bind(next.updated_at)
    .bind(stored.id)
    .bind(stored.status.as_str())
    .execute(&mut **tx)
    .await
    .map_err(DbError::SqlxError)?;

    Ok(result.rows_affected() == 1)
}

async fn append_activity(
    tx: &mut Transaction<'_, Sqlite>,
    post_id: i64,
    action: ActivityAction,
    details: Option<&str>,
    timestamp: i64,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO activity_logs (post_id, action, details, timestamp) VALUES (?, ?, ?, ?)",
    )
    .bind(post_id)
    .bind(action.as_str())
    .bind(details)
    .bind(timestamp)
    .execute(&mut **tx)
    .await
    .map_err(DbError::SqlxError)?;

    Ok(())
}

fn transition_details(stored: &Post, next: &Post) -> String {
    let mut details = format!("{} -> {}", stored.status, next.status);
    match next.status {
        PostStatus::Failed => {
            if let Some(error) = &next.error_message {
                details.push_str(": ");
                details.push_str(error);
            }
        }
        PostStatus::Published => {
            if let Some(remote_id) = &next.remote_post_id {
                details.push_str(&format!(" (remote id {})", remote_id));
            }
        }
        PostStatus::Scheduled => {
            if let Some(at) = next.scheduled_time {
                details.push_str(&format!(" at {}", at));
            }
        }
        _ => {}
    }
    details
}

fn parse_status(raw: &str) -> Result<PostStatus> {
    raw.parse::<PostStatus>().map_err(|_| {
        DbError::CorruptRow {
            table: "posts",
            reason: format!("unknown status '{}'", raw),
        }
        .into()
    })
}

fn post_from_row(row: &SqliteRow) -> Result<Post> {
    let status: String = row.try_get("status").map_err(DbError::SqlxError)?;
    let tone: String = row.try_get("tone").map_err(DbError::SqlxError)?;
    let media_type: String = row.try_get("media_type").map_err(DbError::SqlxError)?;

    let tone = tone.parse::<ContentTone>().unwrap_or_else(|_| {
        tracing::warn!(tone = %tone, "Unknown tone in posts table, using default");
        ContentTone::default()
    });
    let media_type = media_type
        .parse::<MediaType>()
        .map_err(|_| DbError::CorruptRow {
            table: "posts",
            reason: format!("unknown media type '{}'", media_type),
        })?;

    Ok(Post {
        id: row.try_get("id").map_err(DbError::SqlxError)?,
        title: row.try_get("title").map_err(DbError::SqlxError)?,
        description: row.try_get("description").map_err(DbError::SqlxError)?,
        hashtags: row.try_get("hashtags").map_err(DbError::SqlxError)?,
        image_prompt: row.try_get("image_prompt").map_err(DbError::SqlxError)?,
        topic: row.try_get("topic").map_err(DbError::SqlxError)?,
        tone,
        media_type,
        image_path: row.try_get("image_path").map_err(DbError::SqlxError)?,
        video_path: row.try_get("video_path").map_err(DbError::SqlxError)?,
        scheduled_time: row.try_get("scheduled_time").map_err(DbError::SqlxError)?,
        status: parse_status(&status)?,
        remote_post_id: row.try_get("remote_post_id").map_err(DbError::SqlxError)?,
        error_message: row.try_get("error_message").map_err(DbError::SqlxError)?,
        generation_service: row.try_get("generation_service").map_err(DbError::SqlxError)?,
        generation_params: row.try_get("generation_params").map_err(DbError::SqlxError)?,
        created_at: row.try_get("created_at").map_err(DbError::SqlxError)?,
        updated_at: row.try_get("updated_at").map_err(DbError::SqlxError)?,
    })
}

fn activity_from_row(row: &SqliteRow) -> Result<ActivityLogEntry> {
    let action: String = row.try_get("action").map_err(DbError::SqlxError)?;
    let action = action.parse::<ActivityAction>().map_err(|_| DbError::CorruptRow {
        table: "activity_logs",
        reason: format!("unknown action '{}'", action),
    })?;

    Ok(ActivityLogEntry {
        id: row.try_get("id").map_err(DbError::SqlxError)?,
        post_id: row.try_get("post_id").map_err(DbError::SqlxError)?,
        action,
        details: row.try_get("details").map_err(DbError::SqlxError)?,
        timestamp: row.try_get("timestamp").map_err(DbError::SqlxError)?,
    })
}

fn like_pattern(query: &str) -> String {
    let escaped = query
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

/// True when migrations are pending on a database that already has tables.
async fn needs_backup(pool: &SqlitePool) -> Result<bool> {
    let user_tables: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' \
         AND name NOT LIKE 'sqlite_%' AND name <> '_sqlx_migrations'",
    )
    .fetch_one(pool)
    .await
    .map_err(DbError::SqlxError)?;
    if user_tables == 0 {
        return Ok(false);
    }

    let tracked: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = '_sqlx_migrations'",
    )
    .fetch_one(pool)
    .await
    .map_err(DbError::SqlxError)?;
    let applied: i64 = if tracked > 0 {
        sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = 1")
            .fetch_one(pool)
            .await
            .map_err(DbError::SqlxError)?
    } else {
        0
    };

    Ok((applied as usize) < MIGRATOR.iter().count())
}

fn backup_path_for(path: &Path) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".backup_{}", stamp));
    PathBuf::from(name)
}

fn migration_failure(path: &Path, backup: Option<&Path>, error: MigrateError) -> PostflowError {
    let Some(backup) = backup else {
        return DbError::MigrationError(error).into();
    };

    tracing::error!(error = %error, "Migration failed, restoring backup");
    if let Err(e) = std::fs::copy(backup, path) {
        tracing::error!(backup = %backup.display(), error = %e, "Could not restore backup");
        return DbError::IoError(e).into();
    }

    DbError::MigrationRolledBack {
        backup: backup.display().to_string(),
        source: error,
    }
    .into()
}
