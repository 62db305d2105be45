use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use crate::error::Result;
use crate::models::{ArticleImageRefs, ImageRecord, ImageStats, NewImageRecord, UsageUpdate};
use crate::tracker::{ArticleSource, ImageStore};

use super::schema::SCHEMA;

const IMAGE_COLUMNS: &str = "id, article_id, url, storage_id, file_name, size, mime_type, \
     is_used, is_featured_image, marked_for_deletion_at, deleted_at, created_at";

pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub async fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self> {
        conn.call(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }
}

// Articles belong to the CMS; the tracker never writes them outside tests.
#[cfg(test)]
use crate::{error::AppError, models::NewArticle};

#[cfg(test)]
impl Repository {
    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    pub async fn insert_article(&self, article: NewArticle) -> Result<i64> {
        let now = to_db_time(Utc::now());
        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO articles (title, content, featured_image_url, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?4)",
                    params![article.title, article.content, article.featured_image_url, now],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        Ok(id)
    }

    pub async fn update_article(&self, id: i64, article: NewArticle) -> Result<()> {
        let now = to_db_time(Utc::now());
        let changed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE articles SET title = ?1, content = ?2, featured_image_url = ?3, updated_at = ?4 WHERE id = ?5",
                    params![article.title, article.content, article.featured_image_url, now, id],
                )?;
                Ok(changed)
            })
            .await?;
        if changed == 0 {
            return Err(AppError::NotFound(format!("article {}", id)));
        }
        Ok(())
    }

    pub async fn delete_article(&self, id: i64) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM articles WHERE id = ?1", params![id])?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ArticleSource for Repository {
    async fn get_article(&self, id: i64) -> Result<Option<ArticleImageRefs>> {
        let article = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, content, featured_image_url FROM articles WHERE id = ?1",
                )?;
                let article = stmt
                    .query_row(params![id], article_from_row)
                    .optional()?;
                Ok(article)
            })
            .await?;
        Ok(article)
    }

    async fn all_articles(&self) -> Result<Vec<ArticleImageRefs>> {
        let articles = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, content, featured_image_url FROM articles ORDER BY id",
                )?;
                let articles = stmt
                    .query_map([], article_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(articles)
            })
            .await?;
        Ok(articles)
    }
}

#[async_trait::async_trait]
impl ImageStore for Repository {
    async fn insert_image(&self, image: NewImageRecord) -> Result<ImageRecord> {
        let created_at = to_db_time(Utc::now());
        let record = self
            .conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO article_images
                           (article_id, url, storage_id, file_name, size, mime_type,
                            is_used, is_featured_image, marked_for_deletion_at, created_at)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"#,
                    params![
                        image.article_id,
                        image.url,
                        image.storage_id,
                        image.file_name,
                        image.size,
                        image.mime_type,
                        image.is_used,
                        image.is_featured_image,
                        image.marked_for_deletion_at.map(to_db_time),
                        created_at,
                    ],
                )?;
                let id = conn.last_insert_rowid();
                let record = conn.query_row(
                    &format!("SELECT {} FROM article_images WHERE id = ?1", IMAGE_COLUMNS),
                    params![id],
                    image_from_row,
                )?;
                Ok(record)
            })
            .await?;
        Ok(record)
    }

    async fn get_image(&self, id: i64) -> Result<Option<ImageRecord>> {
        let record = self
            .conn
            .call(move |conn| {
                let record = conn
                    .query_row(
                        &format!("SELECT {} FROM article_images WHERE id = ?1", IMAGE_COLUMNS),
                        params![id],
                        image_from_row,
                    )
                    .optional()?;
                Ok(record)
            })
            .await?;
        Ok(record)
    }

    async fn find_image_by_url(&self, url: &str) -> Result<Option<ImageRecord>> {
        let url = url.to_string();
        let record = self
            .conn
            .call(move |conn| {
                let record = conn
                    .query_row(
                        &format!(
                            "SELECT {} FROM article_images WHERE url = ?1 \
                             ORDER BY deleted_at IS NOT NULL, id LIMIT 1",
                            IMAGE_COLUMNS
                        ),
                        params![url],
                        image_from_row,
                    )
                    .optional()?;
                Ok(record)
            })
            .await?;
        Ok(record)
    }

    async fn find_image_by_storage_id(&self, storage_id: &str) -> Result<Option<ImageRecord>> {
        let storage_id = storage_id.to_string();
        let record = self
            .conn
            .call(move |conn| {
                let record = conn
                    .query_row(
                        &format!(
                            "SELECT {} FROM article_images WHERE storage_id = ?1 \
                             ORDER BY deleted_at IS NOT NULL, id LIMIT 1",
                            IMAGE_COLUMNS
                        ),
                        params![storage_id],
                        image_from_row,
                    )
                    .optional()?;
                Ok(record)
            })
            .await?;
        Ok(record)
    }

    async fn images_for_article(&self, article_id: i64) -> Result<Vec<ImageRecord>> {
        let records = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM article_images \
                     WHERE article_id = ?1 AND deleted_at IS NULL ORDER BY id",
                    IMAGE_COLUMNS
                ))?;
                let records = stmt
                    .query_map(params![article_id], image_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(records)
            })
            .await?;
        Ok(records)
    }

    async fn update_usage(&self, id: i64, usage: UsageUpdate) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"UPDATE article_images
                       SET article_id = ?1, is_used = ?2, is_featured_image = ?3,
                           marked_for_deletion_at = ?4
                       WHERE id = ?5"#,
                    params![
                        usage.article_id,
                        usage.is_used,
                        usage.is_featured_image,
                        usage.marked_for_deletion_at.map(to_db_time),
                        id,
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn images_due_for_deletion(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ImageRecord>> {
        let now = to_db_time(now);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let records = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM article_images \
                     WHERE is_used = 0 AND deleted_at IS NULL \
                       AND marked_for_deletion_at IS NOT NULL AND marked_for_deletion_at <= ?1 \
                     ORDER BY marked_for_deletion_at, id LIMIT ?2",
                    IMAGE_COLUMNS
                ))?;
                let records = stmt
                    .query_map(params![now, limit], image_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(records)
            })
            .await?;
        Ok(records)
    }

    async fn count_live_references(&self, storage_id: &str, exclude_id: i64) -> Result<usize> {
        let storage_id = storage_id.to_string();
        let count = self
            .conn
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM article_images \
                     WHERE storage_id = ?1 AND id != ?2 AND deleted_at IS NULL",
                    params![storage_id, exclude_id],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    async fn orphaned_images(&self) -> Result<Vec<ImageRecord>> {
        let records = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM article_images \
                     WHERE deleted_at IS NULL \
                       AND (article_id IS NULL OR article_id NOT IN (SELECT id FROM articles)) \
                       AND (is_used = 1 OR marked_for_deletion_at IS NULL) \
                     ORDER BY id",
                    IMAGE_COLUMNS
                ))?;
                let records = stmt
                    .query_map([], image_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(records)
            })
            .await?;
        Ok(records)
    }

    async fn mark_deleted(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        let at = to_db_time(at);
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"UPDATE article_images
                       SET deleted_at = ?1, is_used = 0, is_featured_image = 0
                       WHERE id = ?2"#,
                    params![at, id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn restore_article_images(&self, article_id: i64) -> Result<usize> {
        let restored = self
            .conn
            .call(move |conn| {
                let restored = conn.execute(
                    r#"UPDATE article_images
                       SET is_used = 1, marked_for_deletion_at = NULL
                       WHERE article_id = ?1 AND deleted_at IS NULL
                         AND (is_used = 0 OR marked_for_deletion_at IS NOT NULL)"#,
                    params![article_id],
                )?;
                Ok(restored)
            })
            .await?;
        Ok(restored)
    }

    async fn image_stats(&self) -> Result<ImageStats> {
        let stats = self
            .conn
            .call(|conn| {
                let stats = conn.query_row(
                    r#"SELECT
                           COALESCE(SUM(CASE WHEN deleted_at IS NULL THEN 1 ELSE 0 END), 0),
                           COALESCE(SUM(CASE WHEN deleted_at IS NULL AND is_used = 1 THEN 1 ELSE 0 END), 0),
                           COALESCE(SUM(CASE WHEN deleted_at IS NULL AND is_used = 0 THEN 1 ELSE 0 END), 0),
                           COALESCE(SUM(CASE WHEN deleted_at IS NULL AND is_used = 0
                                             AND marked_for_deletion_at IS NOT NULL THEN 1 ELSE 0 END), 0),
                           COALESCE(SUM(CASE WHEN deleted_at IS NOT NULL THEN 1 ELSE 0 END), 0),
                           COALESCE(SUM(CASE WHEN deleted_at IS NULL THEN size ELSE 0 END), 0)
                       FROM article_images"#,
                    [],
                    |row| {
                        Ok(ImageStats {
                            total: row.get(0)?,
                            used: row.get(1)?,
                            unused: row.get(2)?,
                            pending_deletion: row.get(3)?,
                            deleted: row.get(4)?,
                            total_bytes: row.get(5)?,
                        })
                    },
                )?;
                Ok(stats)
            })
            .await?;
        Ok(stats)
    }
}

fn to_db_time(dt: DateTime<Utc>) -> String {
    // Fixed width so that text comparison in SQL orders like time.
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    // Try RFC3339 first (e.g., "2026-01-11T12:34:56.000Z")
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Try SQLite datetime format (e.g., "2026-01-11 12:34:56")
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

fn optional_time(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    Ok(row
        .get::<_, Option<String>>(idx)?
        .and_then(|s| parse_datetime(&s)))
}

fn article_from_row(row: &Row) -> rusqlite::Result<ArticleImageRefs> {
    Ok(ArticleImageRefs {
        id: row.get(0)?,
        content: row.get(1)?,
        featured_image_url: row.get(2)?,
    })
}

fn image_from_row(row: &Row) -> rusqlite::Result<ImageRecord> {
    Ok(ImageRecord {
        id: row.get(0)?,
        article_id: row.get(1)?,
        url: row.get(2)?,
        storage_id: row.get(3)?,
        file_name: row.get(4)?,
        size: row.get(5)?,
        mime_type: row.get(6)?,
        is_used: row.get::<_, i64>(7)? != 0,
        is_featured_image: row.get::<_, i64>(8)? != 0,
        marked_for_deletion_at: optional_time(row, 9)?,
        deleted_at: optional_time(row, 10)?,
        created_at: optional_time(row, 11)?.unwrap_or_else(Utc::now),
    })
}
