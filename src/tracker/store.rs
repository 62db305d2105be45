use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{ArticleImageRefs, ImageRecord, ImageStats, NewImageRecord, UsageUpdate};

/// Persistence for image records.
#[async_trait::async_trait]
pub trait ImageStore: Send + Sync {
    async fn insert_image(&self, image: NewImageRecord) -> Result<ImageRecord>;

    async fn get_image(&self, id: i64) -> Result<Option<ImageRecord>>;

    /// A record carrying `url`, preferring undeleted ones, then the oldest.
    async fn find_image_by_url(&self, url: &str) -> Result<Option<ImageRecord>>;

    /// Same preference as [`ImageStore::find_image_by_url`], matched on the storage object.
    async fn find_image_by_storage_id(&self, storage_id: &str) -> Result<Option<ImageRecord>>;

    /// Records owned by the article, excluding deleted ones.
    async fn images_for_article(&self, article_id: i64) -> Result<Vec<ImageRecord>>;

    async fn update_usage(&self, id: i64, usage: UsageUpdate) -> Result<()>;

    /// Unused, undeleted records whose deletion mark is at or before `now`.
    async fn images_due_for_deletion(&self, now: DateTime<Utc>, limit: usize)
        -> Result<Vec<ImageRecord>>;

    /// How many undeleted records other than `exclude_id` point at the storage object.
    async fn count_live_references(&self, storage_id: &str, exclude_id: i64) -> Result<usize>;

    /// Undeleted records whose article no longer exists and that are not yet scheduled.
    async fn orphaned_images(&self) -> Result<Vec<ImageRecord>>;

    /// Soft-deletes the record: sets `deleted_at` and clears usage.
    async fn mark_deleted(&self, id: i64, at: DateTime<Utc>) -> Result<()>;

    /// Marks every undeleted record of the article used; returns how many changed.
    async fn restore_article_images(&self, article_id: i64) -> Result<usize>;

    async fn image_stats(&self) -> Result<ImageStats>;
}

/// Read access to the articles that reference images.
#[async_trait::async_trait]
pub trait ArticleSource: Send + Sync {
    async fn get_article(&self, id: i64) -> Result<Option<ArticleImageRefs>>;

    async fn all_articles(&self) -> Result<Vec<ArticleImageRefs>>;
}
