use chrono::Utc;
use serde::Serialize;

use crate::error::{AppError, Result};
use crate::models::{ImageRecord, ImageState, NewImageRecord, UsageUpdate};
use crate::storage::{delete_idempotent, StoredObject};

use super::cleanup::DeletionReport;
use super::extractor::mime_type_for;
use super::ImageTracker;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncFailure {
    pub article_id: i64,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub articles_processed: usize,
    pub changes: usize,
    /// Still-used records whose article is gone, now scheduled for deletion.
    pub orphans_scheduled: usize,
    pub failures: Vec<SyncFailure>,
}

impl ImageTracker {
    /// Deletes the given images now, ignoring usage and the grace period.
    pub async fn force_delete(&self, image_ids: &[i64]) -> Result<DeletionReport> {
        if image_ids.is_empty() {
            return Err(AppError::validation("image_ids must not be empty"));
        }

        let mut ids = image_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();

        let now = Utc::now();
        let mut report = DeletionReport::default();

        for id in ids {
            let image = match self.images.get_image(id).await {
                Ok(Some(image)) => image,
                Ok(None) => {
                    report.record_failure(id, None, "image not found");
                    continue;
                }
                Err(e) => {
                    report.record_failure(id, None, e);
                    continue;
                }
            };

            match image.state() {
                ImageState::Deleted(_) => {
                    report.record_deleted(&image);
                    continue;
                }
                ImageState::Used => tracing::warn!(
                    "Force-deleting image {} still used by article {:?}",
                    image.id,
                    image.article_id
                ),
                ImageState::Unused | ImageState::PendingDeletion(_) => {}
            }

            match self.purge(&image, now).await {
                Ok(()) => report.record_deleted(&image),
                Err(e) => {
                    tracing::warn!("Failed to force-delete image {}: {}", image.id, e);
                    report.record_failure(image.id, Some(image.file_name.as_str()), e);
                }
            }
        }

        tracing::info!(
            "Force delete: {} deleted, {} failed",
            report.deleted_count,
            report.failures.len()
        );
        Ok(report)
    }

    /// Marks all of an article's images used again and cancels their deletion.
    pub async fn restore_article_images(&self, article_id: i64) -> Result<usize> {
        let restored = self.images.restore_article_images(article_id).await?;
        tracing::info!("Restored {} images of article {}", restored, article_id);
        Ok(restored)
    }

    /// Schedules every image of an article for deletion; call before the article row goes away.
    pub async fn release_article_images(&self, article_id: i64) -> Result<usize> {
        let outcome = self.reconcile_at(article_id, "", None, Utc::now()).await?;
        tracing::info!(
            "Released {} images of article {}",
            outcome.marked_unused,
            article_id
        );
        Ok(outcome.marked_unused)
    }

    /// Re-runs reconciliation over every article, one at a time, then schedules
    /// records left behind by deleted articles.
    pub async fn sync(&self) -> Result<SyncReport> {
        let articles = self.articles.all_articles().await?;
        let now = Utc::now();
        let mut report = SyncReport::default();

        for article in &articles {
            let result = self
                .reconcile_at(
                    article.id,
                    &article.content,
                    article.featured_image_url.as_deref(),
                    now,
                )
                .await;
            report.articles_processed += 1;
            match result {
                Ok(outcome) => report.changes += outcome.changes(),
                Err(e) => {
                    tracing::warn!("Sync failed for article {}: {}", article.id, e);
                    report.failures.push(SyncFailure {
                        article_id: article.id,
                        error: e.to_string(),
                    });
                }
            }
        }

        let delete_after = now + self.policy.grace_period;
        for orphan in self.images.orphaned_images().await? {
            let mark = orphan.marked_for_deletion_at.unwrap_or(delete_after);
            self.images
                .update_usage(orphan.id, UsageUpdate::unused(None, mark))
                .await?;
            tracing::debug!("Image {} lost article {:?}", orphan.id, orphan.article_id);
            report.orphans_scheduled += 1;
        }

        tracing::info!(
            "Synced {} articles: {} changes, {} orphans scheduled, {} failures",
            report.articles_processed,
            report.changes,
            report.orphans_scheduled,
            report.failures.len()
        );
        Ok(report)
    }

    /// Stores an upload and tracks it as unused until an article save references it.
    pub async fn upload_image(
        &self,
        bytes: Vec<u8>,
        file_name: &str,
        article_id: Option<i64>,
    ) -> Result<ImageRecord> {
        if bytes.is_empty() {
            return Err(AppError::validation("upload is empty"));
        }
        let mime_type = mime_type_for(file_name)
            .ok_or_else(|| AppError::validation(format!("unsupported image type: {}", file_name)))?;
        if let Some(article_id) = article_id {
            if self.articles.get_article(article_id).await?.is_none() {
                return Err(AppError::validation(format!(
                    "article {} does not exist",
                    article_id
                )));
            }
        }

        let stored = self
            .storage
            .upload(bytes, file_name, &self.policy.upload_folder)
            .await?;

        let tracked = self.track_upload(&stored, file_name, mime_type, article_id).await;
        if tracked.is_err() {
            // An object without a record is invisible to cleanup.
            if let Err(e) = delete_idempotent(self.storage.as_ref(), &stored.id).await {
                tracing::warn!("Failed to remove untracked upload {}: {}", stored.id, e);
            }
        }
        tracked
    }

    async fn track_upload(
        &self,
        stored: &StoredObject,
        file_name: &str,
        mime_type: &str,
        article_id: Option<i64>,
    ) -> Result<ImageRecord> {
        if let Some(existing) = self.images.find_image_by_storage_id(&stored.id).await? {
            if !existing.is_deleted() {
                tracing::debug!("Upload {} is already tracked as image {}", stored.url, existing.id);
                return Ok(existing);
            }
        }

        let record = NewImageRecord {
            article_id,
            url: stored.url.clone(),
            storage_id: Some(stored.id.clone()),
            file_name: file_name.to_string(),
            size: stored.size,
            mime_type: Some(mime_type.to_string()),
            is_used: false,
            is_featured_image: false,
            marked_for_deletion_at: Some(Utc::now() + self.policy.grace_period),
        };
        self.images.insert_image(record).await
    }
}
