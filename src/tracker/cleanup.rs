use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::models::ImageRecord;
use crate::storage::delete_idempotent;

use super::ImageTracker;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletedImage {
    pub id: i64,
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletionFailure {
    pub id: i64,
    pub file_name: Option<String>,
    pub error: String,
}

/// Outcome of a batch deletion; successes are committed even when others fail.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeletionReport {
    pub deleted_count: usize,
    pub deleted: Vec<DeletedImage>,
    pub failures: Vec<DeletionFailure>,
}

impl DeletionReport {
    pub(crate) fn record_deleted(&mut self, image: &ImageRecord) {
        self.deleted_count += 1;
        self.deleted.push(DeletedImage {
            id: image.id,
            file_name: image.file_name.clone(),
        });
    }

    pub(crate) fn record_failure(&mut self, id: i64, file_name: Option<&str>, error: impl ToString) {
        self.failures.push(DeletionFailure {
            id,
            file_name: file_name.map(str::to_string),
            error: error.to_string(),
        });
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

impl ImageTracker {
    /// Deletes images whose grace period has run out, up to the batch size.
    pub async fn run_cleanup(&self) -> Result<DeletionReport> {
        self.run_cleanup_at(Utc::now()).await
    }

    pub(crate) async fn run_cleanup_at(&self, now: DateTime<Utc>) -> Result<DeletionReport> {
        let due = self
            .images
            .images_due_for_deletion(now, self.policy.cleanup_batch_size)
            .await?;

        let mut report = DeletionReport::default();
        if due.is_empty() {
            tracing::debug!("Cleanup: nothing due");
            return Ok(report);
        }

        tracing::info!("Cleanup: {} images past their grace period", due.len());
        for image in &due {
            match self.purge(image, now).await {
                Ok(()) => report.record_deleted(image),
                Err(e) => {
                    tracing::warn!("Failed to delete image {} ({}): {}", image.id, image.file_name, e);
                    report.record_failure(image.id, Some(image.file_name.as_str()), e);
                }
            }
        }

        tracing::info!(
            "Cleanup finished: {} deleted, {} failed",
            report.deleted_count,
            report.failures.len()
        );
        Ok(report)
    }

    /// Soft-deletes the record, removing the object from storage once no other
    /// live record points at it.
    pub(crate) async fn purge(&self, image: &ImageRecord, now: DateTime<Utc>) -> Result<()> {
        match &image.storage_id {
            Some(storage_id) => {
                let others = self
                    .images
                    .count_live_references(storage_id, image.id)
                    .await?;
                if others == 0 {
                    delete_idempotent(self.storage.as_ref(), storage_id).await?;
                } else {
                    tracing::debug!(
                        "Keeping {} for image {}: {} other records still reference it",
                        storage_id,
                        image.id,
                        others
                    );
                }
            }
            None => tracing::debug!("Image {} is not in our storage, dropping record only", image.id),
        }
        self.images.mark_deleted(image.id, now).await
    }
}
