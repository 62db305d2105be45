//! Image lifecycle tracking.
//!
//! Article saves feed [`ImageTracker::reconcile`], which keeps each image
//! record's usage flags in step with the article's content. Images that stop
//! being referenced are scheduled for deletion after the grace period, and
//! [`ImageTracker::run_cleanup`] later removes them from storage.

mod admin;
mod cleanup;
mod extractor;
mod reconciler;
mod store;

pub use admin::SyncReport;
pub use cleanup::DeletionReport;
pub use extractor::{mime_type_for, ImageUrlExtractor, RegexPattern};
pub use reconciler::ReconcileOutcome;
pub use store::{ArticleSource, ImageStore};

use std::sync::Arc;

use chrono::Duration;

use crate::config::Config;
use crate::error::Result;
use crate::models::ImageStats;
use crate::storage::ObjectStorage;

#[derive(Debug, Clone)]
pub struct TrackerPolicy {
    /// Time an unused image is kept before cleanup may delete it.
    pub grace_period: Duration,
    pub cleanup_batch_size: usize,
    /// Storage folder new uploads are written to.
    pub upload_folder: String,
}

impl TrackerPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            grace_period: config.grace_period(),
            cleanup_batch_size: config.cleanup_batch_size,
            upload_folder: config.storage.folder.clone(),
        }
    }
}

impl Default for TrackerPolicy {
    fn default() -> Self {
        Self {
            grace_period: Duration::hours(48),
            cleanup_batch_size: 100,
            upload_folder: "articles".to_string(),
        }
    }
}

pub struct ImageTracker {
    images: Arc<dyn ImageStore>,
    articles: Arc<dyn ArticleSource>,
    storage: Arc<dyn ObjectStorage>,
    extractor: ImageUrlExtractor,
    policy: TrackerPolicy,
}

impl ImageTracker {
    pub fn new(
        images: Arc<dyn ImageStore>,
        articles: Arc<dyn ArticleSource>,
        storage: Arc<dyn ObjectStorage>,
        extractor: ImageUrlExtractor,
        policy: TrackerPolicy,
    ) -> Self {
        Self {
            images,
            articles,
            storage,
            extractor,
            policy,
        }
    }

    pub async fn stats(&self) -> Result<ImageStats> {
        self.images.image_stats().await
    }
}
