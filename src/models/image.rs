use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: i64,
    /// `None` for uploads that no article has claimed yet.
    pub article_id: Option<i64>,
    pub url: String,
    /// Object key in storage; `None` when the URL points outside our storage.
    pub storage_id: Option<String>,
    pub file_name: String,
    pub size: i64,
    pub mime_type: Option<String>,
    pub is_used: bool,
    pub is_featured_image: bool,
    pub marked_for_deletion_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle stage derived from the stored flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "at", rename_all = "snake_case")]
pub enum ImageState {
    Used,
    Unused,
    PendingDeletion(DateTime<Utc>),
    Deleted(DateTime<Utc>),
}

impl ImageRecord {
    pub fn state(&self) -> ImageState {
        if let Some(at) = self.deleted_at {
            return ImageState::Deleted(at);
        }
        if self.is_used {
            return ImageState::Used;
        }
        match self.marked_for_deletion_at {
            Some(at) => ImageState::PendingDeletion(at),
            None => ImageState::Unused,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn usage(&self) -> UsageUpdate {
        UsageUpdate {
            article_id: self.article_id,
            is_used: self.is_used,
            is_featured_image: self.is_featured_image,
            marked_for_deletion_at: self.marked_for_deletion_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewImageRecord {
    pub article_id: Option<i64>,
    pub url: String,
    pub storage_id: Option<String>,
    pub file_name: String,
    pub size: i64,
    pub mime_type: Option<String>,
    pub is_used: bool,
    pub is_featured_image: bool,
    pub marked_for_deletion_at: Option<DateTime<Utc>>,
}

/// The mutable usage columns of a record, written as one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageUpdate {
    pub article_id: Option<i64>,
    pub is_used: bool,
    pub is_featured_image: bool,
    pub marked_for_deletion_at: Option<DateTime<Utc>>,
}

impl UsageUpdate {
    pub fn used(article_id: Option<i64>, featured: bool) -> Self {
        Self {
            article_id,
            is_used: true,
            is_featured_image: featured,
            marked_for_deletion_at: None,
        }
    }

    pub fn unused(article_id: Option<i64>, delete_after: DateTime<Utc>) -> Self {
        Self {
            article_id,
            is_used: false,
            is_featured_image: false,
            marked_for_deletion_at: Some(delete_after),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageStats {
    pub total: i64,
    pub used: i64,
    pub unused: i64,
    pub pending_deletion: i64,
    pub deleted: i64,
    pub total_bytes: i64,
}
