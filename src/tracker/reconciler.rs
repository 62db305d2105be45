use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{AppError, Result};
use crate::models::{ImageRecord, NewImageRecord, UsageUpdate};

use super::extractor::{file_name_from_url, mime_type_for};
use super::ImageTracker;

/// What a reconciliation changed. Only the first four counters are writes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
    pub created: usize,
    pub adopted: usize,
    pub marked_used: usize,
    pub marked_unused: usize,
    pub unchanged: usize,
    /// Referenced URLs whose only record was already deleted.
    pub skipped: usize,
}

impl ReconcileOutcome {
    pub fn changes(&self) -> usize {
        self.created + self.adopted + self.marked_used + self.marked_unused
    }
}

impl ImageTracker {
    /// Recomputes which of the article's images are in use.
    ///
    /// Unreferenced images are scheduled for deletion, never deleted here.
    pub async fn reconcile(
        &self,
        article_id: i64,
        content: &str,
        featured_image_url: Option<&str>,
    ) -> Result<ReconcileOutcome> {
        self.reconcile_at(article_id, content, featured_image_url, Utc::now())
            .await
    }

    /// Reconciles an article as currently stored.
    pub async fn reconcile_article(&self, article_id: i64) -> Result<ReconcileOutcome> {
        let article = self
            .articles
            .get_article(article_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("article {}", article_id)))?;
        self.reconcile(
            article.id,
            &article.content,
            article.featured_image_url.as_deref(),
        )
        .await
    }

    /// Reconciliation as article saves use it: failures are logged, never raised.
    pub async fn track_article_save(
        &self,
        article_id: i64,
        content: &str,
        featured_image_url: Option<&str>,
    ) -> Option<ReconcileOutcome> {
        match self.reconcile(article_id, content, featured_image_url).await {
            Ok(outcome) => {
                if outcome.changes() > 0 {
                    tracing::info!(
                        "Article {} images: {} created, {} adopted, {} used, {} unused",
                        article_id,
                        outcome.created,
                        outcome.adopted,
                        outcome.marked_used,
                        outcome.marked_unused
                    );
                }
                Some(outcome)
            }
            Err(e) => {
                tracing::warn!("Image tracking failed for article {}: {}", article_id, e);
                None
            }
        }
    }

    pub(crate) async fn reconcile_at(
        &self,
        article_id: i64,
        content: &str,
        featured_image_url: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome> {
        let featured = featured_image_url
            .map(str::trim)
            .filter(|url| !url.is_empty());

        let mut urls = self.extractor.extract(content);
        if let Some(url) = featured {
            urls.insert(url.to_string());
        }

        // Query variants of one storage object collapse into a single reference.
        let mut current: BTreeMap<ImageKey, Reference> = BTreeMap::new();
        for url in urls {
            let is_featured = featured == Some(url.as_str());
            let key = self.key_for_url(&url);
            current
                .entry(key)
                .and_modify(|reference| reference.is_featured |= is_featured)
                .or_insert(Reference { url, is_featured });
        }

        let records = self.images.images_for_article(article_id).await?;
        let delete_after = now + self.policy.grace_period;
        let mut outcome = ReconcileOutcome::default();
        let mut tracked: HashSet<ImageKey> = HashSet::new();

        for record in &records {
            let key = ImageKey::of_record(record);

            let desired = match current.get(&key) {
                Some(reference) => UsageUpdate::used(Some(article_id), reference.is_featured),
                // An existing schedule is kept so repeated saves do not push deletion back.
                None => UsageUpdate::unused(
                    Some(article_id),
                    record.marked_for_deletion_at.unwrap_or(delete_after),
                ),
            };
            tracked.insert(key);

            if desired == record.usage() {
                outcome.unchanged += 1;
                continue;
            }

            self.images.update_usage(record.id, desired).await?;
            if desired.is_used {
                outcome.marked_used += 1;
            } else {
                tracing::debug!("Image {} no longer used by article {}", record.id, article_id);
                outcome.marked_unused += 1;
            }
        }

        for (key, reference) in current.iter().filter(|(key, _)| !tracked.contains(*key)) {
            let existing = match key {
                ImageKey::Object(storage_id) => {
                    self.images.find_image_by_storage_id(storage_id).await?
                }
                ImageKey::Url(url) => self.images.find_image_by_url(url).await?,
            };

            match existing {
                Some(existing) if existing.is_deleted() => {
                    tracing::warn!(
                        "Article {} references {} which was already deleted from storage",
                        article_id,
                        reference.url
                    );
                    outcome.skipped += 1;
                }
                Some(existing) if existing.article_id.is_none() || !existing.is_used => {
                    if let Some(previous) = existing.article_id {
                        tracing::debug!(
                            "Image {} moves from article {} to {}",
                            existing.id,
                            previous,
                            article_id
                        );
                    }
                    self.images
                        .update_usage(
                            existing.id,
                            UsageUpdate::used(Some(article_id), reference.is_featured),
                        )
                        .await?;
                    outcome.adopted += 1;
                }
                Some(shared) => {
                    tracing::debug!(
                        "Image {} is also used by article {:?}, tracking a copy for article {}",
                        shared.id,
                        shared.article_id,
                        article_id
                    );
                    let record = NewImageRecord {
                        article_id: Some(article_id),
                        url: reference.url.clone(),
                        storage_id: shared.storage_id,
                        file_name: shared.file_name,
                        size: shared.size,
                        mime_type: shared.mime_type,
                        is_used: true,
                        is_featured_image: reference.is_featured,
                        marked_for_deletion_at: None,
                    };
                    self.images.insert_image(record).await?;
                    outcome.created += 1;
                }
                None => {
                    let file_name = file_name_from_url(&reference.url);
                    let record = NewImageRecord {
                        article_id: Some(article_id),
                        url: reference.url.clone(),
                        storage_id: match key {
                            ImageKey::Object(storage_id) => Some(storage_id.clone()),
                            ImageKey::Url(_) => None,
                        },
                        mime_type: mime_type_for(&file_name).map(str::to_string),
                        file_name,
                        size: 0,
                        is_used: true,
                        is_featured_image: reference.is_featured,
                        marked_for_deletion_at: None,
                    };
                    self.images.insert_image(record).await?;
                    outcome.created += 1;
                }
            }
        }

        Ok(outcome)
    }

    fn key_for_url(&self, url: &str) -> ImageKey {
        match self.storage.object_id_for_url(url) {
            Some(storage_id) => ImageKey::Object(storage_id),
            None => ImageKey::Url(url.to_string()),
        }
    }
}

/// What a reference points at: an object in our storage, or an external URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum ImageKey {
    Object(String),
    Url(String),
}

impl ImageKey {
    fn of_record(record: &ImageRecord) -> Self {
        match &record.storage_id {
            Some(storage_id) => ImageKey::Object(storage_id.clone()),
            None => ImageKey::Url(record.url.clone()),
        }
    }
}

struct Reference {
    url: String,
    is_featured: bool,
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use crate::models::{ImageState, NewImageRecord};
    use crate::tracker::testing::{now_millis, Fixture};
    use crate::tracker::ImageStore;

    #[tokio::test]
    async fn new_image_gets_a_used_record() {
        let fx = Fixture::new().await;
        let article_id = fx.article("", None).await;

        let outcome = fx
            .tracker
            .reconcile(article_id, "<img src='https://cdn.example/a.jpg'>", None)
            .await
            .unwrap();

        assert_eq!(outcome.created, 1);
        let images = fx.repo.images_for_article(article_id).await.unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].file_name, "a.jpg");
        assert_eq!(images[0].mime_type.as_deref(), Some("image/jpeg"));
        assert!(images[0].is_used);
        assert_eq!(images[0].storage_id, None);
    }

    #[tokio::test]
    async fn storage_urls_keep_their_object_id() {
        let fx = Fixture::new().await;
        let article_id = fx.article("", None).await;
        let url = fx.stored("articles/1-cat.png");

        fx.tracker
            .reconcile(article_id, &format!(r#"<img src="{}">"#, url), None)
            .await
            .unwrap();

        let images = fx.repo.images_for_article(article_id).await.unwrap();
        assert_eq!(images[0].storage_id.as_deref(), Some("articles/1-cat.png"));
    }

    #[tokio::test]
    async fn reconcile_is_idempotent() {
        let fx = Fixture::new().await;
        let article_id = fx.article("", None).await;
        let content = r#"<img src="https://cdn.example/a.jpg"> ![b](https://cdn.example/b.png)"#;
        let featured = Some("https://cdn.example/hero.webp");

        let first = fx.tracker.reconcile(article_id, content, featured).await.unwrap();
        let before = fx.repo.images_for_article(article_id).await.unwrap();
        let second = fx.tracker.reconcile(article_id, content, featured).await.unwrap();
        let after = fx.repo.images_for_article(article_id).await.unwrap();

        assert_eq!(first.created, 3);
        assert_eq!(second.changes(), 0);
        assert_eq!(second.unchanged, 3);
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn removed_images_are_scheduled_not_deleted() {
        let fx = Fixture::new().await;
        let article_id = fx.article("", None).await;
        let now = now_millis();

        fx.tracker
            .reconcile_at(article_id, "https://cdn.example/a.jpg https://cdn.example/b.jpg", None, now)
            .await
            .unwrap();
        let outcome = fx
            .tracker
            .reconcile_at(article_id, "https://cdn.example/a.jpg", None, now)
            .await
            .unwrap();

        assert_eq!(outcome.marked_unused, 1);
        let removed = fx
            .repo
            .find_image_by_url("https://cdn.example/b.jpg")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            removed.state(),
            ImageState::PendingDeletion(now + Duration::hours(48))
        );

        // A later save keeps the original schedule.
        fx.tracker
            .reconcile_at(article_id, "https://cdn.example/a.jpg", None, now + Duration::hours(5))
            .await
            .unwrap();
        let removed = fx.repo.get_image(removed.id).await.unwrap().unwrap();
        assert_eq!(removed.marked_for_deletion_at, Some(now + Duration::hours(48)));
    }

    #[tokio::test]
    async fn re_adding_an_image_restores_it() {
        let fx = Fixture::new().await;
        let article_id = fx.article("", None).await;
        let content = "<img src='https://cdn.example/a.jpg'>";

        fx.tracker.reconcile(article_id, content, None).await.unwrap();
        fx.tracker.reconcile(article_id, "", None).await.unwrap();
        let outcome = fx.tracker.reconcile(article_id, content, None).await.unwrap();

        assert_eq!(outcome.marked_used, 1);
        assert_eq!(outcome.created, 0);
        let images = fx.repo.images_for_article(article_id).await.unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].state(), ImageState::Used);
    }

    #[tokio::test]
    async fn used_images_never_carry_a_deletion_mark() {
        let fx = Fixture::new().await;
        let article_id = fx.article("", None).await;

        for content in [
            "https://cdn.example/a.jpg https://cdn.example/b.jpg",
            "https://cdn.example/b.jpg",
            "https://cdn.example/a.jpg https://cdn.example/c.gif",
            "",
            "https://cdn.example/c.gif",
        ] {
            fx.tracker.reconcile(article_id, content, None).await.unwrap();
            for image in fx.repo.images_for_article(article_id).await.unwrap() {
                if image.is_used {
                    assert!(image.marked_for_deletion_at.is_none(), "{:?}", image);
                }
            }
        }
    }

    #[tokio::test]
    async fn featured_flag_moves_with_the_featured_url() {
        let fx = Fixture::new().await;
        let article_id = fx.article("", None).await;
        let content = "https://cdn.example/a.jpg https://cdn.example/b.jpg";

        fx.tracker
            .reconcile(article_id, content, Some("https://cdn.example/a.jpg"))
            .await
            .unwrap();
        fx.tracker
            .reconcile(article_id, content, Some("https://cdn.example/b.jpg"))
            .await
            .unwrap();

        let images = fx.repo.images_for_article(article_id).await.unwrap();
        let featured: Vec<_> = images
            .iter()
            .filter(|i| i.is_featured_image)
            .map(|i| i.url.as_str())
            .collect();
        assert_eq!(featured, vec!["https://cdn.example/b.jpg"]);
        assert!(images.iter().all(|i| i.is_used));
    }

    #[tokio::test]
    async fn featured_url_alone_is_tracked() {
        let fx = Fixture::new().await;
        let article_id = fx.article("", None).await;

        let outcome = fx
            .tracker
            .reconcile(article_id, "plain text", Some("  https://cdn.example/hero  "))
            .await
            .unwrap();

        assert_eq!(outcome.created, 1);
        let images = fx.repo.images_for_article(article_id).await.unwrap();
        assert_eq!(images[0].url, "https://cdn.example/hero");
        assert!(images[0].is_featured_image);
    }

    #[tokio::test]
    async fn orphan_uploads_are_adopted() {
        let fx = Fixture::new().await;
        let url = fx.stored("articles/0-upload.png");
        let upload = fx
            .repo
            .insert_image(NewImageRecord {
                article_id: None,
                url: url.clone(),
                storage_id: Some("articles/0-upload.png".to_string()),
                file_name: "upload.png".to_string(),
                size: 100,
                mime_type: Some("image/png".to_string()),
                is_used: false,
                is_featured_image: false,
                marked_for_deletion_at: Some(chrono::Utc::now() + Duration::hours(48)),
            })
            .await
            .unwrap();
        let article_id = fx.article("", None).await;

        let outcome = fx
            .tracker
            .reconcile(article_id, &format!("<img src=\"{}\">", url), None)
            .await
            .unwrap();

        assert_eq!(outcome.adopted, 1);
        assert_eq!(outcome.created, 0);
        let adopted = fx.repo.get_image(upload.id).await.unwrap().unwrap();
        assert_eq!(adopted.article_id, Some(article_id));
        assert_eq!(adopted.state(), ImageState::Used);
    }

    #[tokio::test]
    async fn deleted_images_are_not_resurrected() {
        let fx = Fixture::new().await;
        let article_id = fx.article("", None).await;
        let content = "https://cdn.example/gone.png";

        fx.tracker.reconcile(article_id, content, None).await.unwrap();
        let image = fx.repo.find_image_by_url(content).await.unwrap().unwrap();
        fx.repo.mark_deleted(image.id, chrono::Utc::now()).await.unwrap();

        let outcome = fx.tracker.reconcile(article_id, content, None).await.unwrap();
        assert_eq!(outcome.skipped, 1);
        assert_eq!(outcome.changes(), 0);
    }

    #[tokio::test]
    async fn save_hook_reports_outcome() {
        let fx = Fixture::new().await;
        let article_id = fx.article("https://cdn.example/a.jpg", None).await;

        let outcome = fx
            .tracker
            .track_article_save(article_id, "https://cdn.example/a.jpg", None)
            .await;
        assert_eq!(outcome.map(|o| o.created), Some(1));

        let missing = fx.tracker.reconcile_article(9999).await;
        assert!(missing.is_err());
    }
}
