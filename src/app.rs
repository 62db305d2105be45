use std::sync::Arc;

use crate::config::Config;
use crate::db::Repository;
use crate::error::Result;
use crate::storage::{HttpObjectStorage, ObjectStorage};
use crate::tracker::{ImageTracker, ImageUrlExtractor, RegexPattern, TrackerPolicy};

/// Everything a request or command needs, built once from the config.
pub struct App {
    pub config: Config,
    pub repository: Arc<Repository>,
    pub tracker: ImageTracker,
}

impl App {
    pub async fn new(config: Config) -> Result<Self> {
        let repository = Arc::new(Repository::new(&config.db_path).await?);
        let storage: Arc<dyn ObjectStorage> = Arc::new(HttpObjectStorage::new(&config.storage)?);

        let extractor = build_extractor(&config, storage.as_ref());
        tracing::debug!("Image URL patterns: {:?}", extractor.pattern_names());

        let tracker = ImageTracker::new(
            repository.clone(),
            repository.clone(),
            storage,
            extractor,
            TrackerPolicy::from_config(&config),
        );

        Ok(Self {
            config,
            repository,
            tracker,
        })
    }
}

/// Default patterns plus our storage's public path and every configured CDN host.
pub fn build_extractor(config: &Config, storage: &dyn ObjectStorage) -> ImageUrlExtractor {
    let mut extractor = ImageUrlExtractor::with_default_patterns()
        .with_pattern(RegexPattern::url_prefix("storage", &storage.public_url("")));

    for host in config.cdn_hosts.iter().filter(|h| !h.trim().is_empty()) {
        extractor.register(Box::new(RegexPattern::cdn_host(host)));
    }
    extractor
}
