//! Object storage seam: where image bytes live and how they are removed.

mod http;
#[cfg(test)]
pub mod memory;

pub use http::HttpObjectStorage;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    /// The object is already gone. Callers deleting objects treat this as success.
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("storage request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("storage API error ({status}): {message}")]
    Api { status: u16, message: String },
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub id: String,
    pub url: String,
    pub size: i64,
}

#[async_trait::async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn upload(&self, bytes: Vec<u8>, name: &str, folder: &str) -> StorageResult<StoredObject>;

    async fn delete(&self, id: &str) -> StorageResult<()>;

    fn public_url(&self, id: &str) -> String;

    /// Maps a public URL back to the object it serves, if it is one of ours.
    fn object_id_for_url(&self, url: &str) -> Option<String>;
}

/// Deletes an object, counting an already-missing object as deleted.
pub async fn delete_idempotent(storage: &dyn ObjectStorage, id: &str) -> StorageResult<()> {
    match storage.delete(id).await {
        Ok(()) => Ok(()),
        Err(StorageError::NotFound(_)) => {
            tracing::debug!("Object {} already gone from storage", id);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Builds an object key that stays readable but cannot escape its folder.
pub fn object_key(folder: &str, name: &str, stamp: i64) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let sanitized = sanitized.trim_matches(|c| c == '.' || c == '-');
    let name = if sanitized.is_empty() { "image" } else { sanitized };

    let folder = folder.trim_matches('/');
    if folder.is_empty() {
        format!("{}-{}", stamp, name)
    } else {
        format!("{}/{}-{}", folder, stamp, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_key_sanitizes_name() {
        assert_eq!(
            object_key("articles/", "My Photo (1).JPG", 42),
            "articles/42-my-photo--1-.jpg"
        );
        assert_eq!(object_key("", "../../etc", 1), "1-etc");
        assert_eq!(object_key("x", "***", 1), "x/1-image");
    }

    #[tokio::test]
    async fn missing_object_deletes_cleanly() {
        let storage = memory::MemoryStorage::new("https://storage.test/public");
        tokio_test::assert_ok!(delete_idempotent(&storage, "nope.png").await);
    }

    #[tokio::test]
    async fn other_failures_propagate() {
        let storage = memory::MemoryStorage::new("https://storage.test/public");
        storage.insert("a.png", 10);
        storage.fail_on("a.png");
        assert!(delete_idempotent(&storage, "a.png").await.is_err());
    }
}
