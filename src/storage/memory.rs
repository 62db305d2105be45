use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use super::{object_key, ObjectStorage, StorageError, StorageResult, StoredObject};

/// In-process storage for tests, with per-object failure injection.
pub struct MemoryStorage {
    base_url: String,
    objects: Mutex<HashMap<String, i64>>,
    failing: Mutex<HashSet<String>>,
    deleted: Mutex<Vec<String>>,
}

impl MemoryStorage {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            objects: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            deleted: Mutex::new(Vec::new()),
        }
    }

    pub fn insert(&self, id: &str, size: i64) {
        self.objects.lock().unwrap().insert(id.to_string(), size);
    }

    pub fn fail_on(&self, id: &str) {
        self.failing.lock().unwrap().insert(id.to_string());
    }

    /// Removes an object behind the tracker's back.
    pub fn delete_now(&self, id: &str) {
        self.objects.lock().unwrap().remove(id);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.objects.lock().unwrap().contains_key(id)
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ObjectStorage for MemoryStorage {
    async fn upload(&self, bytes: Vec<u8>, name: &str, folder: &str) -> StorageResult<StoredObject> {
        let id = object_key(folder, name, 0);
        let size = bytes.len() as i64;
        self.insert(&id, size);
        Ok(StoredObject {
            url: self.public_url(&id),
            id,
            size,
        })
    }

    async fn delete(&self, id: &str) -> StorageResult<()> {
        if self.failing.lock().unwrap().contains(id) {
            return Err(StorageError::Api {
                status: 500,
                message: format!("injected failure for {}", id),
            });
        }
        match self.objects.lock().unwrap().remove(id) {
            Some(_) => {
                self.deleted.lock().unwrap().push(id.to_string());
                Ok(())
            }
            None => Err(StorageError::NotFound(id.to_string())),
        }
    }

    fn public_url(&self, id: &str) -> String {
        format!("{}/{}", self.base_url, id)
    }

    fn object_id_for_url(&self, url: &str) -> Option<String> {
        let rest = url.strip_prefix(&self.base_url)?.strip_prefix('/')?;
        let key = rest.split(['?', '#']).next().unwrap_or(rest);
        (!key.is_empty()).then(|| key.to_string())
    }
}
