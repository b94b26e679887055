//! Document storage for feature handlers.
//!
//! Records are opaque JSON documents addressed by `(collection, key)`. There
//! are no multi-document transactions; a handler that touches two documents
//! must cope with the second write failing.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::{path::PathBuf, time::Duration};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::cache::lru_cache::LRUCache;

const CACHED_DOCUMENTS: usize = 1024;
const CACHE_TTL: Duration = Duration::from_secs(600);

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>>;
    async fn put(&self, collection: &str, key: &str, value: Value) -> Result<()>;
    /// Returns whether a document was removed.
    async fn delete(&self, collection: &str, key: &str) -> Result<bool>;
}

impl dyn DocumentStore + '_ {
    pub async fn load<T: DeserializeOwned>(&self, collection: &str, key: &str) -> Result<Option<T>> {
        match self.get(collection, key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value).with_context(|| {
                format!("corrupt document {}/{}", collection, key)
            })?)),
            None => Ok(None),
        }
    }

    pub async fn save<T: Serialize + Sync>(&self, collection: &str, key: &str, value: &T) -> Result<()> {
        self.put(collection, key, serde_json::to_value(value)?).await
    }
}

/// One pretty-printed JSON file per document under
/// `<data_dir>/<collection>/<key>.json`, with a bounded read-through cache.
pub struct JsonStorage {
    data_dir: PathBuf,
    cache: LRUCache<(String, String), Value>,
}

impl JsonStorage {
    pub async fn new(data_dir: PathBuf) -> Result<Self> {
        Self::with_cache(data_dir, CACHED_DOCUMENTS, CACHE_TTL).await
    }

    async fn with_cache(data_dir: PathBuf, capacity: usize, ttl: Duration) -> Result<Self> {
        fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("cannot create data directory {}", data_dir.display()))?;

        info!("📁 Storage initialised at {}", data_dir.display());
        Ok(Self {
            data_dir,
            cache: LRUCache::with_ttl(capacity, ttl),
        })
    }

    fn document_path(&self, collection: &str, key: &str) -> Result<PathBuf> {
        validate_name("collection", collection)?;
        validate_name("key", key)?;
        Ok(self.data_dir.join(collection).join(format!("{}.json", key)))
    }

    fn cache_key(collection: &str, key: &str) -> (String, String) {
        (collection.to_string(), key.to_string())
    }
}

/// Keeps names usable as file names on every platform and rules out path
/// traversal.
fn validate_name(kind: &str, name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= 128
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');

    if !valid {
        anyhow::bail!("invalid {} name {:?}", kind, name);
    }
    Ok(())
}

#[async_trait]
impl DocumentStore for JsonStorage {
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>> {
        let path = self.document_path(collection, key)?;

        if let Some(value) = self.cache.get(&Self::cache_key(collection, key)) {
            return Ok(Some(value));
        }

        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("cannot read {}", path.display())),
        };

        let value: Value = serde_json::from_str(&content)
            .with_context(|| format!("invalid JSON in {}", path.display()))?;
        self.cache.put(Self::cache_key(collection, key), value.clone());
        Ok(Some(value))
    }

    async fn put(&self, collection: &str, key: &str, value: Value) -> Result<()> {
        let path = self.document_path(collection, key)?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await?;
        }

        // Write then rename so a crash never leaves a half-written document.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(&value)?).await?;
        fs::rename(&tmp, &path).await?;

        self.cache.put(Self::cache_key(collection, key), value);
        debug!("💾 Saved {}/{}", collection, key);
        Ok(())
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<bool> {
        let path = self.document_path(collection, key)?;
        self.cache.remove(&Self::cache_key(collection, key));

        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!("🗑️ Deleted {}/{}", collection, key);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => {
                warn!("Failed to delete {}: {}", path.display(), e);
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::Arc;

    async fn storage() -> (tempfile::TempDir, JsonStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path().to_path_buf()).await.unwrap();
        (dir, storage)
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let (_dir, storage) = storage().await;

        assert_eq!(storage.get("tags", "1_hello").await.unwrap(), None);
        storage.put("tags", "1_hello", json!({"content": "hi"})).await.unwrap();
        assert_eq!(
            storage.get("tags", "1_hello").await.unwrap(),
            Some(json!({"content": "hi"}))
        );

        assert!(storage.delete("tags", "1_hello").await.unwrap());
        assert!(!storage.delete("tags", "1_hello").await.unwrap());
        assert_eq!(storage.get("tags", "1_hello").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_documents_survive_restart() {
        let (dir, storage) = storage().await;
        storage.put("guilds", "42", json!({"volume": 80})).await.unwrap();
        drop(storage);

        let reopened = JsonStorage::new(dir.path().to_path_buf()).await.unwrap();
        assert_eq!(
            reopened.get("guilds", "42").await.unwrap(),
            Some(json!({"volume": 80}))
        );
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let (_dir, storage) = storage().await;
        assert!(storage.get("../etc", "passwd").await.is_err());
        assert!(storage.put("tags", "a/b", json!(1)).await.is_err());
        assert!(storage.delete("tags", "").await.is_err());
    }

    #[tokio::test]
    async fn test_cache_stays_within_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::with_cache(dir.path().to_path_buf(), 2, CACHE_TTL)
            .await
            .unwrap();

        for key in ["a", "b", "c", "d"] {
            storage.put("tags", key, json!({ "name": key })).await.unwrap();
            storage.get("tags", key).await.unwrap();
        }
        assert_eq!(storage.cache.len(), 2);

        // Evicted documents are read back from disk.
        assert_eq!(
            storage.get("tags", "a").await.unwrap(),
            Some(json!({"name": "a"}))
        );
        assert_eq!(storage.cache.len(), 2);
    }

    #[tokio::test]
    async fn test_expired_cache_entries_reload_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::with_cache(dir.path().to_path_buf(), 8, Duration::ZERO)
            .await
            .unwrap();

        storage.put("guilds", "1", json!({"ai": false})).await.unwrap();
        std::fs::write(dir.path().join("guilds").join("1.json"), r#"{"ai": true}"#).unwrap();
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(
            storage.get("guilds", "1").await.unwrap(),
            Some(json!({"ai": true}))
        );
    }

    #[tokio::test]
    async fn test_typed_helpers() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Counter {
            uses: u32,
        }

        let (_dir, storage) = storage().await;
        let store: Arc<dyn DocumentStore> = Arc::new(storage);

        store.save("counters", "x", &Counter { uses: 3 }).await.unwrap();
        assert_eq!(
            store.load::<Counter>("counters", "x").await.unwrap(),
            Some(Counter { uses: 3 })
        );
        assert_eq!(store.load::<Counter>("counters", "y").await.unwrap(), None);
    }
}
