//! Namespaced JSON key/value cache on disk.
//!
//! Each namespace is a single JSON object stored in `<dir>/<namespace>.json`.
//! Every read loads the whole file and every write rewrites it, so a crash can
//! only ever lose the write in flight.
//!
//! ## Staleness
//!
//! With `max_age` set, the file's modification time decides freshness for the
//! whole namespace: once it is older than `max_age`, every `get` misses even
//! though the keys are still on disk. A later `set` rewrites the file and
//! makes the namespace fresh again.
//!
//! I/O and parse failures never surface to callers. A broken file reads as an
//! empty store and the problem is logged.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheOptions {
    /// Namespace-wide staleness window. `None` disables expiry.
    pub max_age: Option<Duration>,
}

/// A single cache namespace.
#[derive(Debug, Clone)]
pub struct LocalCache {
    namespace: String,
    path: PathBuf,
    options: CacheOptions,
}

impl LocalCache {
    /// Open a namespace, creating an empty store file when none exists.
    pub fn open(dir: &Path, namespace: &str, options: CacheOptions) -> Self {
        let path = dir.join(format!("{namespace}.json"));
        if !path.exists() {
            if let Err(e) = fs::create_dir_all(dir).and_then(|_| fs::write(&path, "{}")) {
                tracing::warn!("failed to create cache file {}: {e}", path.display());
            }
        }
        Self {
            namespace: namespace.to_string(),
            path,
            options,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the namespace is older than `max_age`.
    pub fn is_stale(&self) -> bool {
        let Some(max_age) = self.options.max_age else {
            return false;
        };
        match fs::metadata(&self.path).and_then(|m| m.modified()) {
            Ok(modified) => SystemTime::now()
                .duration_since(modified)
                .map(|age| age > max_age)
                .unwrap_or(false),
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("failed to stat cache {}: {e}", self.path.display());
                }
                false
            }
        }
    }

    /// Look up a key. Misses on stale namespaces, absent keys, stored nulls,
    /// and values that do not deserialize as `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if self.is_stale() {
            return None;
        }
        let value = self.load().remove(key)?;
        if value.is_null() {
            return None;
        }
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!("cache {}: key {key} has unexpected shape: {e}", self.namespace);
                None
            }
        }
    }

    /// `get`, falling back to `producer` on a miss. The produced value is not
    /// stored; producers that want persistence call `set` themselves.
    pub async fn get_or_else<T, F, Fut>(&self, key: &str, producer: F) -> T
    where
        T: DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        match self.get(key) {
            Some(v) => v,
            None => producer().await,
        }
    }

    /// Store a value and hand it back.
    pub fn set<T: Serialize>(&self, key: &str, value: T) -> T {
        let mut store = self.load();
        match serde_json::to_value(&value) {
            Ok(json) => {
                store.insert(key.to_string(), json);
                self.save(&store);
            }
            Err(e) => tracing::warn!("cache {}: cannot serialize {key}: {e}", self.namespace),
        }
        value
    }

    /// Reset the namespace to an empty store.
    pub fn clear(&self) {
        self.save(&Map::new());
    }

    fn load(&self) -> Map<String, Value> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("failed to read cache {}: {e}", self.path.display());
                }
                String::new()
            }
        };
        if content.trim().is_empty() {
            return Map::new();
        }
        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(map)) => map,
            Ok(_) => {
                tracing::warn!("cache {} is not a JSON object, ignoring", self.path.display());
                Map::new()
            }
            Err(e) => {
                tracing::warn!("cache {} is malformed: {e}", self.path.display());
                Map::new()
            }
        }
    }

    fn save(&self, store: &Map<String, Value>) {
        let result = serde_json::to_string_pretty(store)
            .map_err(std::io::Error::other)
            .and_then(|text| {
                if let Some(parent) = self.path.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&self.path, text)
            });
        if let Err(e) = result {
            tracing::warn!("failed to write cache {}: {e}", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_returns_value_and_get_reads_it() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalCache::open(dir.path(), "cache-test", CacheOptions::default());

        assert_eq!(cache.set::<Option<i32>>("count", None), None);
        assert_eq!(cache.get::<i32>("count"), None);

        assert_eq!(cache.set("count", 1), 1);
        assert_eq!(cache.get::<i32>("count"), Some(1));
    }

    #[test]
    fn test_namespace_created_lazily_as_empty_object() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalCache::open(&dir.path().join("nested"), "ns", CacheOptions::default());
        assert_eq!(fs::read_to_string(cache.path()).unwrap(), "{}");
        assert_eq!(cache.get::<String>("missing"), None);
    }

    #[test]
    fn test_max_age_expires_whole_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalCache::open(
            dir.path(),
            "aging",
            CacheOptions {
                max_age: Some(Duration::from_millis(200)),
            },
        );
        assert_eq!(cache.set("foo", 1), 1);
        assert_eq!(cache.get::<i32>("foo"), Some(1));

        std::thread::sleep(Duration::from_millis(400));

        assert_eq!(cache.get::<i32>("foo"), None);
        // still on disk
        let raw: Value = serde_json::from_str(&fs::read_to_string(cache.path()).unwrap()).unwrap();
        assert_eq!(raw["foo"], 1);
    }

    #[test]
    fn test_malformed_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalCache::open(dir.path(), "broken", CacheOptions::default());
        fs::write(cache.path(), "{not json").unwrap();

        assert_eq!(cache.get::<i32>("a"), None);
        assert_eq!(cache.set("a", 2), 2);
        assert_eq!(cache.get::<i32>("a"), Some(2));
    }

    #[test]
    fn test_last_writer_wins_across_handles() {
        let dir = tempfile::tempdir().unwrap();
        let a = LocalCache::open(dir.path(), "shared", CacheOptions::default());
        let b = LocalCache::open(dir.path(), "shared", CacheOptions::default());
        a.set("k", "first".to_string());
        b.set("k", "second".to_string());
        assert_eq!(a.get::<String>("k").as_deref(), Some("second"));
    }

    #[test]
    fn test_clear_resets_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalCache::open(dir.path(), "clearing", CacheOptions::default());
        cache.set("k", 1);
        cache.clear();
        assert_eq!(cache.get::<i32>("k"), None);
    }

    #[tokio::test]
    async fn test_get_or_else_uses_producer_on_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalCache::open(dir.path(), "fixtures", CacheOptions::default());

        let body: String = cache
            .get_or_else("page", || async { cache.set("page", "<html></html>".to_string()) })
            .await;
        assert_eq!(body, "<html></html>");

        let again: String = cache
            .get_or_else("page", || async { "unused".to_string() })
            .await;
        assert_eq!(again, "<html></html>");
    }
}
