//! Bounded LRU cache over `StorageKey -> FileMetadata`, sitting in front
//! of the durable `files` namespace. Grounded on `namenode.py`'s
//! `OrderedDict`-based `cache_metadata`/`get_cached_metadata`, reimplemented
//! with the `lru` crate (used elsewhere in the retrieval pack for an
//! analogous on-disk block cache).
use lru::LruCache;
use tokio::sync::Mutex;

use crate::namespace::FileMetadata;

pub struct MetadataCache {
	inner: Mutex<LruCache<String, FileMetadata>>,
}

impl MetadataCache {
	pub fn new(capacity: usize) -> Self {
		let capacity = std::num::NonZeroUsize::new(capacity.max(1)).unwrap();
		Self {
			inner: Mutex::new(LruCache::new(capacity)),
		}
	}

	/// Fetches and promotes `key` to most-recently-used, mirroring
	/// `get_cached_metadata`'s pop-then-reinsert.
	pub async fn get(&self, key: &str) -> Option<FileMetadata> {
		self.inner.lock().await.get(key).cloned()
	}

	pub async fn put(&self, key: String, value: FileMetadata) {
		self.inner.lock().await.put(key, value);
	}

	pub async fn remove(&self, key: &str) {
		self.inner.lock().await.pop(key);
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use strata_util::time::now_epoch_secs;

	fn dummy(full_path: &str) -> FileMetadata {
		FileMetadata {
			filename: "f".to_string(),
			full_path: full_path.to_string(),
			storage_name: full_path.replace('/', "__"),
			blocks: vec![],
			total_size: 0,
			creation_time: now_epoch_secs(),
		}
	}

	#[tokio::test]
	async fn evicts_least_recently_used() {
		let cache = MetadataCache::new(2);
		cache.put("a".to_string(), dummy("/a")).await;
		cache.put("b".to_string(), dummy("/b")).await;
		// touch "a" so "b" becomes the least-recently-used entry
		cache.get("a").await;
		cache.put("c".to_string(), dummy("/c")).await;

		assert!(cache.get("a").await.is_some());
		assert!(cache.get("b").await.is_none());
		assert!(cache.get("c").await.is_some());
	}

	#[tokio::test]
	async fn remove_drops_entry() {
		let cache = MetadataCache::new(4);
		cache.put("a".to_string(), dummy("/a")).await;
		cache.remove("a").await;
		assert!(cache.get("a").await.is_none());
	}
}
