//! Keyed TTL cache owned by a service instance.
//!
//! Reads never block each other. Refreshing one key is serialized by a
//! per-key lock, so concurrent misses on the same key cause one computation.
//! Every insert evicts expired entries and idle refresh locks.

use dashmap::DashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Cache statistics for monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
	pub hits: u64,
	pub misses: u64,
}

#[derive(Debug)]
pub struct TtlCache<K, V>
where
	K: Eq + Hash,
{
	entries: DashMap<K, (V, Instant)>,
	refresh_locks: DashMap<K, Arc<Mutex<()>>>,
	/// `None` keeps entries until they are evicted for capacity.
	ttl: Option<Duration>,
	max_entries: Option<usize>,
	hits: AtomicU64,
	misses: AtomicU64,
}

impl<K, V> TtlCache<K, V>
where
	K: Eq + Hash + Clone,
	V: Clone,
{
	pub fn new(ttl: Duration) -> Self {
		Self::build(Some(ttl), None)
	}

	/// A cache whose entries never expire. Beyond `max_entries` the oldest
	/// entries are evicted.
	pub fn bounded(max_entries: usize) -> Self {
		Self::build(None, Some(max_entries.max(1)))
	}

	fn build(ttl: Option<Duration>, max_entries: Option<usize>) -> Self {
		Self {
			entries: DashMap::new(),
			refresh_locks: DashMap::new(),
			ttl,
			max_entries,
			hits: AtomicU64::new(0),
			misses: AtomicU64::new(0),
		}
	}

	fn is_fresh(&self, stored_at: Instant) -> bool {
		self.ttl.is_none_or(|ttl| stored_at.elapsed() < ttl)
	}

	/// Returns the cached value if present and not expired.
	pub fn get(&self, key: &K) -> Option<V> {
		let fresh = self
			.entries
			.get(key)
			.filter(|entry| self.is_fresh(entry.1))
			.map(|entry| entry.0.clone());
		match fresh {
			Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
			None => self.misses.fetch_add(1, Ordering::Relaxed),
		};
		fresh
	}

	pub fn insert(&self, key: K, value: V) {
		self.entries.insert(key, (value, Instant::now()));
		self.evict();
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Drops expired entries, the oldest entries beyond capacity and refresh
	/// locks nobody holds.
	pub fn evict(&self) {
		if self.ttl.is_some() {
			self.entries.retain(|_, entry| self.is_fresh(entry.1));
		}
		if let Some(max_entries) = self.max_entries {
			let excess = self.entries.len().saturating_sub(max_entries);
			if excess > 0 {
				let mut by_age: Vec<(K, Instant)> = self
					.entries
					.iter()
					.map(|entry| (entry.key().clone(), entry.value().1))
					.collect();
				by_age.sort_by_key(|(_, stored_at)| *stored_at);
				for (key, _) in by_age.into_iter().take(excess) {
					self.entries.remove(&key);
				}
			}
		}
		self.refresh_locks
			.retain(|_, lock| Arc::strong_count(lock) > 1);
	}

	pub fn invalidate(&self, key: &K) {
		self.entries.remove(key);
	}

	/// Lock that serializes refreshes of `key`.
	pub fn refresh_lock(&self, key: &K) -> Arc<Mutex<()>> {
		self.refresh_locks.entry(key.clone()).or_default().clone()
	}

	/// Returns the cached value or computes, stores and returns a fresh one.
	///
	/// Errors are returned to the caller and not cached.
	pub async fn get_or_try_insert_with<F, Fut, E>(&self, key: K, compute: F) -> Result<V, E>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<V, E>>,
	{
		if let Some(value) = self.get(&key) {
			return Ok(value);
		}
		let lock = self.refresh_lock(&key);
		let _guard = lock.lock().await;
		// Another task may have refreshed while this one waited.
		if let Some(value) = self.entries.get(&key).filter(|e| self.is_fresh(e.1)) {
			return Ok(value.0.clone());
		}
		let value = compute().await?;
		self.insert(key, value.clone());
		Ok(value)
	}

	pub fn stats(&self) -> CacheStats {
		CacheStats {
			hits: self.hits.load(Ordering::Relaxed),
			misses: self.misses.load(Ordering::Relaxed),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::AtomicUsize;

	#[tokio::test(start_paused = true)]
	async fn test_entries_expire_after_ttl() {
		let cache = TtlCache::new(Duration::from_secs(2));
		cache.insert("safe", 10u64);
		assert_eq!(cache.get(&"safe"), Some(10));

		tokio::time::advance(Duration::from_secs(3)).await;
		assert_eq!(cache.get(&"safe"), None);
		assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1 });
	}

	#[tokio::test(start_paused = true)]
	async fn test_insert_evicts_expired_entries_and_idle_locks() {
		let cache = TtlCache::new(Duration::from_secs(2));
		for block in 0..100u64 {
			drop(cache.refresh_lock(&block));
			cache.insert(block, block);
			tokio::time::advance(Duration::from_millis(500)).await;
		}
		// Only the last 2s worth of keys survive.
		assert_eq!(cache.len(), 4);
		assert!(cache.refresh_locks.is_empty());
		assert_eq!(cache.get(&99), Some(99));
		assert_eq!(cache.get(&90), None);
	}

	#[tokio::test(start_paused = true)]
	async fn test_held_refresh_lock_survives_eviction() {
		let cache = TtlCache::new(Duration::from_secs(2));
		let held = cache.refresh_lock(&"safe");
		cache.insert("head", 1u64);
		assert_eq!(cache.refresh_locks.len(), 1);
		assert!(Arc::ptr_eq(&held, &cache.refresh_lock(&"safe")));
	}

	#[tokio::test(start_paused = true)]
	async fn test_bounded_entries_never_expire_but_oldest_evicted() {
		let cache = TtlCache::bounded(3);
		for key in 1..=3u64 {
			cache.insert(key, key * 10);
			tokio::time::advance(Duration::from_secs(1)).await;
		}
		tokio::time::advance(Duration::from_secs(86_400)).await;
		assert_eq!(cache.get(&1), Some(10));

		cache.insert(4, 40);
		assert_eq!(cache.len(), 3);
		assert_eq!(cache.get(&1), None);
		assert_eq!(cache.get(&4), Some(40));
	}

	#[tokio::test]
	async fn test_concurrent_misses_compute_once() {
		let cache = Arc::new(TtlCache::<&str, u64>::new(Duration::from_secs(60)));
		let computed = Arc::new(AtomicUsize::new(0));

		let tasks: Vec<_> = (0..8)
			.map(|_| {
				let cache = cache.clone();
				let computed = computed.clone();
				tokio::spawn(async move {
					cache
						.get_or_try_insert_with("tx", || async {
							computed.fetch_add(1, Ordering::SeqCst);
							tokio::task::yield_now().await;
							Ok::<_, ()>(42)
						})
						.await
				})
			})
			.collect();
		for task in tasks {
			assert_eq!(task.await.unwrap(), Ok(42));
		}
		assert_eq!(computed.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn test_errors_are_not_cached() {
		let cache = TtlCache::<u8, u8>::new(Duration::from_secs(60));
		let failed: Result<u8, &str> = cache.get_or_try_insert_with(1, || async { Err("down") }).await;
		assert!(failed.is_err());
		let ok: Result<u8, &str> = cache.get_or_try_insert_with(1, || async { Ok(5) }).await;
		assert_eq!(ok, Ok(5));
	}
}
