// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Bounded in-process backend with lazy expiry and LRU eviction.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::backend::CacheBackend;
use crate::error::Result;

const DEFAULT_MAX_ENTRIES: usize = 50_000;

#[derive(Debug, Clone)]
enum Data {
	String(String),
	Set(HashSet<String>),
}

#[derive(Debug, Clone)]
struct StoredValue {
	data: Data,
	expires_at: Instant,
	last_used: Instant,
}

#[derive(Debug)]
struct Inner {
	entries: HashMap<String, StoredValue>,
	max_entries: usize,
}

impl Inner {
	/// Fetch a live entry, dropping it if its TTL has passed.
	fn live(&mut self, key: &str, now: Instant) -> Option<&mut StoredValue> {
		let expired = match self.entries.get(key) {
			Some(entry) => entry.expires_at <= now,
			None => return None,
		};
		if expired {
			self.entries.remove(key);
			return None;
		}
		self.entries.get_mut(key)
	}

	fn insert(&mut self, key: String, value: StoredValue) {
		if !self.entries.contains_key(&key) && self.entries.len() >= self.max_entries {
			self.evict(value.last_used);
		}
		self.entries.insert(key, value);
	}

	fn evict(&mut self, now: Instant) {
		let before = self.entries.len();
		self.entries.retain(|_, entry| entry.expires_at > now);
		if self.entries.len() < before {
			return;
		}

		if let Some(oldest) = self
			.entries
			.iter()
			.min_by_key(|(_, entry)| entry.last_used)
			.map(|(k, _)| k.clone())
		{
			self.entries.remove(&oldest);
		}
	}
}

#[derive(Debug)]
pub struct MemoryCacheBackend {
	inner: Mutex<Inner>,
}

impl Default for MemoryCacheBackend {
	fn default() -> Self {
		Self::new()
	}
}

impl MemoryCacheBackend {
	pub fn new() -> Self {
		Self::with_max_entries(DEFAULT_MAX_ENTRIES)
	}

	pub fn with_max_entries(max_entries: usize) -> Self {
		Self {
			inner: Mutex::new(Inner {
				entries: HashMap::new(),
				max_entries: max_entries.max(1),
			}),
		}
	}

	pub fn len(&self) -> usize {
		self.inner.lock().entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
	async fn get(&self, key: &str) -> Result<Option<String>> {
		let now = Instant::now();
		let mut inner = self.inner.lock();
		Ok(inner.live(key, now).and_then(|entry| {
			entry.last_used = now;
			match &entry.data {
				Data::String(s) => Some(s.clone()),
				Data::Set(_) => None,
			}
		}))
	}

	async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
		let now = Instant::now();
		self.inner.lock().insert(
			key.to_string(),
			StoredValue {
				data: Data::String(value),
				expires_at: now + ttl,
				last_used: now,
			},
		);
		Ok(())
	}

	async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
		let mut values = Vec::with_capacity(keys.len());
		for key in keys {
			values.push(self.get(key).await?);
		}
		Ok(values)
	}

	async fn mset(&self, entries: Vec<(String, String)>, ttl: Duration) -> Result<()> {
		let now = Instant::now();
		let mut inner = self.inner.lock();
		for (key, value) in entries {
			inner.insert(
				key,
				StoredValue {
					data: Data::String(value),
					expires_at: now + ttl,
					last_used: now,
				},
			);
		}
		Ok(())
	}

	async fn del(&self, keys: &[String]) -> Result<u64> {
		let now = Instant::now();
		let mut inner = self.inner.lock();
		let mut removed = 0;
		for key in keys {
			if let Some(entry) = inner.entries.remove(key) {
				if entry.expires_at > now {
					removed += 1;
				}
			}
		}
		Ok(removed)
	}

	async fn sadd(&self, key: &str, members: &[String], ttl: Duration) -> Result<()> {
		let now = Instant::now();
		let mut inner = self.inner.lock();
		let wanted = now + ttl;

		if let Some(entry) = inner.live(key, now) {
			if let Data::Set(set) = &mut entry.data {
				set.extend(members.iter().cloned());
				entry.expires_at = entry.expires_at.max(wanted);
				entry.last_used = now;
				return Ok(());
			}
		}

		inner.insert(
			key.to_string(),
			StoredValue {
				data: Data::Set(members.iter().cloned().collect()),
				expires_at: wanted,
				last_used: now,
			},
		);
		Ok(())
	}

	async fn smembers(&self, key: &str) -> Result<Vec<String>> {
		let now = Instant::now();
		let mut inner = self.inner.lock();
		Ok(match inner.live(key, now).map(|entry| &entry.data) {
			Some(Data::Set(set)) => set.iter().cloned().collect(),
			_ => Vec::new(),
		})
	}

	async fn exists(&self, key: &str) -> Result<bool> {
		let now = Instant::now();
		Ok(self.inner.lock().live(key, now).is_some())
	}

	async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
		let now = Instant::now();
		let mut inner = self.inner.lock();
		Ok(inner
			.live(key, now)
			.map(|entry| entry.expires_at.saturating_duration_since(now)))
	}

	async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
		let now = Instant::now();
		let mut inner = self.inner.lock();
		Ok(match inner.live(key, now) {
			Some(entry) => {
				entry.expires_at = now + ttl;
				true
			}
			None => false,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const MINUTE: Duration = Duration::from_secs(60);

	#[tokio::test]
	async fn test_set_and_get() {
		let backend = MemoryCacheBackend::new();
		backend.set("a", "1".to_string(), MINUTE).await.unwrap();
		assert_eq!(backend.get("a").await.unwrap(), Some("1".to_string()));
		assert_eq!(backend.get("missing").await.unwrap(), None);
	}

	#[tokio::test]
	async fn test_physical_expiry_is_lazy() {
		let backend = MemoryCacheBackend::new();
		backend
			.set("a", "1".to_string(), Duration::from_millis(10))
			.await
			.unwrap();
		tokio::time::sleep(Duration::from_millis(30)).await;
		assert_eq!(backend.get("a").await.unwrap(), None);
		assert!(backend.is_empty());
	}

	#[tokio::test]
	async fn test_sadd_extends_but_never_shortens_ttl() {
		let backend = MemoryCacheBackend::new();
		backend
			.sadd("tag:x", &["k1".to_string()], Duration::from_secs(600))
			.await
			.unwrap();
		backend
			.sadd("tag:x", &["k2".to_string()], Duration::from_secs(10))
			.await
			.unwrap();

		let ttl = backend.ttl("tag:x").await.unwrap().unwrap();
		assert!(ttl > Duration::from_secs(500));

		let mut members = backend.smembers("tag:x").await.unwrap();
		members.sort();
		assert_eq!(members, vec!["k1", "k2"]);
	}

	#[tokio::test]
	async fn test_del_counts_existing_keys() {
		let backend = MemoryCacheBackend::new();
		backend.set("a", "1".to_string(), MINUTE).await.unwrap();
		backend.set("b", "2".to_string(), MINUTE).await.unwrap();
		let removed = backend
			.del(&["a".to_string(), "b".to_string(), "c".to_string()])
			.await
			.unwrap();
		assert_eq!(removed, 2);
	}

	#[tokio::test]
	async fn test_expire_and_exists() {
		let backend = MemoryCacheBackend::new();
		assert!(!backend.expire("a", MINUTE).await.unwrap());
		backend.set("a", "1".to_string(), MINUTE).await.unwrap();
		assert!(backend.exists("a").await.unwrap());
		assert!(backend.expire("a", Duration::from_secs(5)).await.unwrap());
		assert!(backend.ttl("a").await.unwrap().unwrap() <= Duration::from_secs(5));
	}

	#[tokio::test]
	async fn test_lru_eviction() {
		let backend = MemoryCacheBackend::with_max_entries(3);
		backend.set("a", "1".to_string(), MINUTE).await.unwrap();
		tokio::time::sleep(Duration::from_millis(2)).await;
		backend.set("b", "2".to_string(), MINUTE).await.unwrap();
		tokio::time::sleep(Duration::from_millis(2)).await;
		backend.set("c", "3".to_string(), MINUTE).await.unwrap();
		tokio::time::sleep(Duration::from_millis(2)).await;

		backend.get("a").await.unwrap();
		backend.set("d", "4".to_string(), MINUTE).await.unwrap();

		assert!(backend.exists("a").await.unwrap());
		assert!(!backend.exists("b").await.unwrap());
		assert!(backend.exists("d").await.unwrap());
		assert_eq!(backend.len(), 3);
	}
}
