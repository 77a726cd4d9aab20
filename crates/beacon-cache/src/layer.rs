// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeSet;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::backend::CacheBackend;
use crate::error::{CacheError, Result};

const DEFAULT_TTL: Duration = Duration::from_secs(300);
const DEFAULT_TAG_SLACK: Duration = Duration::from_secs(60);
const GENERATION_STRIPES: usize = 64;

fn tag_key(tag: &str) -> String {
	format!("tag:{tag}")
}

/// What is physically stored for every cached key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<T> {
	pub key: String,
	pub value: T,
	pub created_at: DateTime<Utc>,
	pub expires_at: DateTime<Utc>,
	#[serde(default)]
	pub tags: Vec<String>,
}

impl<T> CacheEntry<T> {
	pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
		self.expires_at <= now
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
	pub hits: u64,
	pub misses: u64,
	pub sets: u64,
	pub deletes: u64,
	pub errors: u64,
	pub hit_rate: f64,
}

#[derive(Debug, Default)]
struct Counters {
	hits: AtomicU64,
	misses: AtomicU64,
	sets: AtomicU64,
	deletes: AtomicU64,
	errors: AtomicU64,
}

/// Invalidation counters, striped by key or tag name. A read-through load
/// only keeps its result if no stripe it depends on moved while it ran.
struct Generations {
	stripes: [AtomicU64; GENERATION_STRIPES],
}

impl Generations {
	fn new() -> Self {
		Self {
			stripes: std::array::from_fn(|_| AtomicU64::new(0)),
		}
	}

	fn stripe(name: &str) -> usize {
		let mut hasher = DefaultHasher::new();
		name.hash(&mut hasher);
		(hasher.finish() % GENERATION_STRIPES as u64) as usize
	}

	fn bump(&self, name: &str) {
		self.stripes[Self::stripe(name)].fetch_add(1, Ordering::SeqCst);
	}

	fn snapshot<'a>(&self, names: impl Iterator<Item = &'a str>) -> Vec<(usize, u64)> {
		names
			.map(|name| {
				let stripe = Self::stripe(name);
				(stripe, self.stripes[stripe].load(Ordering::SeqCst))
			})
			.collect()
	}

	fn unchanged(&self, snapshot: &[(usize, u64)]) -> bool {
		snapshot
			.iter()
			.all(|(stripe, seen)| self.stripes[*stripe].load(Ordering::SeqCst) == *seen)
	}
}

pub struct CacheLayer {
	backend: Arc<dyn CacheBackend>,
	enabled: bool,
	default_ttl: Duration,
	tag_slack: Duration,
	counters: Counters,
	generations: Generations,
}

impl CacheLayer {
	pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
		Self {
			backend,
			enabled: true,
			default_ttl: DEFAULT_TTL,
			tag_slack: DEFAULT_TAG_SLACK,
			counters: Counters::default(),
			generations: Generations::new(),
		}
	}

	pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
		self.default_ttl = ttl;
		self
	}

	/// How much longer than its longest member a tag index lives.
	pub fn with_tag_slack(mut self, slack: Duration) -> Self {
		self.tag_slack = slack;
		self
	}

	/// A disabled cache misses every read and drops every write.
	pub fn with_enabled(mut self, enabled: bool) -> Self {
		self.enabled = enabled;
		self
	}

	pub fn default_ttl(&self) -> Duration {
		self.default_ttl
	}

	fn record_error(&self, op: &'static str, key: &str, error: &CacheError) {
		self.counters.errors.fetch_add(1, Ordering::Relaxed);
		warn!(op, key, error = %error, "cache operation failed, treating as miss");
	}

	fn decode<T: DeserializeOwned>(&self, key: &str, raw: &str) -> Option<CacheEntry<T>> {
		match serde_json::from_str::<CacheEntry<T>>(raw) {
			Ok(entry) => Some(entry),
			Err(e) => {
				self.record_error("decode", key, &CacheError::from(e));
				None
			}
		}
	}

	/// Unwrap a stored entry, evicting it if it is logically expired.
	async fn accept<T: DeserializeOwned>(&self, key: &str, raw: Option<String>) -> Option<T> {
		let entry = raw.and_then(|raw| self.decode::<T>(key, &raw));
		match entry {
			Some(entry) if !entry.is_expired(Utc::now()) => {
				self.counters.hits.fetch_add(1, Ordering::Relaxed);
				Some(entry.value)
			}
			Some(_) => {
				debug!(key, "cache entry logically expired");
				if let Err(e) = self.backend.del(&[key.to_string()]).await {
					self.record_error("del", key, &e);
				}
				self.counters.misses.fetch_add(1, Ordering::Relaxed);
				None
			}
			None => {
				self.counters.misses.fetch_add(1, Ordering::Relaxed);
				None
			}
		}
	}

	fn encode<T: Serialize>(
		&self,
		key: &str,
		value: &T,
		ttl: Duration,
		tags: &[String],
	) -> Result<String> {
		let now = Utc::now();
		let expires_at = now
			+ chrono::Duration::from_std(ttl).map_err(|e| CacheError::Backend(e.to_string()))?;
		let entry = CacheEntry {
			key: key.to_string(),
			value,
			created_at: now,
			expires_at,
			tags: tags.to_vec(),
		};
		Ok(serde_json::to_string(&entry)?)
	}

	#[instrument(skip(self))]
	pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
		if !self.enabled {
			self.counters.misses.fetch_add(1, Ordering::Relaxed);
			return None;
		}

		match self.backend.get(key).await {
			Ok(raw) => self.accept(key, raw).await,
			Err(e) => {
				self.record_error("get", key, &e);
				self.counters.misses.fetch_add(1, Ordering::Relaxed);
				None
			}
		}
	}

	/// Store a value. Returns whether it was written.
	#[instrument(skip(self, value))]
	pub async fn set<T: Serialize>(
		&self,
		key: &str,
		value: &T,
		ttl: Option<Duration>,
		tags: &[String],
	) -> bool {
		if !self.enabled {
			return false;
		}

		let ttl = ttl.unwrap_or(self.default_ttl);
		let raw = match self.encode(key, value, ttl, tags) {
			Ok(raw) => raw,
			Err(e) => {
				self.record_error("encode", key, &e);
				return false;
			}
		};

		if let Err(e) = self.backend.set(key, raw, ttl).await {
			self.record_error("set", key, &e);
			return false;
		}
		self.counters.sets.fetch_add(1, Ordering::Relaxed);

		let members = [key.to_string()];
		for tag in tags {
			let index = tag_key(tag);
			if let Err(e) = self
				.backend
				.sadd(&index, &members, ttl + self.tag_slack)
				.await
			{
				self.record_error("sadd", &index, &e);
			}
		}
		true
	}

	pub async fn mget<T: DeserializeOwned>(&self, keys: &[String]) -> Vec<Option<T>> {
		if !self.enabled || keys.is_empty() {
			self.counters
				.misses
				.fetch_add(keys.len() as u64, Ordering::Relaxed);
			return keys.iter().map(|_| None).collect();
		}

		match self.backend.mget(keys).await {
			Ok(raws) => {
				let mut values = Vec::with_capacity(keys.len());
				for (key, raw) in keys.iter().zip(raws) {
					values.push(self.accept(key, raw).await);
				}
				values
			}
			Err(e) => {
				self.record_error("mget", &keys.join(","), &e);
				self.counters
					.misses
					.fetch_add(keys.len() as u64, Ordering::Relaxed);
				keys.iter().map(|_| None).collect()
			}
		}
	}

	pub async fn mset<T: Serialize>(&self, entries: &[(String, T)], ttl: Option<Duration>) -> bool {
		if !self.enabled || entries.is_empty() {
			return false;
		}

		let ttl = ttl.unwrap_or(self.default_ttl);
		let mut encoded = Vec::with_capacity(entries.len());
		for (key, value) in entries {
			match self.encode(key, value, ttl, &[]) {
				Ok(raw) => encoded.push((key.clone(), raw)),
				Err(e) => {
					self.record_error("encode", key, &e);
					return false;
				}
			}
		}

		let count = encoded.len() as u64;
		match self.backend.mset(encoded, ttl).await {
			Ok(()) => {
				self.counters.sets.fetch_add(count, Ordering::Relaxed);
				true
			}
			Err(e) => {
				self.record_error("mset", "*", &e);
				false
			}
		}
	}

	pub async fn del(&self, key: &str) -> bool {
		self.mdel(&[key.to_string()]).await > 0
	}

	/// Delete keys, returning how many existed.
	pub async fn mdel(&self, keys: &[String]) -> u64 {
		if keys.is_empty() {
			return 0;
		}
		for key in keys {
			self.generations.bump(key);
		}
		match self.backend.del(keys).await {
			Ok(removed) => {
				self.counters.deletes.fetch_add(removed, Ordering::Relaxed);
				removed
			}
			Err(e) => {
				self.record_error("del", &keys.join(","), &e);
				0
			}
		}
	}

	/// Remove every key that was tagged with any of `tags`, then the tag
	/// indexes themselves. Returns the number of cached values removed.
	#[instrument(skip(self))]
	pub async fn invalidate_by_tags(&self, tags: &[String]) -> u64 {
		// Bump first so loads still in flight cannot re-store what this removes.
		for tag in tags {
			self.generations.bump(tag);
		}

		let mut keys = BTreeSet::new();
		for tag in tags {
			let index = tag_key(tag);
			match self.backend.smembers(&index).await {
				Ok(members) => keys.extend(members),
				Err(e) => self.record_error("smembers", &index, &e),
			}
		}

		let keys: Vec<String> = keys.into_iter().collect();
		let removed = self.mdel(&keys).await;

		let indexes: Vec<String> = tags.iter().map(|t| tag_key(t)).collect();
		if let Err(e) = self.backend.del(&indexes).await {
			self.record_error("del", &indexes.join(","), &e);
		}

		debug!(tags = ?tags, removed, "invalidated cache tags");
		removed
	}

	pub async fn exists(&self, key: &str) -> bool {
		match self.backend.exists(key).await {
			Ok(found) => found,
			Err(e) => {
				self.record_error("exists", key, &e);
				false
			}
		}
	}

	pub async fn ttl(&self, key: &str) -> Option<Duration> {
		match self.backend.ttl(key).await {
			Ok(ttl) => ttl,
			Err(e) => {
				self.record_error("ttl", key, &e);
				None
			}
		}
	}

	/// Change a key's physical TTL. The entry's logical expiry is unchanged,
	/// so this can shorten but never extend its visible lifetime.
	pub async fn expire(&self, key: &str, ttl: Duration) -> bool {
		match self.backend.expire(key, ttl).await {
			Ok(updated) => updated,
			Err(e) => {
				self.record_error("expire", key, &e);
				false
			}
		}
	}

	/// Read-through helper. On a miss the loader runs and a `Some` result is
	/// cached under `key` with the given tags; loader errors are returned
	/// untouched and nothing is cached.
	///
	/// A result is not cached when `key` or one of `tags` is invalidated
	/// while the loader runs, since the loader may have read the state the
	/// invalidation replaced. The value is still returned to the caller.
	pub async fn get_or_load<T, E, F, Fut>(
		&self,
		key: &str,
		ttl: Option<Duration>,
		tags: &[String],
		loader: F,
	) -> std::result::Result<Option<T>, E>
	where
		T: Serialize + DeserializeOwned,
		F: FnOnce() -> Fut,
		Fut: Future<Output = std::result::Result<Option<T>, E>>,
	{
		if let Some(value) = self.get::<T>(key).await {
			return Ok(Some(value));
		}

		let snapshot = self
			.generations
			.snapshot(std::iter::once(key).chain(tags.iter().map(String::as_str)));
		let loaded = loader().await?;
		if let Some(value) = &loaded {
			if !self.generations.unchanged(&snapshot) {
				debug!(key, "invalidated during load, not caching");
			} else if self.set(key, value, ttl, tags).await
				&& !self.generations.unchanged(&snapshot)
			{
				// Lost a race with an invalidation that ran between the check
				// and the write.
				self.del(key).await;
			}
		}
		Ok(loaded)
	}

	pub fn stats(&self) -> CacheStats {
		let hits = self.counters.hits.load(Ordering::Relaxed);
		let misses = self.counters.misses.load(Ordering::Relaxed);
		let lookups = hits + misses;
		CacheStats {
			hits,
			misses,
			sets: self.counters.sets.load(Ordering::Relaxed),
			deletes: self.counters.deletes.load(Ordering::Relaxed),
			errors: self.counters.errors.load(Ordering::Relaxed),
			hit_rate: if lookups == 0 {
				0.0
			} else {
				hits as f64 / lookups as f64
			},
		}
	}
}
