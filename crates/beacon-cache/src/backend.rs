// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Key/value store with physical TTLs and string sets, the subset of a
/// Redis-like server the cache layer needs.
#[async_trait]
pub trait CacheBackend: Send + Sync {
	async fn get(&self, key: &str) -> Result<Option<String>>;

	async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

	async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>>;

	async fn mset(&self, entries: Vec<(String, String)>, ttl: Duration) -> Result<()>;

	/// Returns how many of the keys existed.
	async fn del(&self, keys: &[String]) -> Result<u64>;

	/// Add members to a set. The set's TTL becomes the larger of its
	/// current TTL and `ttl`.
	async fn sadd(&self, key: &str, members: &[String], ttl: Duration) -> Result<()>;

	async fn smembers(&self, key: &str) -> Result<Vec<String>>;

	async fn exists(&self, key: &str) -> Result<bool>;

	/// Remaining physical TTL, or `None` if the key does not exist.
	async fn ttl(&self, key: &str) -> Result<Option<Duration>>;

	/// Returns `false` if the key does not exist.
	async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;
}
