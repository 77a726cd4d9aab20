// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Cache configuration section.

use serde::Deserialize;

const DEFAULT_TTL_SECS: u64 = 300;
const DEFAULT_TAG_TTL_SLACK_SECS: u64 = 60;
const DEFAULT_MAX_ENTRIES: usize = 50_000;

#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
	pub enabled: bool,
	pub default_ttl_secs: u64,
	/// Extra lifetime given to tag indexes beyond their longest member.
	pub tag_ttl_slack_secs: u64,
	pub max_entries: usize,
}

impl Default for CacheConfig {
	fn default() -> Self {
		Self {
			enabled: true,
			default_ttl_secs: DEFAULT_TTL_SECS,
			tag_ttl_slack_secs: DEFAULT_TAG_TTL_SLACK_SECS,
			max_entries: DEFAULT_MAX_ENTRIES,
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheConfigLayer {
	#[serde(default)]
	pub enabled: Option<bool>,
	#[serde(default)]
	pub default_ttl_secs: Option<u64>,
	#[serde(default)]
	pub tag_ttl_slack_secs: Option<u64>,
	#[serde(default)]
	pub max_entries: Option<usize>,
}

impl CacheConfigLayer {
	pub fn merge(&mut self, other: CacheConfigLayer) {
		if other.enabled.is_some() {
			self.enabled = other.enabled;
		}
		if other.default_ttl_secs.is_some() {
			self.default_ttl_secs = other.default_ttl_secs;
		}
		if other.tag_ttl_slack_secs.is_some() {
			self.tag_ttl_slack_secs = other.tag_ttl_slack_secs;
		}
		if other.max_entries.is_some() {
			self.max_entries = other.max_entries;
		}
	}

	pub fn finalize(self) -> CacheConfig {
		CacheConfig {
			enabled: self.enabled.unwrap_or(true),
			default_ttl_secs: self.default_ttl_secs.unwrap_or(DEFAULT_TTL_SECS),
			tag_ttl_slack_secs: self.tag_ttl_slack_secs.unwrap_or(DEFAULT_TAG_TTL_SLACK_SECS),
			max_entries: self.max_entries.unwrap_or(DEFAULT_MAX_ENTRIES),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_defaults() {
		let config = CacheConfigLayer::default().finalize();
		assert!(config.enabled);
		assert_eq!(config.default_ttl_secs, 300);
		assert_eq!(config.tag_ttl_slack_secs, 60);
	}

	#[test]
	fn test_merge_overwrites() {
		let mut base = CacheConfigLayer {
			default_ttl_secs: Some(10),
			..Default::default()
		};
		base.merge(CacheConfigLayer {
			enabled: Some(false),
			..Default::default()
		});
		let config = base.finalize();
		assert!(!config.enabled);
		assert_eq!(config.default_ttl_secs, 10);
	}
}
