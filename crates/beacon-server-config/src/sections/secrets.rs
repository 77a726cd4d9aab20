// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Secret vault configuration.

use beacon_common_config::SecretString;
use serde::Deserialize;

const DEFAULT_KEY_VERSION: u32 = 1;
const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 3600;

/// A master key that has been rotated away from but may still protect
/// secrets that were not yet re-encrypted.
#[derive(Debug, Clone, Deserialize)]
pub struct RetiredKeyConfig {
	pub version: u32,
	pub master_key: SecretString,
}

#[derive(Debug, Clone)]
pub struct SecretsConfig {
	pub enabled: bool,
	pub master_key: Option<SecretString>,
	pub key_version: u32,
	pub retired_keys: Vec<RetiredKeyConfig>,
	pub cleanup_interval_secs: u64,
}

impl Default for SecretsConfig {
	fn default() -> Self {
		Self {
			enabled: true,
			master_key: None,
			key_version: DEFAULT_KEY_VERSION,
			retired_keys: Vec::new(),
			cleanup_interval_secs: DEFAULT_CLEANUP_INTERVAL_SECS,
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecretsConfigLayer {
	#[serde(default)]
	pub enabled: Option<bool>,
	#[serde(default)]
	pub key_version: Option<u32>,
	#[serde(default)]
	pub retired_keys: Option<Vec<RetiredKeyConfig>>,
	#[serde(default)]
	pub cleanup_interval_secs: Option<u64>,
}

impl SecretsConfigLayer {
	pub fn merge(&mut self, other: SecretsConfigLayer) {
		if other.enabled.is_some() {
			self.enabled = other.enabled;
		}
		if other.key_version.is_some() {
			self.key_version = other.key_version;
		}
		if other.retired_keys.is_some() {
			self.retired_keys = other.retired_keys;
		}
		if other.cleanup_interval_secs.is_some() {
			self.cleanup_interval_secs = other.cleanup_interval_secs;
		}
	}

	/// The master key never comes from a config file; it is passed in from
	/// the environment by the caller.
	pub fn finalize(self, master_key: Option<SecretString>) -> SecretsConfig {
		SecretsConfig {
			enabled: self.enabled.unwrap_or(true),
			master_key,
			key_version: self.key_version.unwrap_or(DEFAULT_KEY_VERSION),
			retired_keys: self.retired_keys.unwrap_or_default(),
			cleanup_interval_secs: self
				.cleanup_interval_secs
				.unwrap_or(DEFAULT_CLEANUP_INTERVAL_SECS),
		}
	}
}
