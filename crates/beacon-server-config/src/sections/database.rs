// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! SQLite storage settings.

use serde::Deserialize;

use crate::error::ConfigError;

const DEFAULT_URL: &str = "sqlite:./beacon.db";
const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_BUSY_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
	pub url: String,
	/// Upper bound on pooled connections.
	pub max_connections: u32,
	/// How long a writer waits on a locked database before failing.
	pub busy_timeout_secs: u64,
}

impl DatabaseConfig {
	pub fn is_in_memory(&self) -> bool {
		self.url.contains(":memory:") || self.url.contains("mode=memory")
	}
}

impl Default for DatabaseConfig {
	fn default() -> Self {
		Self {
			url: DEFAULT_URL.to_string(),
			max_connections: DEFAULT_MAX_CONNECTIONS,
			busy_timeout_secs: DEFAULT_BUSY_TIMEOUT_SECS,
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseConfigLayer {
	#[serde(default)]
	pub url: Option<String>,
	#[serde(default)]
	pub max_connections: Option<u32>,
	#[serde(default)]
	pub busy_timeout_secs: Option<u64>,
}

impl DatabaseConfigLayer {
	pub fn merge(&mut self, other: DatabaseConfigLayer) {
		if other.url.is_some() {
			self.url = other.url;
		}
		if other.max_connections.is_some() {
			self.max_connections = other.max_connections;
		}
		if other.busy_timeout_secs.is_some() {
			self.busy_timeout_secs = other.busy_timeout_secs;
		}
	}

	/// Resolve defaults and reject settings the pool cannot open with.
	pub fn finalize(self) -> Result<DatabaseConfig, ConfigError> {
		let url = self.url.unwrap_or_else(|| DEFAULT_URL.to_string());
		if !url.starts_with("sqlite:") {
			return Err(ConfigError::InvalidValue {
				key: "database.url".to_string(),
				message: format!("'{url}' is not a sqlite: URL"),
			});
		}

		let max_connections = self.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS);
		if max_connections == 0 {
			return Err(ConfigError::InvalidValue {
				key: "database.max_connections".to_string(),
				message: "must be at least 1".to_string(),
			});
		}

		Ok(DatabaseConfig {
			url,
			max_connections,
			busy_timeout_secs: self.busy_timeout_secs.unwrap_or(DEFAULT_BUSY_TIMEOUT_SECS),
		})
	}
}
