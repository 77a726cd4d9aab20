// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Connection hub timing configuration.

use serde::Deserialize;

const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30;
const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 300;
const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub struct HubConfig {
	pub heartbeat_interval_secs: u64,
	pub connection_timeout_secs: u64,
	pub outbound_queue_capacity: usize,
}

impl HubConfig {
	/// The cleanup sweep runs at half the connection timeout.
	pub fn cleanup_interval_secs(&self) -> u64 {
		(self.connection_timeout_secs / 2).max(1)
	}
}

impl Default for HubConfig {
	fn default() -> Self {
		Self {
			heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
			connection_timeout_secs: DEFAULT_CONNECTION_TIMEOUT_SECS,
			outbound_queue_capacity: DEFAULT_OUTBOUND_QUEUE_CAPACITY,
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HubConfigLayer {
	#[serde(default)]
	pub heartbeat_interval_secs: Option<u64>,
	#[serde(default)]
	pub connection_timeout_secs: Option<u64>,
	#[serde(default)]
	pub outbound_queue_capacity: Option<usize>,
}

impl HubConfigLayer {
	pub fn merge(&mut self, other: HubConfigLayer) {
		if other.heartbeat_interval_secs.is_some() {
			self.heartbeat_interval_secs = other.heartbeat_interval_secs;
		}
		if other.connection_timeout_secs.is_some() {
			self.connection_timeout_secs = other.connection_timeout_secs;
		}
		if other.outbound_queue_capacity.is_some() {
			self.outbound_queue_capacity = other.outbound_queue_capacity;
		}
	}

	pub fn finalize(self) -> HubConfig {
		HubConfig {
			heartbeat_interval_secs: self
				.heartbeat_interval_secs
				.unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_SECS),
			connection_timeout_secs: self
				.connection_timeout_secs
				.unwrap_or(DEFAULT_CONNECTION_TIMEOUT_SECS),
			outbound_queue_capacity: self
				.outbound_queue_capacity
				.unwrap_or(DEFAULT_OUTBOUND_QUEUE_CAPACITY),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_cleanup_interval_is_half_timeout() {
		let config = HubConfig::default();
		assert_eq!(config.heartbeat_interval_secs, 30);
		assert_eq!(config.cleanup_interval_secs(), 150);
	}
}
