// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Change events carried on the bus.
//!
//! - `CONFIGURATION_CHANGED` - a configuration write produced a new version
//! - `CONFIGURATION_RELOAD` - clients should re-read, nothing was written
//! - `FEATURE_FLAG_CHANGED` - a flag was created, updated or deleted

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ChangeEvent {
	#[serde(rename = "CONFIGURATION_CHANGED")]
	ConfigurationChanged(ConfigurationChangedData),

	#[serde(rename = "CONFIGURATION_RELOAD")]
	ConfigurationReload(ConfigurationReloadData),

	#[serde(rename = "FEATURE_FLAG_CHANGED")]
	FeatureFlagChanged(FeatureFlagChangedData),
}

impl ChangeEvent {
	pub fn event_type(&self) -> &'static str {
		match self {
			ChangeEvent::ConfigurationChanged(_) => "CONFIGURATION_CHANGED",
			ChangeEvent::ConfigurationReload(_) => "CONFIGURATION_RELOAD",
			ChangeEvent::FeatureFlagChanged(_) => "FEATURE_FLAG_CHANGED",
		}
	}

	/// The service this event is scoped to, `None` for global events.
	pub fn service_name(&self) -> Option<&str> {
		match self {
			ChangeEvent::ConfigurationChanged(d) => Some(&d.service_name),
			ChangeEvent::ConfigurationReload(d) => Some(&d.service_name),
			ChangeEvent::FeatureFlagChanged(d) => d.service_name.as_deref(),
		}
	}

	pub fn environment(&self) -> Option<&str> {
		match self {
			ChangeEvent::ConfigurationChanged(d) => Some(&d.environment),
			ChangeEvent::ConfigurationReload(d) => Some(&d.environment),
			ChangeEvent::FeatureFlagChanged(d) => d.environment.as_deref(),
		}
	}

	pub fn configuration_changed(
		service_name: impl Into<String>,
		environment: impl Into<String>,
		version: i64,
		config: serde_json::Value,
		is_valid: bool,
		changed_by: Option<String>,
	) -> Self {
		ChangeEvent::ConfigurationChanged(ConfigurationChangedData {
			service_name: service_name.into(),
			environment: environment.into(),
			version,
			config,
			is_valid,
			changed_by,
			timestamp: Utc::now(),
		})
	}

	pub fn configuration_reload(
		service_name: impl Into<String>,
		environment: impl Into<String>,
		force: bool,
	) -> Self {
		ChangeEvent::ConfigurationReload(ConfigurationReloadData {
			service_name: service_name.into(),
			environment: environment.into(),
			force,
			timestamp: Utc::now(),
		})
	}

	pub fn feature_flag_changed(
		flag_key: impl Into<String>,
		enabled: bool,
		rollout_percentage: Option<u8>,
		environment: Option<String>,
	) -> Self {
		ChangeEvent::FeatureFlagChanged(FeatureFlagChangedData {
			flag_key: flag_key.into(),
			enabled,
			rollout_percentage,
			service_name: None,
			environment,
			timestamp: Utc::now(),
		})
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationChangedData {
	pub service_name: String,
	pub environment: String,
	pub version: i64,
	pub config: serde_json::Value,
	pub is_valid: bool,
	pub changed_by: Option<String>,
	pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationReloadData {
	pub service_name: String,
	pub environment: String,
	pub force: bool,
	pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlagChangedData {
	pub flag_key: String,
	pub enabled: bool,
	pub rollout_percentage: Option<u8>,
	/// Set when the change only concerns one service; flags are global today.
	pub service_name: Option<String>,
	pub environment: Option<String>,
	pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn test_serializes_with_type_tag() {
		let event = ChangeEvent::configuration_changed(
			"svc-a",
			"prod",
			3,
			json!({"a": 1}),
			true,
			Some("alice".to_string()),
		);
		let value = serde_json::to_value(&event).unwrap();
		assert_eq!(value["type"], "CONFIGURATION_CHANGED");
		assert_eq!(value["serviceName"], "svc-a");
		assert_eq!(value["version"], 3);
		assert_eq!(value["isValid"], true);

		let back: ChangeEvent = serde_json::from_value(value).unwrap();
		assert_eq!(back, event);
	}

	#[test]
	fn test_scope_accessors() {
		let reload = ChangeEvent::configuration_reload("svc-a", "dev", true);
		assert_eq!(reload.service_name(), Some("svc-a"));
		assert_eq!(reload.environment(), Some("dev"));
		assert_eq!(reload.event_type(), "CONFIGURATION_RELOAD");

		let flag = ChangeEvent::feature_flag_changed("checkout.v2", true, Some(50), None);
		assert_eq!(flag.service_name(), None);
		assert_eq!(flag.event_type(), "FEATURE_FLAG_CHANGED");
	}
}
