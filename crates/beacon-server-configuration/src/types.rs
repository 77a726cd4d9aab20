// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use beacon_server_audit::AuditLogEntry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ConfigurationError, Result};

/// One stored version of a service's configuration in one environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
	pub id: Uuid,
	pub service_name: String,
	pub environment: String,
	pub version: i64,
	pub config: serde_json::Value,
	pub description: Option<String>,
	pub tags: Vec<String>,
	pub is_active: bool,
	pub is_valid: bool,
	pub validation_errors: Option<Vec<String>>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
	pub created_by: Option<String>,
	pub updated_by: Option<String>,
}

/// A configuration payload. Only validated against a schema, never
/// inspected field by field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigBlob(serde_json::Value);

impl ConfigBlob {
	pub fn new(value: serde_json::Value) -> Self {
		Self(value)
	}

	pub fn as_value(&self) -> &serde_json::Value {
		&self.0
	}

	pub fn into_value(self) -> serde_json::Value {
		self.0
	}
}

impl From<serde_json::Value> for ConfigBlob {
	fn from(value: serde_json::Value) -> Self {
		Self(value)
	}
}

fn default_validate() -> bool {
	true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOptions {
	#[serde(default)]
	pub description: Option<String>,
	#[serde(default)]
	pub tags: Vec<String>,
	#[serde(default)]
	pub updated_by: Option<String>,
	#[serde(default = "default_validate")]
	pub validate: bool,
	/// Reject the write unless this is the current active version (0 when
	/// nothing has been written yet).
	#[serde(default)]
	pub expected_version: Option<i64>,
}

impl Default for UpdateOptions {
	fn default() -> Self {
		Self {
			description: None,
			tags: Vec::new(),
			updated_by: None,
			validate: true,
			expected_version: None,
		}
	}
}

impl UpdateOptions {
	pub fn updated_by(mut self, updated_by: impl Into<String>) -> Self {
		self.updated_by = Some(updated_by.into());
		self
	}

	pub fn expected_version(mut self, version: i64) -> Self {
		self.expected_version = Some(version);
		self
	}

	pub fn without_validation(mut self) -> Self {
		self.validate = false;
		self
	}
}

/// Everything the write path needs to insert a version.
#[derive(Debug, Clone)]
pub struct ConfigurationDraft {
	pub service_name: String,
	pub environment: String,
	pub config: serde_json::Value,
	pub description: Option<String>,
	pub tags: Vec<String>,
	pub is_valid: bool,
	pub validation_errors: Option<Vec<String>>,
	pub updated_by: Option<String>,
}

/// Service metadata used to build its configuration schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRegistration {
	pub name: String,
	pub description: Option<String>,
	pub required_keys: Vec<String>,
	pub optional_keys: Vec<String>,
	pub endpoints: Vec<String>,
	pub strict: bool,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInput {
	pub name: String,
	#[serde(default)]
	pub description: Option<String>,
	#[serde(default)]
	pub required_keys: Vec<String>,
	#[serde(default)]
	pub optional_keys: Vec<String>,
	#[serde(default)]
	pub endpoints: Vec<String>,
	/// Reject keys outside required and optional.
	#[serde(default)]
	pub strict: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
	pub configuration: Configuration,
	pub audit: Option<AuditLogEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
	pub entries: Vec<HistoryEntry>,
	pub total: i64,
	pub limit: i64,
	pub offset: i64,
}

const MAX_NAME_LEN: usize = 100;

/// Service and environment names end up in cache keys and bus channels,
/// so `:` and whitespace are excluded.
pub fn validate_name(field: &'static str, value: &str) -> Result<()> {
	let valid = !value.is_empty()
		&& value.len() <= MAX_NAME_LEN
		&& value.starts_with(|c: char| c.is_ascii_alphanumeric())
		&& value
			.chars()
			.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-');
	if valid {
		Ok(())
	} else {
		Err(ConfigurationError::InvalidName {
			field,
			value: value.to_string(),
		})
	}
}
