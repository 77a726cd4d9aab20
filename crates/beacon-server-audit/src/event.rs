// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core audit record types.
//!
//! - [`AuditResourceType`]: what kind of thing was changed
//! - [`AuditAction`]: what happened to it
//! - [`AuditLogEntry`]: the persisted record
//! - [`AuditLogBuilder`]: fluent API for constructing entries

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::diff::compute_diff;
use crate::error::AuditError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditResourceType {
	Configuration,
	Service,
	FeatureFlag,
	Secret,
	EncryptionKey,
}

impl AuditResourceType {
	pub fn as_str(&self) -> &'static str {
		match self {
			AuditResourceType::Configuration => "configuration",
			AuditResourceType::Service => "service",
			AuditResourceType::FeatureFlag => "feature_flag",
			AuditResourceType::Secret => "secret",
			AuditResourceType::EncryptionKey => "encryption_key",
		}
	}
}

impl fmt::Display for AuditResourceType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for AuditResourceType {
	type Err = AuditError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"configuration" => Ok(AuditResourceType::Configuration),
			"service" => Ok(AuditResourceType::Service),
			"feature_flag" => Ok(AuditResourceType::FeatureFlag),
			"secret" => Ok(AuditResourceType::Secret),
			"encryption_key" => Ok(AuditResourceType::EncryptionKey),
			other => Err(AuditError::UnknownResourceType(other.to_string())),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
	Create,
	Update,
	Delete,
	Rotate,
}

impl AuditAction {
	pub fn as_str(&self) -> &'static str {
		match self {
			AuditAction::Create => "create",
			AuditAction::Update => "update",
			AuditAction::Delete => "delete",
			AuditAction::Rotate => "rotate",
		}
	}
}

impl fmt::Display for AuditAction {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for AuditAction {
	type Err = AuditError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"create" => Ok(AuditAction::Create),
			"update" => Ok(AuditAction::Update),
			"delete" => Ok(AuditAction::Delete),
			"rotate" => Ok(AuditAction::Rotate),
			other => Err(AuditError::UnknownAction(other.to_string())),
		}
	}
}

/// One append-only record of a mutation. Entries are never updated or
/// deleted once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
	pub id: Uuid,
	pub resource_type: AuditResourceType,
	/// Row id of the affected resource (configuration id, flag key, ...).
	pub resource_id: String,
	pub action: AuditAction,
	pub previous_value: Option<serde_json::Value>,
	pub new_value: Option<serde_json::Value>,
	pub diff: Option<serde_json::Value>,
	pub environment: Option<String>,
	pub timestamp: DateTime<Utc>,
	pub performed_by: Option<String>,
}

impl AuditLogEntry {
	pub fn builder(
		resource_type: AuditResourceType,
		resource_id: impl Into<String>,
		action: AuditAction,
	) -> AuditLogBuilder {
		AuditLogBuilder::new(resource_type, resource_id, action)
	}
}

#[derive(Debug, Clone)]
pub struct AuditLogBuilder {
	resource_type: AuditResourceType,
	resource_id: String,
	action: AuditAction,
	previous_value: Option<serde_json::Value>,
	new_value: Option<serde_json::Value>,
	environment: Option<String>,
	performed_by: Option<String>,
}

impl AuditLogBuilder {
	pub fn new(
		resource_type: AuditResourceType,
		resource_id: impl Into<String>,
		action: AuditAction,
	) -> Self {
		Self {
			resource_type,
			resource_id: resource_id.into(),
			action,
			previous_value: None,
			new_value: None,
			environment: None,
			performed_by: None,
		}
	}

	pub fn previous_value(mut self, value: serde_json::Value) -> Self {
		self.previous_value = Some(value);
		self
	}

	pub fn new_value(mut self, value: serde_json::Value) -> Self {
		self.new_value = Some(value);
		self
	}

	pub fn environment(mut self, environment: impl Into<String>) -> Self {
		self.environment = Some(environment.into());
		self
	}

	pub fn performed_by(mut self, performed_by: Option<String>) -> Self {
		self.performed_by = performed_by;
		self
	}

	/// Build the entry. The diff is derived from the previous and new values
	/// whenever at least one of them is present.
	pub fn build(self) -> AuditLogEntry {
		let diff = match (&self.previous_value, &self.new_value) {
			(None, None) => None,
			(previous, new) => Some(compute_diff(
				previous.as_ref().unwrap_or(&serde_json::Value::Null),
				new.as_ref().unwrap_or(&serde_json::Value::Null),
			)),
		};

		AuditLogEntry {
			id: Uuid::new_v4(),
			resource_type: self.resource_type,
			resource_id: self.resource_id,
			action: self.action,
			previous_value: self.previous_value,
			new_value: self.new_value,
			diff,
			environment: self.environment,
			timestamp: Utc::now(),
			performed_by: self.performed_by,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn test_action_round_trips_through_str() {
		for action in [
			AuditAction::Create,
			AuditAction::Update,
			AuditAction::Delete,
			AuditAction::Rotate,
		] {
			assert_eq!(action.as_str().parse::<AuditAction>().unwrap(), action);
		}
		assert!("explode".parse::<AuditAction>().is_err());
	}

	#[test]
	fn test_resource_type_display() {
		assert_eq!(AuditResourceType::FeatureFlag.to_string(), "feature_flag");
		assert_eq!(
			"encryption_key".parse::<AuditResourceType>().unwrap(),
			AuditResourceType::EncryptionKey
		);
	}

	#[test]
	fn test_builder_computes_diff() {
		let entry = AuditLogEntry::builder(AuditResourceType::Configuration, "cfg-1", AuditAction::Update)
			.previous_value(json!({"a": 1}))
			.new_value(json!({"a": 2}))
			.environment("prod")
			.performed_by(Some("alice".to_string()))
			.build();

		assert_eq!(entry.environment.as_deref(), Some("prod"));
		assert_eq!(entry.performed_by.as_deref(), Some("alice"));
		let diff = entry.diff.unwrap();
		assert_eq!(diff["changed"]["a"]["from"], json!(1));
		assert_eq!(diff["changed"]["a"]["to"], json!(2));
	}

	#[test]
	fn test_builder_without_values_has_no_diff() {
		let entry =
			AuditLogEntry::builder(AuditResourceType::Secret, "s-1", AuditAction::Delete).build();
		assert!(entry.diff.is_none());
	}

	#[test]
	fn test_serializes_camel_case() {
		let entry =
			AuditLogEntry::builder(AuditResourceType::Secret, "s-1", AuditAction::Delete).build();
		let value = serde_json::to_value(&entry).unwrap();
		assert_eq!(value["resourceType"], "secret");
		assert_eq!(value["action"], "delete");
		assert!(value.get("performedBy").is_some());
	}
}
