// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

use beacon_common_secret::{SecretString, REDACTED};

use crate::encryption::EncryptedValue;

/// A decrypted secret value. Zeroized on drop and redacted in `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue(Zeroizing<String>);

impl SecretValue {
	pub fn new(value: Zeroizing<String>) -> Self {
		Self(value)
	}

	pub fn expose(&self) -> &str {
		self.0.as_str()
	}
}

impl fmt::Debug for SecretValue {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "SecretValue({REDACTED})")
	}
}

/// Serializes the plaintext; only used when a caller explicitly asked for
/// the value.
impl Serialize for SecretValue {
	fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(self.expose())
	}
}

/// A secret row as persisted. Holds ciphertext only.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSecret {
	pub id: Uuid,
	pub configuration_id: String,
	pub key: String,
	pub encrypted: EncryptedValue,
	pub key_version: u32,
	pub description: Option<String>,
	pub expires_at: Option<DateTime<Utc>>,
	pub access_count: i64,
	pub last_accessed_at: Option<DateTime<Utc>>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl StoredSecret {
	pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
		self.expires_at.is_some_and(|at| at <= now)
	}

	pub fn metadata(&self) -> SecretMetadata {
		SecretMetadata {
			id: self.id,
			configuration_id: self.configuration_id.clone(),
			key: self.key.clone(),
			key_version: self.key_version,
			description: self.description.clone(),
			expires_at: self.expires_at,
			access_count: self.access_count,
			last_accessed_at: self.last_accessed_at,
			created_at: self.created_at,
			updated_at: self.updated_at,
		}
	}
}

/// What callers see when listing secrets.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretMetadata {
	pub id: Uuid,
	pub configuration_id: String,
	pub key: String,
	pub key_version: u32,
	pub description: Option<String>,
	pub expires_at: Option<DateTime<Utc>>,
	pub access_count: i64,
	pub last_accessed_at: Option<DateTime<Utc>>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

/// Input for storing one secret.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSecret {
	pub key: String,
	pub value: SecretString,
	#[serde(default)]
	pub description: Option<String>,
	#[serde(default)]
	pub expires_at: Option<DateTime<Utc>>,
}

impl NewSecret {
	pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
		Self {
			key: key.into(),
			value: SecretString::new(value.into()),
			description: None,
			expires_at: None,
		}
	}

	pub fn with_description(mut self, description: impl Into<String>) -> Self {
		self.description = Some(description.into());
		self
	}

	pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
		self.expires_at = Some(expires_at);
		self
	}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RotationFailure {
	pub secret_id: Uuid,
	pub configuration_id: String,
	pub key: String,
	pub error: String,
}

/// Outcome of one key rotation batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RotationReport {
	pub from_version: u32,
	pub to_version: u32,
	pub total: usize,
	pub rotated: usize,
	pub failed: usize,
	/// Rows changed or deleted by someone else mid-rotation.
	pub skipped: usize,
	pub failures: Vec<RotationFailure>,
	pub started_at: DateTime<Utc>,
	pub completed_at: DateTime<Utc>,
}

impl RotationReport {
	pub fn is_complete(&self) -> bool {
		self.failed == 0
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::Duration;
	use serde_json::json;

	#[test]
	fn test_secret_value_debug_is_redacted() {
		let value = SecretValue::new(Zeroizing::new("abc123".to_string()));
		let debug = format!("{value:?}");
		assert!(!debug.contains("abc123"));
		assert_eq!(value.expose(), "abc123");
		assert_eq!(serde_json::to_value(&value).unwrap(), json!("abc123"));
	}

	#[test]
	fn test_new_secret_from_json() {
		let input: NewSecret =
			serde_json::from_value(json!({"key": "API_KEY", "value": "abc123"})).unwrap();
		assert_eq!(input.key, "API_KEY");
		assert_eq!(input.value.expose(), "abc123");
		assert!(!format!("{input:?}").contains("abc123"));
	}

	#[test]
	fn test_expiry() {
		let now = Utc::now();
		let mut secret = StoredSecret {
			id: Uuid::new_v4(),
			configuration_id: "cfg".to_string(),
			key: "K".to_string(),
			encrypted: EncryptedValue {
				ciphertext: String::new(),
				iv: String::new(),
				auth_tag: String::new(),
			},
			key_version: 1,
			description: None,
			expires_at: None,
			access_count: 0,
			last_accessed_at: None,
			created_at: now,
			updated_at: now,
		};
		assert!(!secret.is_expired(now));
		secret.expires_at = Some(now - Duration::seconds(1));
		assert!(secret.is_expired(now));
		secret.expires_at = Some(now + Duration::seconds(1));
		assert!(!secret.is_expired(now));
	}
}
