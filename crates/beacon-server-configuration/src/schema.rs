// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration validation.
//!
//! A registered service contributes its required and optional keys; any
//! other service gets the default schema, which only requires an object.

use std::collections::BTreeSet;

use crate::types::{ConfigBlob, ServiceRegistration};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigSchema {
	required: BTreeSet<String>,
	optional: BTreeSet<String>,
	strict: bool,
}

/// Result of validating a blob; `errors` is empty when valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOutcome {
	pub errors: Vec<String>,
}

impl ValidationOutcome {
	pub fn is_valid(&self) -> bool {
		self.errors.is_empty()
	}

	/// Errors in the stored form: `None` when valid.
	pub fn into_errors(self) -> Option<Vec<String>> {
		(!self.errors.is_empty()).then_some(self.errors)
	}
}

impl ConfigSchema {
	/// The schema applied to services without a registration.
	pub fn default_schema() -> Self {
		Self::default()
	}

	pub fn for_service(service: &ServiceRegistration) -> Self {
		Self {
			required: service.required_keys.iter().cloned().collect(),
			optional: service.optional_keys.iter().cloned().collect(),
			strict: service.strict,
		}
	}

	pub fn validate(&self, blob: &ConfigBlob) -> ValidationOutcome {
		let Some(object) = blob.as_value().as_object() else {
			return ValidationOutcome {
				errors: vec!["configuration must be a JSON object".to_string()],
			};
		};

		let mut errors: Vec<String> = self
			.required
			.iter()
			.filter(|key| !object.contains_key(key.as_str()))
			.map(|key| format!("missing required key '{key}'"))
			.collect();

		if self.strict {
			errors.extend(
				object
					.keys()
					.filter(|key| !self.required.contains(*key) && !self.optional.contains(*key))
					.map(|key| format!("unknown key '{key}'")),
			);
		}

		ValidationOutcome { errors }
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::Utc;
	use proptest::prelude::*;
	use serde_json::json;

	fn service(required: &[&str], optional: &[&str], strict: bool) -> ServiceRegistration {
		ServiceRegistration {
			name: "svc".to_string(),
			description: None,
			required_keys: required.iter().map(|s| s.to_string()).collect(),
			optional_keys: optional.iter().map(|s| s.to_string()).collect(),
			endpoints: vec![],
			strict,
			created_at: Utc::now(),
			updated_at: Utc::now(),
		}
	}

	#[test]
	fn test_default_schema_requires_object() {
		let schema = ConfigSchema::default_schema();
		assert!(schema.validate(&json!({"anything": true}).into()).is_valid());
		let outcome = schema.validate(&json!([1, 2]).into());
		assert_eq!(outcome.errors, vec!["configuration must be a JSON object"]);
	}

	#[test]
	fn test_missing_required_keys() {
		let schema = ConfigSchema::for_service(&service(&["db_url", "port"], &[], false));
		let outcome = schema.validate(&json!({"port": 80, "extra": 1}).into());
		assert_eq!(outcome.errors, vec!["missing required key 'db_url'"]);
	}

	#[test]
	fn test_strict_rejects_unknown_keys() {
		let schema = ConfigSchema::for_service(&service(&["port"], &["debug"], true));
		assert!(schema
			.validate(&json!({"port": 80, "debug": true}).into())
			.is_valid());
		let outcome = schema.validate(&json!({"port": 80, "verbose": true}).into());
		assert_eq!(outcome.into_errors(), Some(vec!["unknown key 'verbose'".to_string()]));
	}

	proptest! {
		#[test]
		fn objects_with_all_required_keys_are_valid(keys in prop::collection::btree_set("[a-z]{1,8}", 0..6)) {
			let required: Vec<&str> = keys.iter().map(String::as_str).collect();
			let schema = ConfigSchema::for_service(&service(&required, &[], true));
			let object: serde_json::Map<String, serde_json::Value> =
				keys.iter().map(|k| (k.clone(), json!(1))).collect();
			prop_assert!(schema.validate(&serde_json::Value::Object(object).into()).is_valid());
		}
	}
}
