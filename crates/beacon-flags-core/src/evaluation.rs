// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::{Deserialize, Serialize};

const DEFAULT_ENVIRONMENT: &str = "production";
const ANONYMOUS: &str = "anonymous";

fn default_environment() -> String {
	DEFAULT_ENVIRONMENT.to_string()
}

/// Per-request targeting input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationContext {
	#[serde(default)]
	pub user_id: Option<String>,
	#[serde(default)]
	pub user_group: Option<String>,
	#[serde(default)]
	pub region: Option<String>,
	#[serde(default = "default_environment")]
	pub environment: String,
	#[serde(default)]
	pub client_ip: Option<String>,
}

impl Default for EvaluationContext {
	fn default() -> Self {
		Self::new(DEFAULT_ENVIRONMENT)
	}
}

impl EvaluationContext {
	pub fn new(environment: impl Into<String>) -> Self {
		Self {
			user_id: None,
			user_group: None,
			region: None,
			environment: environment.into(),
			client_ip: None,
		}
	}

	pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
		self.user_id = Some(user_id.into());
		self
	}

	pub fn with_user_group(mut self, user_group: impl Into<String>) -> Self {
		self.user_group = Some(user_group.into());
		self
	}

	pub fn with_region(mut self, region: impl Into<String>) -> Self {
		self.region = Some(region.into());
		self
	}

	pub fn with_client_ip(mut self, client_ip: impl Into<String>) -> Self {
		self.client_ip = Some(client_ip.into());
		self
	}

	/// The identifier hashed for bucketing: user id, else client IP, else
	/// `"anonymous"`.
	pub fn stable_id(&self) -> &str {
		self.user_id
			.as_deref()
			.or(self.client_ip.as_deref())
			.unwrap_or(ANONYMOUS)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvaluationReason {
	FlagNotFound,
	FlagDisabled,
	EnvironmentMismatch,
	RolloutNotStarted,
	RolloutEnded,
	UserGroupNotTargeted,
	RegionNotTargeted,
	PercentageRollout,
	AbTestVariant,
	Enabled,
}

impl EvaluationReason {
	pub fn as_str(&self) -> &'static str {
		match self {
			EvaluationReason::FlagNotFound => "FLAG_NOT_FOUND",
			EvaluationReason::FlagDisabled => "FLAG_DISABLED",
			EvaluationReason::EnvironmentMismatch => "ENVIRONMENT_MISMATCH",
			EvaluationReason::RolloutNotStarted => "ROLLOUT_NOT_STARTED",
			EvaluationReason::RolloutEnded => "ROLLOUT_ENDED",
			EvaluationReason::UserGroupNotTargeted => "USER_GROUP_NOT_TARGETED",
			EvaluationReason::RegionNotTargeted => "REGION_NOT_TARGETED",
			EvaluationReason::PercentageRollout => "PERCENTAGE_ROLLOUT",
			EvaluationReason::AbTestVariant => "AB_TEST_VARIANT",
			EvaluationReason::Enabled => "ENABLED",
		}
	}

	pub fn all() -> &'static [EvaluationReason] {
		&[
			EvaluationReason::FlagNotFound,
			EvaluationReason::FlagDisabled,
			EvaluationReason::EnvironmentMismatch,
			EvaluationReason::RolloutNotStarted,
			EvaluationReason::RolloutEnded,
			EvaluationReason::UserGroupNotTargeted,
			EvaluationReason::RegionNotTargeted,
			EvaluationReason::PercentageRollout,
			EvaluationReason::AbTestVariant,
			EvaluationReason::Enabled,
		]
	}
}

impl std::fmt::Display for EvaluationReason {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

impl std::str::FromStr for EvaluationReason {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		EvaluationReason::all()
			.iter()
			.find(|r| r.as_str() == s)
			.copied()
			.ok_or_else(|| format!("unknown evaluation reason '{s}'"))
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
	pub flag_key: String,
	pub enabled: bool,
	pub variant: Option<String>,
	pub reason: EvaluationReason,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub metadata: Option<serde_json::Value>,
}

impl EvaluationResult {
	pub fn disabled(flag_key: impl Into<String>, reason: EvaluationReason) -> Self {
		Self {
			flag_key: flag_key.into(),
			enabled: false,
			variant: None,
			reason,
			metadata: None,
		}
	}

	pub fn enabled(flag_key: impl Into<String>) -> Self {
		Self {
			flag_key: flag_key.into(),
			enabled: true,
			variant: None,
			reason: EvaluationReason::Enabled,
			metadata: None,
		}
	}

	pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
		self.metadata = Some(metadata);
		self
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn test_stable_id_fallbacks() {
		let ctx = EvaluationContext::new("prod");
		assert_eq!(ctx.stable_id(), "anonymous");

		let ctx = ctx.with_client_ip("10.0.0.1");
		assert_eq!(ctx.stable_id(), "10.0.0.1");

		let ctx = ctx.with_user_id("u-1");
		assert_eq!(ctx.stable_id(), "u-1");
	}

	#[test]
	fn test_context_environment_defaults_to_production() {
		let ctx: EvaluationContext = serde_json::from_value(json!({"userId": "u-1"})).unwrap();
		assert_eq!(ctx.environment, "production");
		assert_eq!(ctx.user_id.as_deref(), Some("u-1"));
	}

	#[test]
	fn test_reason_wire_format() {
		let value = serde_json::to_value(EvaluationReason::UserGroupNotTargeted).unwrap();
		assert_eq!(value, json!("USER_GROUP_NOT_TARGETED"));
		for reason in EvaluationReason::all() {
			assert_eq!(reason.as_str().parse::<EvaluationReason>().unwrap(), *reason);
			assert_eq!(serde_json::to_value(reason).unwrap(), json!(reason.as_str()));
		}
	}

	#[test]
	fn test_result_omits_empty_metadata() {
		let value = serde_json::to_value(EvaluationResult::enabled("x")).unwrap();
		assert!(value.get("metadata").is_none());
		assert_eq!(value["flagKey"], "x");
		assert_eq!(value["reason"], "ENABLED");
	}
}
