// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{FlagsError, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rollout {
	/// 0..=100; 100 means every stable id passes the percentage step.
	pub percentage: u8,
	#[serde(default)]
	pub user_groups: Vec<String>,
	#[serde(default)]
	pub regions: Vec<String>,
	#[serde(default)]
	pub start_date: Option<DateTime<Utc>>,
	#[serde(default)]
	pub end_date: Option<DateTime<Utc>>,
}

impl Rollout {
	pub fn full() -> Self {
		Self {
			percentage: 100,
			..Default::default()
		}
	}
}

/// One arm of an A/B test. Weights are relative; evaluation normalizes
/// them so they need not sum to 100.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variant {
	pub id: String,
	pub name: String,
	pub weight: u8,
	#[serde(default)]
	pub configuration: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlag {
	pub id: Uuid,
	pub key: String,
	pub name: String,
	pub description: Option<String>,
	pub enabled: bool,
	/// When set, the flag only evaluates in this environment.
	pub environment: Option<String>,
	pub rollout: Rollout,
	#[serde(default)]
	pub variants: Vec<Variant>,
	#[serde(default)]
	pub dependencies: Vec<String>,
	#[serde(default)]
	pub tags: Vec<String>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
	pub created_by: Option<String>,
	pub updated_by: Option<String>,
}

impl FeatureFlag {
	/// Validates the flag key format.
	///
	/// - Starts with a lowercase letter
	/// - Lowercase alphanumeric plus `_`, `.` and `-`
	/// - 2-100 characters
	pub fn validate_key(key: &str) -> bool {
		if key.len() < 2 || key.len() > 100 {
			return false;
		}

		let mut chars = key.chars();

		match chars.next() {
			Some(c) if c.is_ascii_lowercase() => {}
			_ => return false,
		}

		chars.all(|c| {
			c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '.' || c == '-'
		})
	}

	pub fn from_input(input: FlagInput, created_by: Option<String>) -> Result<Self> {
		let now = Utc::now();
		let flag = Self {
			id: Uuid::new_v4(),
			key: input.key,
			name: input.name,
			description: input.description,
			enabled: input.enabled,
			environment: input.environment,
			rollout: input.rollout,
			variants: input.variants,
			dependencies: input.dependencies,
			tags: input.tags,
			created_at: now,
			updated_at: now,
			updated_by: created_by.clone(),
			created_by,
		};
		flag.validate()?;
		Ok(flag)
	}

	/// Apply a partial update. The key and id never change.
	pub fn apply(&mut self, update: FlagUpdate, updated_by: Option<String>) -> Result<()> {
		if let Some(name) = update.name {
			self.name = name;
		}
		if let Some(description) = update.description {
			self.description = Some(description);
		}
		if let Some(enabled) = update.enabled {
			self.enabled = enabled;
		}
		if let Some(environment) = update.environment {
			self.environment = environment;
		}
		if let Some(rollout) = update.rollout {
			self.rollout = rollout;
		}
		if let Some(variants) = update.variants {
			self.variants = variants;
		}
		if let Some(dependencies) = update.dependencies {
			self.dependencies = dependencies;
		}
		if let Some(tags) = update.tags {
			self.tags = tags;
		}
		self.updated_at = Utc::now();
		self.updated_by = updated_by;
		self.validate()
	}

	pub fn validate(&self) -> Result<()> {
		if !Self::validate_key(&self.key) {
			return Err(FlagsError::InvalidKey(self.key.clone()));
		}
		if self.name.trim().is_empty() {
			return Err(FlagsError::EmptyName);
		}
		if self.rollout.percentage > 100 {
			return Err(FlagsError::InvalidPercentage(self.rollout.percentage));
		}
		if let (Some(start), Some(end)) = (self.rollout.start_date, self.rollout.end_date) {
			if start > end {
				return Err(FlagsError::InvalidSchedule);
			}
		}

		let mut seen = HashSet::new();
		for variant in &self.variants {
			if variant.weight > 100 {
				return Err(FlagsError::InvalidWeight {
					id: variant.id.clone(),
					weight: variant.weight,
				});
			}
			if !seen.insert(variant.id.as_str()) {
				return Err(FlagsError::DuplicateVariant(variant.id.clone()));
			}
		}
		Ok(())
	}
}

/// Everything needed to create a flag.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagInput {
	pub key: String,
	pub name: String,
	#[serde(default)]
	pub description: Option<String>,
	#[serde(default)]
	pub enabled: bool,
	#[serde(default)]
	pub environment: Option<String>,
	#[serde(default = "Rollout::full")]
	pub rollout: Rollout,
	#[serde(default)]
	pub variants: Vec<Variant>,
	#[serde(default)]
	pub dependencies: Vec<String>,
	#[serde(default)]
	pub tags: Vec<String>,
}

/// Partial update; absent fields are left unchanged. `environment` uses a
/// nested option so it can be cleared with an explicit `null`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagUpdate {
	pub name: Option<String>,
	pub description: Option<String>,
	pub enabled: Option<bool>,
	#[serde(default, deserialize_with = "double_option")]
	pub environment: Option<Option<String>>,
	pub rollout: Option<Rollout>,
	pub variants: Option<Vec<Variant>>,
	pub dependencies: Option<Vec<String>>,
	pub tags: Option<Vec<String>>,
}

fn double_option<'de, D>(deserializer: D) -> std::result::Result<Option<Option<String>>, D::Error>
where
	D: serde::Deserializer<'de>,
{
	Option::<String>::deserialize(deserializer).map(Some)
}
