// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlagsError {
	#[error("invalid flag key '{0}': expected [a-z][a-z0-9_.-]{{1,99}}")]
	InvalidKey(String),

	#[error("rollout percentage {0} is outside 0..=100")]
	InvalidPercentage(u8),

	#[error("variant '{id}' weight {weight} is outside 0..=100")]
	InvalidWeight { id: String, weight: u8 },

	#[error("duplicate variant id '{0}'")]
	DuplicateVariant(String),

	#[error("rollout start date is after its end date")]
	InvalidSchedule,

	#[error("flag name must not be empty")]
	EmptyName,
}

pub type Result<T> = std::result::Result<T, FlagsError>;
