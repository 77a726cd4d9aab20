// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

#[derive(Debug, thiserror::Error)]
pub enum BusError {
	#[error("invalid subscription pattern: {0}")]
	InvalidPattern(String),

	#[error("bus transport error: {0}")]
	Transport(String),

	#[error("bus serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BusError>;
