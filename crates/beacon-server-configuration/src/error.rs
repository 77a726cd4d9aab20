// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use beacon_bus::BusError;
use beacon_server_db::DbError;

#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
	#[error("Database error: {0}")]
	Database(#[from] DbError),

	#[error("Invalid {field} '{value}': expected 1-100 of [A-Za-z0-9_.-], starting with a letter or digit")]
	InvalidName { field: &'static str, value: String },

	#[error("Not found: {0}")]
	NotFound(String),

	#[error("Version conflict: expected active version {expected}, found {actual}")]
	VersionConflict { expected: i64, actual: i64 },

	#[error("Change bus error: {0}")]
	Bus(#[from] BusError),

	#[error("Serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
}

impl From<sqlx::Error> for ConfigurationError {
	fn from(e: sqlx::Error) -> Self {
		ConfigurationError::Database(DbError::Sqlx(e))
	}
}

pub type Result<T> = std::result::Result<T, ConfigurationError>;
