// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use beacon_flags_core::FlagsError;
use beacon_server_db::DbError;

#[derive(Debug, thiserror::Error)]
pub enum FlagsServerError {
	#[error("Database error: {0}")]
	Database(#[from] DbError),

	#[error("Invalid flag: {0}")]
	Validation(#[from] FlagsError),

	#[error("Flag not found: {0}")]
	NotFound(String),

	#[error("Flag already exists: {0}")]
	Conflict(String),

	#[error("Dependency '{0}' does not name another existing flag")]
	InvalidDependency(String),

	#[error("Serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	#[error("Internal error: {0}")]
	Internal(String),
}

impl From<sqlx::Error> for FlagsServerError {
	fn from(e: sqlx::Error) -> Self {
		FlagsServerError::Database(DbError::Sqlx(e))
	}
}

pub type Result<T> = std::result::Result<T, FlagsServerError>;
