// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use beacon_server_db::DbError;

#[derive(Debug, thiserror::Error)]
pub enum SecretsError {
	#[error("Database error: {0}")]
	Database(#[from] DbError),

	#[error("Encryption failed: {0}")]
	Encryption(String),

	#[error("Decryption failed: {0}")]
	Decryption(String),

	#[error("No key registered for key version {0}")]
	UnknownKeyVersion(u32),

	#[error("Invalid master key: {0}")]
	InvalidMasterKey(String),

	#[error("Invalid secret: {0}")]
	InvalidSecret(String),

	#[error("A key rotation is already running")]
	RotationInProgress,

	#[error("Stored ciphertext is malformed: {0}")]
	MalformedCiphertext(String),
}

impl From<sqlx::Error> for SecretsError {
	fn from(e: sqlx::Error) -> Self {
		SecretsError::Database(DbError::Sqlx(e))
	}
}

impl From<serde_json::Error> for SecretsError {
	fn from(e: serde_json::Error) -> Self {
		SecretsError::Database(DbError::Serialization(e))
	}
}

pub type Result<T> = std::result::Result<T, SecretsError>;
