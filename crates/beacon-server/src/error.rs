// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use beacon_server_configuration::ConfigurationError;
use beacon_server_db::DbError;
use beacon_server_flags::FlagsServerError;
use beacon_server_hub::HubError;
use beacon_server_secrets::SecretsError;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
	#[error("not found: {0}")]
	NotFound(String),
	#[error("bad request: {0}")]
	BadRequest(String),
	#[error("conflict: {0}")]
	Conflict(String),
	#[error("service unavailable: {0}")]
	Unavailable(String),
	#[error("internal error: {0}")]
	Internal(String),
	#[error(transparent)]
	Configuration(#[from] ConfigurationError),
	#[error(transparent)]
	Flags(#[from] FlagsServerError),
	#[error(transparent)]
	Secrets(#[from] SecretsError),
	#[error(transparent)]
	Hub(#[from] HubError),
	#[error(transparent)]
	Database(#[from] DbError),
	#[error(transparent)]
	Metrics(#[from] prometheus::Error),
}

pub type Result<T> = std::result::Result<T, ServerError>;

/// JSON body for every error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
	pub error: String,
	pub message: String,
}

impl ServerError {
	pub fn status(&self) -> StatusCode {
		match self {
			ServerError::NotFound(_) => StatusCode::NOT_FOUND,
			ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
			ServerError::Conflict(_) => StatusCode::CONFLICT,
			ServerError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
			ServerError::Configuration(e) => match e {
				ConfigurationError::NotFound(_) => StatusCode::NOT_FOUND,
				ConfigurationError::InvalidName { .. } => StatusCode::BAD_REQUEST,
				ConfigurationError::VersionConflict { .. } => StatusCode::CONFLICT,
				_ => StatusCode::INTERNAL_SERVER_ERROR,
			},
			ServerError::Flags(e) => match e {
				FlagsServerError::NotFound(_) => StatusCode::NOT_FOUND,
				FlagsServerError::Validation(_) | FlagsServerError::InvalidDependency(_) => {
					StatusCode::BAD_REQUEST
				}
				FlagsServerError::Conflict(_) => StatusCode::CONFLICT,
				_ => StatusCode::INTERNAL_SERVER_ERROR,
			},
			ServerError::Secrets(e) => match e {
				SecretsError::InvalidSecret(_) | SecretsError::InvalidMasterKey(_) => {
					StatusCode::BAD_REQUEST
				}
				SecretsError::RotationInProgress => StatusCode::CONFLICT,
				_ => StatusCode::INTERNAL_SERVER_ERROR,
			},
			ServerError::Database(DbError::NotFound(_)) => StatusCode::NOT_FOUND,
			ServerError::Database(DbError::Conflict(_)) => StatusCode::CONFLICT,
			_ => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}

	fn code(status: StatusCode) -> &'static str {
		match status {
			StatusCode::NOT_FOUND => "not_found",
			StatusCode::BAD_REQUEST => "bad_request",
			StatusCode::CONFLICT => "conflict",
			StatusCode::SERVICE_UNAVAILABLE => "unavailable",
			_ => "internal_error",
		}
	}
}

impl IntoResponse for ServerError {
	fn into_response(self) -> Response {
		let status = self.status();
		if status.is_server_error() {
			tracing::error!(error = %self, "request failed");
		}

		let message = match &self {
			// Storage details stay in the log.
			_ if status == StatusCode::INTERNAL_SERVER_ERROR => "internal server error".to_string(),
			other => other.to_string(),
		};
		let body = ErrorResponse {
			error: Self::code(status).to_string(),
			message,
		};
		(status, Json(body)).into_response()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_status_mapping() {
		assert_eq!(
			ServerError::from(ConfigurationError::NotFound("x".into())).status(),
			StatusCode::NOT_FOUND
		);
		assert_eq!(
			ServerError::from(ConfigurationError::VersionConflict {
				expected: 1,
				actual: 2
			})
			.status(),
			StatusCode::CONFLICT
		);
		assert_eq!(
			ServerError::from(ConfigurationError::InvalidName {
				field: "service",
				value: "a b".into()
			})
			.status(),
			StatusCode::BAD_REQUEST
		);
		assert_eq!(
			ServerError::from(FlagsServerError::Conflict("f".into())).status(),
			StatusCode::CONFLICT
		);
		assert_eq!(
			ServerError::from(FlagsServerError::InvalidDependency("f".into())).status(),
			StatusCode::BAD_REQUEST
		);
		assert_eq!(
			ServerError::from(SecretsError::RotationInProgress).status(),
			StatusCode::CONFLICT
		);
		assert_eq!(
			ServerError::from(SecretsError::Decryption("tag".into())).status(),
			StatusCode::INTERNAL_SERVER_ERROR
		);
		assert_eq!(
			ServerError::Unavailable("vault".into()).status(),
			StatusCode::SERVICE_UNAVAILABLE
		);
	}

	#[tokio::test]
	async fn test_internal_errors_hide_details() {
		let response =
			ServerError::from(SecretsError::Decryption("bad tag".into())).into_response();
		assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
		let body = axum::body::to_bytes(response.into_body(), usize::MAX)
			.await
			.unwrap();
		let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
		assert_eq!(json["error"], "internal_error");
		assert!(!json["message"].as_str().unwrap().contains("bad tag"));
	}

	#[tokio::test]
	async fn test_not_found_body() {
		let response = ServerError::NotFound("flag 'x'".into()).into_response();
		let body = axum::body::to_bytes(response.into_body(), usize::MAX)
			.await
			.unwrap();
		let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
		assert_eq!(json["error"], "not_found");
		assert_eq!(json["message"], "not found: flag 'x'");
	}
}
