// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Secret vault routes. Every handler answers 503 when the vault is disabled.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use beacon_common_secret::SecretString;
use beacon_server_secrets::{NewSecret, RotationReport, SecretMetadata, SecretValue};
use serde::{Deserialize, Serialize};

use super::actor;
use crate::api::AppState;
use crate::error::{Result, ServerError};

#[derive(Debug, Deserialize)]
pub struct UpdateSecretsRequest {
	pub secrets: Vec<NewSecret>,
}

#[derive(Debug, Serialize)]
pub struct UpdateSecretsResponse {
	pub updated: usize,
}

#[derive(Debug, Serialize)]
pub struct SecretResponse {
	pub key: String,
	pub value: SecretValue,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotateKeyRequest {
	pub new_master_key: SecretString,
}

/// GET /api/secrets/{configuration_id} - metadata only.
pub async fn list_secrets(
	State(state): State<AppState>,
	Path(configuration_id): Path<String>,
) -> Result<Json<Vec<SecretMetadata>>> {
	Ok(Json(state.vault()?.list_secrets(&configuration_id).await?))
}

/// PUT /api/secrets/{configuration_id} - upsert the given keys.
pub async fn update_secrets(
	State(state): State<AppState>,
	Path(configuration_id): Path<String>,
	headers: HeaderMap,
	Json(request): Json<UpdateSecretsRequest>,
) -> Result<Json<UpdateSecretsResponse>> {
	let updated = state
		.vault()?
		.update_secrets_for_configuration(&configuration_id, request.secrets, actor(&headers))
		.await?;
	Ok(Json(UpdateSecretsResponse { updated }))
}

/// GET /api/secrets/{configuration_id}/{key} - decrypted value.
pub async fn get_secret(
	State(state): State<AppState>,
	Path((configuration_id, key)): Path<(String, String)>,
) -> Result<Json<SecretResponse>> {
	let value = state
		.vault()?
		.get_secret(&configuration_id, &key)
		.await?
		.ok_or_else(|| ServerError::NotFound(format!("secret '{key}'")))?;
	Ok(Json(SecretResponse { key, value }))
}

/// DELETE /api/secrets/{configuration_id}/{key}
pub async fn delete_secret(
	State(state): State<AppState>,
	Path((configuration_id, key)): Path<(String, String)>,
	headers: HeaderMap,
) -> Result<StatusCode> {
	if state
		.vault()?
		.delete_secret(&configuration_id, &key, actor(&headers))
		.await?
	{
		Ok(StatusCode::NO_CONTENT)
	} else {
		Err(ServerError::NotFound(format!("secret '{key}'")))
	}
}

/// POST /api/secrets/rotate - re-encrypt every secret under a new master key.
pub async fn rotate_key(
	State(state): State<AppState>,
	headers: HeaderMap,
	Json(request): Json<RotateKeyRequest>,
) -> Result<Json<RotationReport>> {
	if request.new_master_key.is_empty() {
		return Err(ServerError::BadRequest("newMasterKey must not be empty".to_string()));
	}
	let report = state
		.vault()?
		.rotate_encryption_key(&request.new_master_key, actor(&headers))
		.await?;
	Ok(Json(report))
}
