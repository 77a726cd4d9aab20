// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Feature flag routes.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use beacon_server_flags::{EvaluationContext, EvaluationResult, FeatureFlag, FlagInput, FlagUpdate};
use serde::{Deserialize, Serialize};

use super::actor;
use crate::api::AppState;
use crate::error::{Result, ServerError};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateFlagsRequest {
	pub flags: Vec<String>,
	#[serde(default)]
	pub context: EvaluationContext,
}

#[derive(Debug, Serialize)]
pub struct EvaluateFlagsResponse {
	pub evaluations: Vec<EvaluationResult>,
}

/// GET /api/flags
pub async fn list_flags(State(state): State<AppState>) -> Result<Json<Vec<FeatureFlag>>> {
	Ok(Json(state.flags.list_flags().await?))
}

/// POST /api/flags
pub async fn create_flag(
	State(state): State<AppState>,
	headers: HeaderMap,
	Json(input): Json<FlagInput>,
) -> Result<impl IntoResponse> {
	let flag = state.flags.create_flag(input, actor(&headers)).await?;
	Ok((StatusCode::CREATED, Json(flag)))
}

/// GET /api/flags/{key}
pub async fn get_flag(
	State(state): State<AppState>,
	Path(key): Path<String>,
) -> Result<Json<FeatureFlag>> {
	state
		.flags
		.get_flag(&key)
		.await?
		.map(Json)
		.ok_or_else(|| ServerError::NotFound(format!("flag '{key}'")))
}

/// PUT /api/flags/{key} - partial update.
pub async fn update_flag(
	State(state): State<AppState>,
	Path(key): Path<String>,
	headers: HeaderMap,
	Json(update): Json<FlagUpdate>,
) -> Result<Json<FeatureFlag>> {
	let flag = state.flags.update_flag(&key, update, actor(&headers)).await?;
	Ok(Json(flag))
}

/// DELETE /api/flags/{key}
pub async fn delete_flag(
	State(state): State<AppState>,
	Path(key): Path<String>,
	headers: HeaderMap,
) -> Result<StatusCode> {
	state.flags.delete_flag(&key, actor(&headers)).await?;
	Ok(StatusCode::NO_CONTENT)
}

/// POST /api/flags/evaluate - results come back in request order.
pub async fn evaluate_flags(
	State(state): State<AppState>,
	Json(request): Json<EvaluateFlagsRequest>,
) -> Result<Json<EvaluateFlagsResponse>> {
	let evaluations = state
		.flags
		.evaluate_feature_flags(&request.flags, &request.context)
		.await?;
	Ok(Json(EvaluateFlagsResponse { evaluations }))
}
