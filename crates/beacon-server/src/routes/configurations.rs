// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration and service registry routes.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use beacon_server_configuration::{
	ConfigBlob, Configuration, HistoryPage, ServiceInput, ServiceRegistration, UpdateOptions,
};
use serde::{Deserialize, Serialize};

use super::actor;
use crate::api::AppState;
use crate::error::{Result, ServerError};

const DEFAULT_HISTORY_LIMIT: i64 = 50;

#[derive(Debug, Default, Deserialize)]
pub struct GetConfigurationQuery {
	pub version: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateConfigurationRequest {
	pub config: serde_json::Value,
	#[serde(default)]
	pub description: Option<String>,
	#[serde(default)]
	pub tags: Vec<String>,
	#[serde(default)]
	pub updated_by: Option<String>,
	#[serde(default)]
	pub validate: Option<bool>,
	#[serde(default)]
	pub expected_version: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
	pub limit: Option<i64>,
	pub offset: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReloadQuery {
	#[serde(default)]
	pub force: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReloadResponse {
	pub service_name: String,
	pub environment: String,
	pub force: bool,
	pub delivered: usize,
}

/// GET /api/configurations/{service}/{environment}[?version=N]
pub async fn get_configuration(
	State(state): State<AppState>,
	Path((service, environment)): Path<(String, String)>,
	Query(query): Query<GetConfigurationQuery>,
) -> Result<Json<Configuration>> {
	state
		.configurations
		.get_configuration(&service, &environment, query.version)
		.await?
		.map(Json)
		.ok_or_else(|| match query.version {
			Some(version) => ServerError::NotFound(format!(
				"configuration {service}/{environment} version {version}"
			)),
			None => ServerError::NotFound(format!("configuration {service}/{environment}")),
		})
}

/// PUT /api/configurations/{service}/{environment} - write a new version.
pub async fn update_configuration(
	State(state): State<AppState>,
	Path((service, environment)): Path<(String, String)>,
	headers: HeaderMap,
	Json(request): Json<UpdateConfigurationRequest>,
) -> Result<Json<Configuration>> {
	let options = UpdateOptions {
		description: request.description,
		tags: request.tags,
		updated_by: request.updated_by.or_else(|| actor(&headers)),
		validate: request.validate.unwrap_or(true),
		expected_version: request.expected_version,
	};

	let configuration = state
		.configurations
		.update_configuration(&service, &environment, ConfigBlob::new(request.config), options)
		.await?;
	Ok(Json(configuration))
}

/// GET /api/configurations/{service}/{environment}/history
pub async fn get_history(
	State(state): State<AppState>,
	Path((service, environment)): Path<(String, String)>,
	Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryPage>> {
	let page = state
		.configurations
		.get_configuration_history(
			&service,
			&environment,
			query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT),
			query.offset.unwrap_or(0).max(0),
		)
		.await?;
	Ok(Json(page))
}

/// POST /api/configurations/{service}/{environment}/reload[?force=true]
pub async fn trigger_reload(
	State(state): State<AppState>,
	Path((service, environment)): Path<(String, String)>,
	Query(query): Query<ReloadQuery>,
) -> Result<Json<ReloadResponse>> {
	let delivered = state
		.configurations
		.trigger_configuration_reload(&service, &environment, query.force)
		.await?;
	Ok(Json(ReloadResponse {
		service_name: service,
		environment,
		force: query.force,
		delivered,
	}))
}

/// GET /api/services
pub async fn list_services(State(state): State<AppState>) -> Result<Json<Vec<ServiceRegistration>>> {
	Ok(Json(state.configurations.list_services().await?))
}

/// POST /api/services - register or replace a service schema.
pub async fn register_service(
	State(state): State<AppState>,
	Json(input): Json<ServiceInput>,
) -> Result<impl IntoResponse> {
	let service = state.configurations.register_service(input).await?;
	Ok((StatusCode::CREATED, Json(service)))
}
