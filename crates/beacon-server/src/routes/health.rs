// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use tokio::time::Instant;

use crate::api::AppState;
use crate::error::ServerError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
	Healthy,
	Unhealthy,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentHealth {
	pub status: HealthStatus,
	pub latency_ms: u64,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultHealth {
	pub enabled: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub key_version: Option<u32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub pending_rotation: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
	pub status: HealthStatus,
	pub version: &'static str,
	pub database: ComponentHealth,
	pub vault: VaultHealth,
	pub open_connections: usize,
	pub subscribers: usize,
}

async fn check_database(state: &AppState) -> ComponentHealth {
	let start = Instant::now();
	let result = sqlx::query("SELECT 1").execute(&state.pool).await;
	let latency_ms = start.elapsed().as_millis() as u64;
	match result {
		Ok(_) => ComponentHealth {
			status: HealthStatus::Healthy,
			latency_ms,
			error: None,
		},
		Err(e) => ComponentHealth {
			status: HealthStatus::Unhealthy,
			latency_ms,
			error: Some(e.to_string()),
		},
	}
}

async fn check_vault(state: &AppState) -> VaultHealth {
	let Some(vault) = state.vault.as_ref() else {
		return VaultHealth {
			enabled: false,
			key_version: None,
			pending_rotation: None,
		};
	};
	VaultHealth {
		enabled: true,
		key_version: Some(vault.current_key_version()),
		pending_rotation: vault.secrets_pending_rotation().await.ok(),
	}
}

/// GET /health - database reachability plus hub and vault summary.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
	let (database, vault) = tokio::join!(check_database(&state), check_vault(&state));

	let (status, code) = match database.status {
		HealthStatus::Healthy => (HealthStatus::Healthy, StatusCode::OK),
		HealthStatus::Unhealthy => (HealthStatus::Unhealthy, StatusCode::SERVICE_UNAVAILABLE),
	};

	let body = HealthResponse {
		status,
		version: env!("CARGO_PKG_VERSION"),
		database,
		vault,
		open_connections: state.hub.registry().open_count(),
		subscribers: state.configurations.subscriptions().subscriber_count(),
	};
	(code, Json(body))
}

/// GET /metrics - Prometheus text exposition.
pub async fn prometheus_metrics(
	State(state): State<AppState>,
) -> Result<impl IntoResponse, ServerError> {
	state.metrics.observe(&state.metrics_snapshot());
	match state.metrics.encode() {
		Ok(metrics) => Ok((
			StatusCode::OK,
			[(
				axum::http::header::CONTENT_TYPE,
				"text/plain; version=0.0.4; charset=utf-8",
			)],
			metrics,
		)),
		Err(e) => {
			tracing::error!(error = %e, "failed to gather metrics");
			Err(ServerError::Internal(format!("Failed to gather metrics: {e}")))
		}
	}
}
