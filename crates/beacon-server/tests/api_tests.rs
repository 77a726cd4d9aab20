// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! HTTP integration tests against a file-backed SQLite database.

use axum::body::Body;
use axum::http::{Method, Request, Response, StatusCode};
use axum::Router;
use beacon_common_secret::SecretString;
use beacon_server::{create_app_state, create_router, AppState, ServerConfig};
use beacon_server_config::SecretsConfig;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

struct TestApp {
	router: Router,
	state: AppState,
	_dir: TempDir,
}

impl TestApp {
	async fn new() -> Self {
		Self::with_config(ServerConfig {
			secrets: SecretsConfig {
				master_key: Some(SecretString::new("integration-master".to_string())),
				..Default::default()
			},
			..Default::default()
		})
		.await
	}

	async fn with_config(config: ServerConfig) -> Self {
		let dir = tempfile::tempdir().unwrap();
		let url = format!("sqlite:{}", dir.path().join("beacon.db").display());
		let pool = beacon_server_db::create_pool(&url).await.unwrap();
		beacon_server_db::run_migrations(&pool).await.unwrap();

		let state = create_app_state(pool, &config).unwrap();
		Self {
			router: create_router(state.clone()),
			state,
			_dir: dir,
		}
	}

	async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> Response<Body> {
		let mut builder = Request::builder()
			.method(method)
			.uri(uri)
			.header("x-beacon-actor", "alice");
		let body = match body {
			Some(json) => {
				builder = builder.header("content-type", "application/json");
				Body::from(json.to_string())
			}
			None => Body::empty(),
		};
		self.router
			.clone()
			.oneshot(builder.body(body).unwrap())
			.await
			.unwrap()
	}

	async fn get(&self, uri: &str) -> Response<Body> {
		self.request(Method::GET, uri, None).await
	}

	async fn put(&self, uri: &str, body: Value) -> Response<Body> {
		self.request(Method::PUT, uri, Some(body)).await
	}

	async fn post(&self, uri: &str, body: Value) -> Response<Body> {
		self.request(Method::POST, uri, Some(body)).await
	}

	async fn delete(&self, uri: &str) -> Response<Body> {
		self.request(Method::DELETE, uri, None).await
	}
}

async fn json_body(response: Response<Body>) -> Value {
	let body = axum::body::to_bytes(response.into_body(), usize::MAX)
		.await
		.unwrap();
	serde_json::from_slice(&body).unwrap()
}

async fn text_body(response: Response<Body>) -> String {
	let body = axum::body::to_bytes(response.into_body(), usize::MAX)
		.await
		.unwrap();
	String::from_utf8(body.to_vec()).unwrap()
}

#[tokio::test]
async fn test_health_reports_database_and_vault() {
	let app = TestApp::new().await;

	let response = app.get("/health").await;
	assert_eq!(response.status(), StatusCode::OK);
	let body = json_body(response).await;
	assert_eq!(body["status"], "healthy");
	assert_eq!(body["database"]["status"], "healthy");
	assert_eq!(body["vault"]["enabled"], true);
	assert_eq!(body["vault"]["keyVersion"], 1);
	assert_eq!(body["openConnections"], 0);
}

#[tokio::test]
async fn test_configuration_versions_and_history() {
	let app = TestApp::new().await;
	let uri = "/api/configurations/svc-a/prod";

	let response = app.put(uri, json!({"config": {"timeout": 30}})).await;
	assert_eq!(response.status(), StatusCode::OK);
	let first = json_body(response).await;
	assert_eq!(first["version"], 1);
	assert_eq!(first["isActive"], true);
	assert_eq!(first["updatedBy"], "alice");

	let response = app.put(uri, json!({"config": {"timeout": 60}})).await;
	let second = json_body(response).await;
	assert_eq!(second["version"], 2);

	let active = json_body(app.get(uri).await).await;
	assert_eq!(active["version"], 2);
	assert_eq!(active["config"]["timeout"], 60);

	let old = json_body(app.get(&format!("{uri}?version=1")).await).await;
	assert_eq!(old["config"]["timeout"], 30);
	assert_eq!(old["isActive"], false);

	let history = json_body(app.get(&format!("{uri}/history?limit=10")).await).await;
	assert_eq!(history["total"], 2);
	let versions: Vec<i64> = history["entries"]
		.as_array()
		.unwrap()
		.iter()
		.map(|entry| entry["configuration"]["version"].as_i64().unwrap())
		.collect();
	assert_eq!(versions, vec![2, 1]);
	assert_eq!(history["entries"][0]["audit"]["action"], "update");
}

#[tokio::test]
async fn test_configuration_errors() {
	let app = TestApp::new().await;

	let response = app.get("/api/configurations/svc-a/prod").await;
	assert_eq!(response.status(), StatusCode::NOT_FOUND);
	assert_eq!(json_body(response).await["error"], "not_found");

	let response = app
		.put("/api/configurations/-svc/prod", json!({"config": {}}))
		.await;
	assert_eq!(response.status(), StatusCode::BAD_REQUEST);

	app.put("/api/configurations/svc-a/prod", json!({"config": {"a": 1}}))
		.await;
	let response = app
		.put(
			"/api/configurations/svc-a/prod",
			json!({"config": {"a": 2}, "expectedVersion": 0}),
		)
		.await;
	assert_eq!(response.status(), StatusCode::CONFLICT);
	assert_eq!(json_body(response).await["error"], "conflict");
}

#[tokio::test]
async fn test_service_schema_drives_validation() {
	let app = TestApp::new().await;

	let response = app
		.post(
			"/api/services",
			json!({"name": "payments", "requiredKeys": ["dsn"], "strict": true}),
		)
		.await;
	assert_eq!(response.status(), StatusCode::CREATED);

	let services = json_body(app.get("/api/services").await).await;
	assert_eq!(services[0]["name"], "payments");

	let stored = json_body(
		app.put(
			"/api/configurations/payments/prod",
			json!({"config": {"extra": true}}),
		)
		.await,
	)
	.await;
	assert_eq!(stored["isValid"], false);
	let errors = stored["validationErrors"].as_array().unwrap();
	assert!(errors.iter().any(|e| e == "missing required key 'dsn'"));

	let unchecked = json_body(
		app.put(
			"/api/configurations/payments/prod",
			json!({"config": {"extra": true}, "validate": false}),
		)
		.await,
	)
	.await;
	assert_eq!(unchecked["isValid"], true);
}

#[tokio::test]
async fn test_reload_reaches_started_hub() {
	let app = TestApp::new().await;
	app.state.hub.start().await.unwrap();

	let response = app
		.post("/api/configurations/svc-a/prod/reload?force=true", json!({}))
		.await;
	assert_eq!(response.status(), StatusCode::OK);
	let body = json_body(response).await;
	assert_eq!(body["delivered"], 1);
	assert_eq!(body["force"], true);

	assert_eq!(app.state.configurations.configuration_writes(), 0);
	app.state.hub.shutdown().await;
}

#[tokio::test]
async fn test_flag_lifecycle_and_evaluation() {
	let app = TestApp::new().await;

	let response = app
		.post(
			"/api/flags",
			json!({"key": "new-checkout", "name": "New checkout", "enabled": true}),
		)
		.await;
	assert_eq!(response.status(), StatusCode::CREATED);
	let flag = json_body(response).await;
	assert_eq!(flag["createdBy"], "alice");

	let response = app
		.post(
			"/api/flags",
			json!({"key": "new-checkout", "name": "Again"}),
		)
		.await;
	assert_eq!(response.status(), StatusCode::CONFLICT);

	let response = app
		.post(
			"/api/flags/evaluate",
			json!({
				"flags": ["new-checkout", "missing-flag"],
				"context": {"userId": "u-1", "environment": "production"}
			}),
		)
		.await;
	assert_eq!(response.status(), StatusCode::OK);
	let body = json_body(response).await;
	assert_eq!(body["evaluations"][0]["flagKey"], "new-checkout");
	assert_eq!(body["evaluations"][0]["reason"], "ENABLED");
	assert_eq!(body["evaluations"][1]["reason"], "FLAG_NOT_FOUND");
	assert_eq!(body["evaluations"][1]["enabled"], false);

	let updated = json_body(
		app.put("/api/flags/new-checkout", json!({"enabled": false}))
			.await,
	)
	.await;
	assert_eq!(updated["enabled"], false);

	let response = app.delete("/api/flags/new-checkout").await;
	assert_eq!(response.status(), StatusCode::NO_CONTENT);
	let response = app.get("/api/flags/new-checkout").await;
	assert_eq!(response.status(), StatusCode::NOT_FOUND);
	let response = app.delete("/api/flags/new-checkout").await;
	assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_flag_is_rejected() {
	let app = TestApp::new().await;
	let response = app
		.post(
			"/api/flags",
			json!({"key": "Bad Key", "name": "nope"}),
		)
		.await;
	assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_secret_roundtrip_and_rotation() {
	let app = TestApp::new().await;
	let uri = "/api/secrets/cfg-1";

	let response = app
		.put(
			uri,
			json!({"secrets": [
				{"key": "DB_PASSWORD", "value": "hunter2"},
				{"key": "API_TOKEN", "value": "t0k3n", "description": "upstream"}
			]}),
		)
		.await;
	assert_eq!(response.status(), StatusCode::OK);
	assert_eq!(json_body(response).await["updated"], 2);

	let response = app.get(uri).await;
	let listing = text_body(response).await;
	assert!(listing.contains("DB_PASSWORD"));
	assert!(!listing.contains("hunter2"));

	let secret = json_body(app.get(&format!("{uri}/DB_PASSWORD")).await).await;
	assert_eq!(secret["value"], "hunter2");

	let report = json_body(
		app.post(
			"/api/secrets/rotate",
			json!({"newMasterKey": "rotated-master"}),
		)
		.await,
	)
	.await;
	assert_eq!(report["fromVersion"], 1);
	assert_eq!(report["toVersion"], 2);
	assert_eq!(report["rotated"], 2);
	assert_eq!(report["failed"], 0);

	let secret = json_body(app.get(&format!("{uri}/DB_PASSWORD")).await).await;
	assert_eq!(secret["value"], "hunter2");

	let response = app.delete(&format!("{uri}/DB_PASSWORD")).await;
	assert_eq!(response.status(), StatusCode::NO_CONTENT);
	let response = app.get(&format!("{uri}/DB_PASSWORD")).await;
	assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_secret_routes_unavailable_when_vault_disabled() {
	let app = TestApp::with_config(ServerConfig {
		secrets: SecretsConfig {
			enabled: false,
			..Default::default()
		},
		..Default::default()
	})
	.await;

	let response = app.get("/api/secrets/cfg-1").await;
	assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
	assert_eq!(json_body(response).await["error"], "unavailable");
}

#[tokio::test]
async fn test_metrics_reflect_activity() {
	let app = TestApp::new().await;

	app.put("/api/configurations/svc-a/prod", json!({"config": {"a": 1}}))
		.await;
	app.post(
		"/api/flags/evaluate",
		json!({"flags": ["unknown-flag"]}),
	)
	.await;

	let response = app.get("/metrics").await;
	assert_eq!(response.status(), StatusCode::OK);
	let text = text_body(response).await;
	assert!(text.contains("beacon_configuration_writes_total 1"));
	assert!(text.contains("beacon_flag_evaluations_total{reason=\"FLAG_NOT_FOUND\"} 1"));
	assert!(text.contains("beacon_hub_open_connections 0"));
}
