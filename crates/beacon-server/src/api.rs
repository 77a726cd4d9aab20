// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Application state and router.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use beacon_bus::{ChangeBus, LocalChangeBus};
use beacon_cache::{CacheLayer, MemoryCacheBackend};
use beacon_server_config::ServerConfig;
use beacon_server_configuration::{ConfigurationStore, SqliteConfigurationRepository};
use beacon_server_db::{AuditRepository, SqliteAuditRepository};
use beacon_server_flags::{FlagService, SqliteFlagsRepository};
use beacon_server_hub::ConnectionHub;
use beacon_server_secrets::{KeyRing, SecretVault, SqliteSecretsRepository};
use sqlx::SqlitePool;
use tracing::info;

use crate::error::{Result, ServerError};
use crate::metrics::{MetricsSnapshot, ServerMetrics};
use crate::routes;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
	pub pool: SqlitePool,
	pub cache: Arc<CacheLayer>,
	pub bus: Arc<LocalChangeBus>,
	pub configurations: Arc<ConfigurationStore>,
	pub flags: Arc<FlagService>,
	/// `None` when `secrets.enabled = false`.
	pub vault: Option<Arc<SecretVault>>,
	pub hub: Arc<ConnectionHub>,
	pub metrics: Arc<ServerMetrics>,
}

impl AppState {
	pub fn vault(&self) -> Result<&SecretVault> {
		self.vault
			.as_deref()
			.ok_or_else(|| ServerError::Unavailable("secret vault is disabled".to_string()))
	}

	pub fn metrics_snapshot(&self) -> MetricsSnapshot {
		MetricsSnapshot {
			open_connections: self.hub.registry().open_count(),
			configuration_writes: self.configurations.configuration_writes(),
			flag_evaluations: self.flags.evaluation_counts(),
			cache: self.cache.stats(),
			bus: self.bus.stats(),
			events_delivered: self.hub.events_delivered(),
		}
	}
}

/// Wire every component over one pool. The hub is created but not started.
pub fn create_app_state(pool: SqlitePool, config: &ServerConfig) -> Result<AppState> {
	let backend = Arc::new(MemoryCacheBackend::with_max_entries(config.cache.max_entries));
	let cache = Arc::new(
		CacheLayer::new(backend)
			.with_default_ttl(Duration::from_secs(config.cache.default_ttl_secs))
			.with_tag_slack(Duration::from_secs(config.cache.tag_ttl_slack_secs))
			.with_enabled(config.cache.enabled),
	);

	let bus = Arc::new(LocalChangeBus::new());
	let dyn_bus: Arc<dyn ChangeBus> = bus.clone();
	let audit: Arc<dyn AuditRepository> = Arc::new(SqliteAuditRepository::new(pool.clone()));

	let configurations = Arc::new(ConfigurationStore::new(
		Arc::new(SqliteConfigurationRepository::new(pool.clone())),
		Arc::clone(&audit),
		Arc::clone(&cache),
		Arc::clone(&dyn_bus),
	));

	let flags = Arc::new(FlagService::new(
		Arc::new(SqliteFlagsRepository::new(pool.clone())),
		Arc::clone(&cache),
		Arc::clone(&dyn_bus),
	));

	let vault = if config.secrets.enabled {
		let ring = key_ring(config)?;
		info!(key_versions = ?ring.versions(), "secret vault enabled");
		Some(Arc::new(SecretVault::new(
			Arc::new(SqliteSecretsRepository::new(pool.clone())),
			Arc::clone(&audit),
			ring,
		)))
	} else {
		info!("secret vault disabled");
		None
	};

	let hub = Arc::new(ConnectionHub::new(
		Arc::clone(&configurations),
		Arc::clone(&flags),
		dyn_bus,
		hub_config(&config.hub),
	));

	Ok(AppState {
		pool,
		cache,
		bus,
		configurations,
		flags,
		vault,
		hub,
		metrics: Arc::new(ServerMetrics::new()?),
	})
}

fn key_ring(config: &ServerConfig) -> Result<KeyRing> {
	let secrets = &config.secrets;
	let master_key = secrets
		.master_key
		.as_ref()
		.ok_or_else(|| ServerError::Internal("secrets enabled without a master key".to_string()))?;

	let mut ring = KeyRing::new(secrets.key_version, master_key)?;
	for retired in &secrets.retired_keys {
		ring = ring.with_retired(retired.version, &retired.master_key)?;
	}
	Ok(ring)
}

fn hub_config(config: &beacon_server_config::HubConfig) -> beacon_server_hub::HubConfig {
	beacon_server_hub::HubConfig {
		heartbeat_interval: Duration::from_secs(config.heartbeat_interval_secs),
		connection_timeout: Duration::from_secs(config.connection_timeout_secs),
		outbound_queue_capacity: config.outbound_queue_capacity,
	}
}

pub fn create_router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(routes::health::health_check))
		.route("/metrics", get(routes::health::prometheus_metrics))
		.route("/ws", get(routes::ws::ws_handler))
		.route(
			"/api/configurations/{service}/{environment}",
			get(routes::configurations::get_configuration)
				.put(routes::configurations::update_configuration),
		)
		.route(
			"/api/configurations/{service}/{environment}/history",
			get(routes::configurations::get_history),
		)
		.route(
			"/api/configurations/{service}/{environment}/reload",
			post(routes::configurations::trigger_reload),
		)
		.route(
			"/api/services",
			get(routes::configurations::list_services).post(routes::configurations::register_service),
		)
		.route(
			"/api/flags",
			get(routes::flags::list_flags).post(routes::flags::create_flag),
		)
		.route("/api/flags/evaluate", post(routes::flags::evaluate_flags))
		.route(
			"/api/flags/{key}",
			get(routes::flags::get_flag)
				.put(routes::flags::update_flag)
				.delete(routes::flags::delete_flag),
		)
		.route("/api/secrets/rotate", post(routes::secrets::rotate_key))
		.route(
			"/api/secrets/{configuration_id}",
			get(routes::secrets::list_secrets).put(routes::secrets::update_secrets),
		)
		.route(
			"/api/secrets/{configuration_id}/{key}",
			get(routes::secrets::get_secret).delete(routes::secrets::delete_secret),
		)
		.with_state(state)
}
