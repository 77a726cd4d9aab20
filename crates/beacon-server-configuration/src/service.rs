// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use beacon_bus::{config_change_channel, config_reload_channel, ChangeBus, ChangeEvent};
use beacon_cache::CacheLayer;
use beacon_server_audit::AuditResourceType;
use beacon_server_db::AuditRepository;
use tracing::{info, instrument, warn};

use crate::error::Result;
use crate::repository::ConfigurationRepository;
use crate::schema::ConfigSchema;
use crate::subscriptions::SubscriptionRegistry;
use crate::types::{
	validate_name, ConfigBlob, Configuration, ConfigurationDraft, HistoryEntry, HistoryPage,
	ServiceInput, ServiceRegistration, UpdateOptions,
};

pub fn config_cache_key(service_name: &str, environment: &str) -> String {
	format!("config:{service_name}:{environment}")
}

pub fn config_version_cache_key(service_name: &str, environment: &str, version: i64) -> String {
	format!("config:{service_name}:{environment}:v{version}")
}

fn service_tag(service_name: &str) -> String {
	format!("service:{service_name}")
}

/// Versioned configuration per (service, environment), with schema
/// validation, audit, caching and change events.
pub struct ConfigurationStore {
	repo: Arc<dyn ConfigurationRepository>,
	audit: Arc<dyn AuditRepository>,
	cache: Arc<CacheLayer>,
	bus: Arc<dyn ChangeBus>,
	subscriptions: SubscriptionRegistry,
	writes: AtomicU64,
}

impl ConfigurationStore {
	pub fn new(
		repo: Arc<dyn ConfigurationRepository>,
		audit: Arc<dyn AuditRepository>,
		cache: Arc<CacheLayer>,
		bus: Arc<dyn ChangeBus>,
	) -> Self {
		Self {
			repo,
			audit,
			cache,
			bus,
			subscriptions: SubscriptionRegistry::new(),
			writes: AtomicU64::new(0),
		}
	}

	/// The active configuration, or version `version` when given.
	#[instrument(skip(self))]
	pub async fn get_configuration(
		&self,
		service_name: &str,
		environment: &str,
		version: Option<i64>,
	) -> Result<Option<Configuration>> {
		validate_name("service", service_name)?;
		validate_name("environment", environment)?;

		match version {
			None => {
				let key = config_cache_key(service_name, environment);
				let tags = [key.clone(), service_tag(service_name)];
				self.cache
					.get_or_load(&key, None, &tags, || async {
						self.repo.get_active(service_name, environment).await
					})
					.await
			}
			Some(version) => {
				let key = config_version_cache_key(service_name, environment, version);
				let tags = [service_tag(service_name)];
				self.cache
					.get_or_load(&key, None, &tags, || async {
						self.repo
							.get_version(service_name, environment, version)
							.await
					})
					.await
			}
		}
	}

	/// Write the next version. Schema failures are stored on the version
	/// (`is_valid = false`) rather than rejected.
	#[instrument(skip(self, config, options))]
	pub async fn update_configuration(
		&self,
		service_name: &str,
		environment: &str,
		config: ConfigBlob,
		options: UpdateOptions,
	) -> Result<Configuration> {
		validate_name("service", service_name)?;
		validate_name("environment", environment)?;

		let (is_valid, validation_errors) = if options.validate {
			let outcome = self.schema_for(service_name).await?.validate(&config);
			(outcome.is_valid(), outcome.into_errors())
		} else {
			(true, None)
		};

		let draft = ConfigurationDraft {
			service_name: service_name.to_string(),
			environment: environment.to_string(),
			config: config.into_value(),
			description: options.description,
			tags: options.tags,
			is_valid,
			validation_errors,
			updated_by: options.updated_by,
		};
		let configuration = self
			.repo
			.create_version(&draft, options.expected_version)
			.await?;
		self.writes.fetch_add(1, Ordering::Relaxed);

		if configuration.is_valid {
			info!(
				service_name,
				environment,
				version = configuration.version,
				"configuration updated"
			);
		} else {
			warn!(
				service_name,
				environment,
				version = configuration.version,
				errors = ?configuration.validation_errors,
				"configuration stored with validation errors"
			);
		}

		self.cache
			.invalidate_by_tags(&[config_cache_key(service_name, environment)])
			.await;

		let event = ChangeEvent::configuration_changed(
			service_name,
			environment,
			configuration.version,
			configuration.config.clone(),
			configuration.is_valid,
			configuration.updated_by.clone(),
		);
		if let Err(e) = self
			.bus
			.publish(&config_change_channel(service_name, environment), event)
			.await
		{
			warn!(service_name, environment, error = %e, "failed to publish configuration change");
		}

		Ok(configuration)
	}

	/// Versions newest first, each with its latest audit entry.
	#[instrument(skip(self))]
	pub async fn get_configuration_history(
		&self,
		service_name: &str,
		environment: &str,
		limit: i64,
		offset: i64,
	) -> Result<HistoryPage> {
		validate_name("service", service_name)?;
		validate_name("environment", environment)?;

		let (versions, total) = self
			.repo
			.list_versions(service_name, environment, limit, offset)
			.await?;

		let mut entries = Vec::with_capacity(versions.len());
		for configuration in versions {
			let audit = self
				.audit
				.latest_for_resource(
					AuditResourceType::Configuration,
					&configuration.id.to_string(),
				)
				.await?;
			entries.push(HistoryEntry {
				configuration,
				audit,
			});
		}

		Ok(HistoryPage {
			entries,
			total,
			limit,
			offset,
		})
	}

	#[instrument(skip(self, input), fields(service_name = %input.name))]
	pub async fn register_service(&self, input: ServiceInput) -> Result<ServiceRegistration> {
		validate_name("service", &input.name)?;
		let service = self.repo.upsert_service(&input).await?;
		info!(service_name = %service.name, strict = service.strict, "service registered");
		Ok(service)
	}

	pub async fn get_service(&self, name: &str) -> Result<Option<ServiceRegistration>> {
		self.repo.get_service(name).await
	}

	pub async fn list_services(&self) -> Result<Vec<ServiceRegistration>> {
		self.repo.list_services().await
	}

	pub async fn list_environments(&self, service_name: &str) -> Result<Vec<String>> {
		validate_name("service", service_name)?;
		self.repo.list_environments(service_name).await
	}

	/// Drop cached state and tell clients to re-read. Nothing is written.
	/// Returns how many bus subscriptions received the signal.
	#[instrument(skip(self))]
	pub async fn trigger_configuration_reload(
		&self,
		service_name: &str,
		environment: &str,
		force: bool,
	) -> Result<usize> {
		validate_name("service", service_name)?;
		validate_name("environment", environment)?;

		self.cache
			.invalidate_by_tags(&[config_cache_key(service_name, environment)])
			.await;

		let event = ChangeEvent::configuration_reload(service_name, environment, force);
		let delivered = self
			.bus
			.publish(&config_reload_channel(service_name, environment), event)
			.await?;
		info!(service_name, environment, force, delivered, "configuration reload triggered");
		Ok(delivered)
	}

	pub fn subscriptions(&self) -> &SubscriptionRegistry {
		&self.subscriptions
	}

	/// Successful configuration writes since start.
	pub fn configuration_writes(&self) -> u64 {
		self.writes.load(Ordering::Relaxed)
	}

	async fn schema_for(&self, service_name: &str) -> Result<ConfigSchema> {
		Ok(match self.repo.get_service(service_name).await? {
			Some(service) => ConfigSchema::for_service(&service),
			None => ConfigSchema::default_schema(),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::ConfigurationError;
	use crate::repository::SqliteConfigurationRepository;
	use beacon_bus::{LocalChangeBus, CONFIG_PATTERN};
	use beacon_cache::MemoryCacheBackend;
	use beacon_server_audit::AuditAction;
	use beacon_server_db::testing::create_test_pool;
	use beacon_server_db::SqliteAuditRepository;
	use serde_json::json;

	struct Harness {
		cache: Arc<CacheLayer>,
		bus: Arc<LocalChangeBus>,
		store: ConfigurationStore,
	}

	async fn harness() -> Harness {
		let pool = create_test_pool().await;
		let cache = Arc::new(CacheLayer::new(Arc::new(MemoryCacheBackend::new())));
		let bus = Arc::new(LocalChangeBus::new());
		let store = ConfigurationStore::new(
			Arc::new(SqliteConfigurationRepository::new(pool.clone())),
			Arc::new(SqliteAuditRepository::new(pool)),
			cache.clone(),
			bus.clone(),
		);
		Harness { cache, bus, store }
	}

	fn blob(value: serde_json::Value) -> ConfigBlob {
		ConfigBlob::new(value)
	}

	type Gate = (
		tokio::sync::oneshot::Sender<()>,
		tokio::sync::oneshot::Receiver<()>,
	);

	/// Holds the next `get_active` after it has read from the database until
	/// the test releases it.
	struct StalledReads {
		inner: SqliteConfigurationRepository,
		gate: parking_lot::Mutex<Option<Gate>>,
	}

	impl StalledReads {
		/// Arm the gate. Returns (read finished, release) halves.
		fn stall_next_read(
			&self,
		) -> (
			tokio::sync::oneshot::Receiver<()>,
			tokio::sync::oneshot::Sender<()>,
		) {
			let (read_tx, read_rx) = tokio::sync::oneshot::channel();
			let (release_tx, release_rx) = tokio::sync::oneshot::channel();
			*self.gate.lock() = Some((read_tx, release_rx));
			(read_rx, release_tx)
		}
	}

	#[async_trait::async_trait]
	impl ConfigurationRepository for StalledReads {
		async fn get_active(
			&self,
			service_name: &str,
			environment: &str,
		) -> Result<Option<Configuration>> {
			let read = self.inner.get_active(service_name, environment).await;
			let gate = self.gate.lock().take();
			if let Some((read_tx, release_rx)) = gate {
				let _ = read_tx.send(());
				let _ = release_rx.await;
			}
			read
		}

		async fn get_version(
			&self,
			service_name: &str,
			environment: &str,
			version: i64,
		) -> Result<Option<Configuration>> {
			self.inner.get_version(service_name, environment, version).await
		}

		async fn create_version(
			&self,
			draft: &ConfigurationDraft,
			expected_version: Option<i64>,
		) -> Result<Configuration> {
			self.inner.create_version(draft, expected_version).await
		}

		async fn list_versions(
			&self,
			service_name: &str,
			environment: &str,
			limit: i64,
			offset: i64,
		) -> Result<(Vec<Configuration>, i64)> {
			self.inner
				.list_versions(service_name, environment, limit, offset)
				.await
		}

		async fn list_environments(&self, service_name: &str) -> Result<Vec<String>> {
			self.inner.list_environments(service_name).await
		}

		async fn upsert_service(&self, input: &ServiceInput) -> Result<ServiceRegistration> {
			self.inner.upsert_service(input).await
		}

		async fn get_service(&self, name: &str) -> Result<Option<ServiceRegistration>> {
			self.inner.get_service(name).await
		}

		async fn list_services(&self) -> Result<Vec<ServiceRegistration>> {
			self.inner.list_services().await
		}
	}

	#[tokio::test]
	async fn test_stale_read_during_update_is_not_cached() {
		let pool = create_test_pool().await;
		let repo = Arc::new(StalledReads {
			inner: SqliteConfigurationRepository::new(pool.clone()),
			gate: parking_lot::Mutex::new(None),
		});
		let store = ConfigurationStore::new(
			repo.clone(),
			Arc::new(SqliteAuditRepository::new(pool)),
			Arc::new(CacheLayer::new(Arc::new(MemoryCacheBackend::new()))),
			Arc::new(LocalChangeBus::new()),
		);
		store
			.update_configuration("svc-a", "prod", blob(json!({"a": 1})), UpdateOptions::default())
			.await
			.unwrap();

		let (read_done, release) = repo.stall_next_read();
		let (stale, updated) = tokio::join!(
			store.get_configuration("svc-a", "prod", None),
			async {
				read_done.await.unwrap();
				let updated = store
					.update_configuration(
						"svc-a",
						"prod",
						blob(json!({"a": 2})),
						UpdateOptions::default(),
					)
					.await
					.unwrap();
				release.send(()).unwrap();
				updated
			}
		);
		assert_eq!(stale.unwrap().unwrap().version, 1);
		assert_eq!(updated.version, 2);

		let current = store
			.get_configuration("svc-a", "prod", None)
			.await
			.unwrap()
			.unwrap();
		assert_eq!(current.version, 2);
		assert_eq!(current.config, json!({"a": 2}));
	}

	#[tokio::test]
	async fn test_update_then_read_versions() {
		let h = harness().await;
		h.store
			.update_configuration("svc-a", "prod", blob(json!({"a": 1})), UpdateOptions::default())
			.await
			.unwrap();
		h.store
			.update_configuration("svc-a", "prod", blob(json!({"a": 2})), UpdateOptions::default())
			.await
			.unwrap();

		let current = h
			.store
			.get_configuration("svc-a", "prod", None)
			.await
			.unwrap()
			.unwrap();
		assert_eq!(current.version, 2);
		assert_eq!(current.config, json!({"a": 2}));

		let first = h
			.store
			.get_configuration("svc-a", "prod", Some(1))
			.await
			.unwrap()
			.unwrap();
		assert_eq!(first.version, 1);
		assert_eq!(first.config, json!({"a": 1}));
		assert_eq!(h.store.configuration_writes(), 2);
	}

	#[tokio::test]
	async fn test_write_invalidates_cached_active_version() {
		let h = harness().await;
		h.store
			.update_configuration("svc-a", "prod", blob(json!({"a": 1})), UpdateOptions::default())
			.await
			.unwrap();
		h.store.get_configuration("svc-a", "prod", None).await.unwrap();
		assert!(h.cache.exists(&config_cache_key("svc-a", "prod")).await);

		h.store
			.update_configuration("svc-a", "prod", blob(json!({"a": 2})), UpdateOptions::default())
			.await
			.unwrap();
		assert!(!h.cache.exists(&config_cache_key("svc-a", "prod")).await);

		let current = h
			.store
			.get_configuration("svc-a", "prod", None)
			.await
			.unwrap()
			.unwrap();
		assert_eq!(current.version, 2);
	}

	#[tokio::test]
	async fn test_invalid_configuration_is_stored() {
		let h = harness().await;
		h.store
			.register_service(ServiceInput {
				name: "svc-a".to_string(),
				description: None,
				required_keys: vec!["port".to_string()],
				optional_keys: vec!["host".to_string()],
				endpoints: vec![],
				strict: true,
			})
			.await
			.unwrap();

		let stored = h
			.store
			.update_configuration(
				"svc-a",
				"prod",
				blob(json!({"debug": true})),
				UpdateOptions::default(),
			)
			.await
			.unwrap();
		assert_eq!(stored.version, 1);
		assert!(stored.is_active);
		assert!(!stored.is_valid);
		assert_eq!(
			stored.validation_errors,
			Some(vec![
				"missing required key 'port'".to_string(),
				"unknown key 'debug'".to_string(),
			])
		);

		let skipped = h
			.store
			.update_configuration(
				"svc-a",
				"prod",
				blob(json!({"debug": true})),
				UpdateOptions::default().without_validation(),
			)
			.await
			.unwrap();
		assert_eq!(skipped.version, 2);
		assert!(skipped.is_valid);
	}

	#[tokio::test]
	async fn test_update_publishes_change() {
		let h = harness().await;
		let mut sub = h.bus.subscribe(CONFIG_PATTERN).await.unwrap();

		h.store
			.update_configuration(
				"svc-a",
				"prod",
				blob(json!({"a": 1})),
				UpdateOptions::default().updated_by("alice"),
			)
			.await
			.unwrap();

		let message = sub.try_recv().unwrap();
		assert_eq!(message.channel, "config:change:svc-a:prod");
		match message.event {
			ChangeEvent::ConfigurationChanged(data) => {
				assert_eq!(data.version, 1);
				assert_eq!(data.config, json!({"a": 1}));
				assert_eq!(data.changed_by.as_deref(), Some("alice"));
			}
			other => panic!("unexpected event {other:?}"),
		}
	}

	#[tokio::test]
	async fn test_reload_publishes_without_writing() {
		let h = harness().await;
		let mut sub = h.bus.subscribe(CONFIG_PATTERN).await.unwrap();

		let delivered = h
			.store
			.trigger_configuration_reload("svc-a", "prod", true)
			.await
			.unwrap();
		assert_eq!(delivered, 1);

		let message = sub.try_recv().unwrap();
		assert_eq!(message.channel, "config:reload:svc-a:prod");
		assert!(matches!(
			message.event,
			ChangeEvent::ConfigurationReload(ref d) if d.force
		));
		assert!(h
			.store
			.get_configuration("svc-a", "prod", None)
			.await
			.unwrap()
			.is_none());
		assert_eq!(h.store.configuration_writes(), 0);
	}

	#[tokio::test]
	async fn test_history_carries_audit() {
		let h = harness().await;
		for i in 1..=3 {
			h.store
				.update_configuration(
					"svc-a",
					"prod",
					blob(json!({"a": i})),
					UpdateOptions::default(),
				)
				.await
				.unwrap();
		}

		let page = h
			.store
			.get_configuration_history("svc-a", "prod", 10, 0)
			.await
			.unwrap();
		assert_eq!(page.total, 3);
		let versions: Vec<i64> = page.entries.iter().map(|e| e.configuration.version).collect();
		assert_eq!(versions, vec![3, 2, 1]);
		assert_eq!(
			page.entries[2].audit.as_ref().map(|a| a.action),
			Some(AuditAction::Create)
		);
		assert_eq!(
			page.entries[0].audit.as_ref().map(|a| a.action),
			Some(AuditAction::Update)
		);
	}

	#[tokio::test]
	async fn test_rejects_bad_names() {
		let h = harness().await;
		let result = h
			.store
			.update_configuration("svc:a", "prod", blob(json!({})), UpdateOptions::default())
			.await;
		assert!(matches!(
			result,
			Err(ConfigurationError::InvalidName { field: "service", .. })
		));
	}

	#[tokio::test]
	async fn test_concurrent_writes_get_distinct_versions() {
		let h = harness().await;
		let store = Arc::new(h.store);
		let mut handles = Vec::new();
		for i in 0..5 {
			let store = Arc::clone(&store);
			handles.push(tokio::spawn(async move {
				store
					.update_configuration(
						"svc-a",
						"prod",
						ConfigBlob::new(json!({"writer": i})),
						UpdateOptions::default(),
					)
					.await
					.unwrap()
					.version
			}));
		}

		let mut versions = Vec::new();
		for handle in handles {
			versions.push(handle.await.unwrap());
		}
		versions.sort();
		assert_eq!(versions, vec![1, 2, 3, 4, 5]);
	}
}
