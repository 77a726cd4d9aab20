// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use beacon_server_audit::{AuditAction, AuditLogEntry, AuditResourceType};
use beacon_server_db::{bool_to_int, insert_audit_entry, parse_json_column, parse_timestamp, parse_uuid};
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::instrument;
use uuid::Uuid;

use crate::error::{ConfigurationError, Result};
use crate::types::{Configuration, ConfigurationDraft, ServiceInput, ServiceRegistration};

#[async_trait]
pub trait ConfigurationRepository: Send + Sync {
	async fn get_active(&self, service_name: &str, environment: &str)
		-> Result<Option<Configuration>>;
	async fn get_version(
		&self,
		service_name: &str,
		environment: &str,
		version: i64,
	) -> Result<Option<Configuration>>;

	/// Insert the next version as the active one and audit it, atomically.
	///
	/// With `expected_version` set the write fails with
	/// [`ConfigurationError::VersionConflict`] unless that is the current
	/// active version (0 for none).
	async fn create_version(
		&self,
		draft: &ConfigurationDraft,
		expected_version: Option<i64>,
	) -> Result<Configuration>;

	/// Versions newest first, with the total count.
	async fn list_versions(
		&self,
		service_name: &str,
		environment: &str,
		limit: i64,
		offset: i64,
	) -> Result<(Vec<Configuration>, i64)>;
	async fn list_environments(&self, service_name: &str) -> Result<Vec<String>>;

	async fn upsert_service(&self, input: &ServiceInput) -> Result<ServiceRegistration>;
	async fn get_service(&self, name: &str) -> Result<Option<ServiceRegistration>>;
	async fn list_services(&self) -> Result<Vec<ServiceRegistration>>;
}

#[derive(Clone)]
pub struct SqliteConfigurationRepository {
	pool: SqlitePool,
}

impl SqliteConfigurationRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}
}

const CONFIG_COLUMNS: &str = "id, service_name, environment, version, config, description, tags, \
                              is_active, is_valid, validation_errors, created_at, updated_at, \
                              created_by, updated_by";

const SERVICE_COLUMNS: &str =
	"name, description, required_keys, optional_keys, endpoints, strict, created_at, updated_at";

#[async_trait]
impl ConfigurationRepository for SqliteConfigurationRepository {
	#[instrument(skip(self))]
	async fn get_active(
		&self,
		service_name: &str,
		environment: &str,
	) -> Result<Option<Configuration>> {
		let row = sqlx::query_as::<_, ConfigurationRow>(&format!(
			"SELECT {CONFIG_COLUMNS} FROM configurations \
			 WHERE service_name = ? AND environment = ? AND is_active = 1"
		))
		.bind(service_name)
		.bind(environment)
		.fetch_optional(&self.pool)
		.await?;

		row.map(TryInto::try_into).transpose()
	}

	#[instrument(skip(self))]
	async fn get_version(
		&self,
		service_name: &str,
		environment: &str,
		version: i64,
	) -> Result<Option<Configuration>> {
		let row = sqlx::query_as::<_, ConfigurationRow>(&format!(
			"SELECT {CONFIG_COLUMNS} FROM configurations \
			 WHERE service_name = ? AND environment = ? AND version = ?"
		))
		.bind(service_name)
		.bind(environment)
		.bind(version)
		.fetch_optional(&self.pool)
		.await?;

		row.map(TryInto::try_into).transpose()
	}

	#[instrument(skip(self, draft), fields(service_name = %draft.service_name, environment = %draft.environment))]
	async fn create_version(
		&self,
		draft: &ConfigurationDraft,
		expected_version: Option<i64>,
	) -> Result<Configuration> {
		let now = Utc::now();
		let mut tx = self.pool.begin().await?;

		// Writing first takes the database write lock, so concurrent writers
		// to the same pair run one after the other.
		let previous = sqlx::query_as::<_, ConfigurationRow>(&format!(
			"UPDATE configurations SET is_active = 0, updated_at = ? \
			 WHERE service_name = ? AND environment = ? AND is_active = 1 \
			 RETURNING {CONFIG_COLUMNS}"
		))
		.bind(now.to_rfc3339())
		.bind(&draft.service_name)
		.bind(&draft.environment)
		.fetch_optional(&mut *tx)
		.await?
		.map(Configuration::try_from)
		.transpose()?;

		if let Some(expected) = expected_version {
			let actual = previous.as_ref().map_or(0, |p| p.version);
			if actual != expected {
				return Err(ConfigurationError::VersionConflict { expected, actual });
			}
		}

		let version: i64 = sqlx::query_scalar(
			"SELECT COALESCE(MAX(version), 0) + 1 FROM configurations \
			 WHERE service_name = ? AND environment = ?",
		)
		.bind(&draft.service_name)
		.bind(&draft.environment)
		.fetch_one(&mut *tx)
		.await?;

		let configuration = Configuration {
			id: Uuid::new_v4(),
			service_name: draft.service_name.clone(),
			environment: draft.environment.clone(),
			version,
			config: draft.config.clone(),
			description: draft.description.clone(),
			tags: draft.tags.clone(),
			is_active: true,
			is_valid: draft.is_valid,
			validation_errors: draft.validation_errors.clone(),
			created_at: now,
			updated_at: now,
			created_by: draft.updated_by.clone(),
			updated_by: draft.updated_by.clone(),
		};

		sqlx::query(
			r#"
			INSERT INTO configurations (id, service_name, environment, version, config, description,
			                            tags, is_active, is_valid, validation_errors, created_at,
			                            updated_at, created_by, updated_by)
			VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(configuration.id.to_string())
		.bind(&configuration.service_name)
		.bind(&configuration.environment)
		.bind(configuration.version)
		.bind(serde_json::to_string(&configuration.config)?)
		.bind(&configuration.description)
		.bind(serde_json::to_string(&configuration.tags)?)
		.bind(bool_to_int(configuration.is_valid))
		.bind(
			configuration
				.validation_errors
				.as_ref()
				.map(serde_json::to_string)
				.transpose()?,
		)
		.bind(now.to_rfc3339())
		.bind(now.to_rfc3339())
		.bind(&configuration.created_by)
		.bind(&configuration.updated_by)
		.execute(&mut *tx)
		.await?;

		let action = if previous.is_some() {
			AuditAction::Update
		} else {
			AuditAction::Create
		};
		let mut audit = AuditLogEntry::builder(
			AuditResourceType::Configuration,
			configuration.id.to_string(),
			action,
		)
		.new_value(configuration.config.clone())
		.environment(&configuration.environment)
		.performed_by(configuration.updated_by.clone());
		if let Some(previous) = &previous {
			audit = audit.previous_value(previous.config.clone());
		}
		insert_audit_entry(&mut *tx, &audit.build()).await?;

		tx.commit().await?;
		Ok(configuration)
	}

	#[instrument(skip(self))]
	async fn list_versions(
		&self,
		service_name: &str,
		environment: &str,
		limit: i64,
		offset: i64,
	) -> Result<(Vec<Configuration>, i64)> {
		let total: i64 = sqlx::query_scalar(
			"SELECT COUNT(*) FROM configurations WHERE service_name = ? AND environment = ?",
		)
		.bind(service_name)
		.bind(environment)
		.fetch_one(&self.pool)
		.await?;

		let rows = sqlx::query_as::<_, ConfigurationRow>(&format!(
			"SELECT {CONFIG_COLUMNS} FROM configurations \
			 WHERE service_name = ? AND environment = ? \
			 ORDER BY version DESC LIMIT ? OFFSET ?"
		))
		.bind(service_name)
		.bind(environment)
		.bind(limit.clamp(1, 1000))
		.bind(offset.max(0))
		.fetch_all(&self.pool)
		.await?;

		let versions = rows
			.into_iter()
			.map(Configuration::try_from)
			.collect::<Result<Vec<_>>>()?;
		Ok((versions, total))
	}

	#[instrument(skip(self))]
	async fn list_environments(&self, service_name: &str) -> Result<Vec<String>> {
		let environments = sqlx::query_scalar(
			"SELECT DISTINCT environment FROM configurations WHERE service_name = ? \
			 ORDER BY environment ASC",
		)
		.bind(service_name)
		.fetch_all(&self.pool)
		.await?;
		Ok(environments)
	}

	#[instrument(skip(self, input), fields(service_name = %input.name))]
	async fn upsert_service(&self, input: &ServiceInput) -> Result<ServiceRegistration> {
		let now = Utc::now().to_rfc3339();
		sqlx::query(
			r#"
			INSERT INTO services (name, description, required_keys, optional_keys, endpoints,
			                      strict, created_at, updated_at)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?)
			ON CONFLICT (name) DO UPDATE SET
				description = excluded.description,
				required_keys = excluded.required_keys,
				optional_keys = excluded.optional_keys,
				endpoints = excluded.endpoints,
				strict = excluded.strict,
				updated_at = excluded.updated_at
			"#,
		)
		.bind(&input.name)
		.bind(&input.description)
		.bind(serde_json::to_string(&input.required_keys)?)
		.bind(serde_json::to_string(&input.optional_keys)?)
		.bind(serde_json::to_string(&input.endpoints)?)
		.bind(bool_to_int(input.strict))
		.bind(&now)
		.bind(&now)
		.execute(&self.pool)
		.await?;

		self.get_service(&input.name)
			.await?
			.ok_or_else(|| ConfigurationError::NotFound(input.name.clone()))
	}

	#[instrument(skip(self))]
	async fn get_service(&self, name: &str) -> Result<Option<ServiceRegistration>> {
		let row = sqlx::query_as::<_, ServiceRow>(&format!(
			"SELECT {SERVICE_COLUMNS} FROM services WHERE name = ?"
		))
		.bind(name)
		.fetch_optional(&self.pool)
		.await?;

		row.map(TryInto::try_into).transpose()
	}

	#[instrument(skip(self))]
	async fn list_services(&self) -> Result<Vec<ServiceRegistration>> {
		let rows = sqlx::query_as::<_, ServiceRow>(&format!(
			"SELECT {SERVICE_COLUMNS} FROM services ORDER BY name ASC"
		))
		.fetch_all(&self.pool)
		.await?;

		rows.into_iter().map(ServiceRegistration::try_from).collect()
	}
}

#[derive(sqlx::FromRow)]
struct ConfigurationRow {
	id: String,
	service_name: String,
	environment: String,
	version: i64,
	config: String,
	description: Option<String>,
	tags: String,
	is_active: i64,
	is_valid: i64,
	validation_errors: Option<String>,
	created_at: String,
	updated_at: String,
	created_by: Option<String>,
	updated_by: Option<String>,
}

impl TryFrom<ConfigurationRow> for Configuration {
	type Error = ConfigurationError;

	fn try_from(row: ConfigurationRow) -> Result<Self> {
		Ok(Configuration {
			id: parse_uuid(&row.id)?,
			service_name: row.service_name,
			environment: row.environment,
			version: row.version,
			config: parse_json_column(&row.config)?,
			description: row.description,
			tags: parse_json_column(&row.tags)?,
			is_active: row.is_active != 0,
			is_valid: row.is_valid != 0,
			validation_errors: row
				.validation_errors
				.as_deref()
				.map(parse_json_column)
				.transpose()?,
			created_at: parse_timestamp(&row.created_at)?,
			updated_at: parse_timestamp(&row.updated_at)?,
			created_by: row.created_by,
			updated_by: row.updated_by,
		})
	}
}

#[derive(sqlx::FromRow)]
struct ServiceRow {
	name: String,
	description: Option<String>,
	required_keys: String,
	optional_keys: String,
	endpoints: String,
	strict: i64,
	created_at: String,
	updated_at: String,
}

impl TryFrom<ServiceRow> for ServiceRegistration {
	type Error = ConfigurationError;

	fn try_from(row: ServiceRow) -> Result<Self> {
		Ok(ServiceRegistration {
			name: row.name,
			description: row.description,
			required_keys: parse_json_column(&row.required_keys)?,
			optional_keys: parse_json_column(&row.optional_keys)?,
			endpoints: parse_json_column(&row.endpoints)?,
			strict: row.strict != 0,
			created_at: parse_timestamp(&row.created_at)?,
			updated_at: parse_timestamp(&row.updated_at)?,
		})
	}
}
