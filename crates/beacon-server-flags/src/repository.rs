// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::BTreeMap;

use async_trait::async_trait;
use beacon_flags_core::{
	EvaluationContext, EvaluationReason, EvaluationResult, FeatureFlag, Rollout, Variant,
};
use beacon_server_audit::AuditLogEntry;
use beacon_server_db::{insert_audit_entry, parse_json_column, parse_timestamp, parse_uuid};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use tracing::instrument;
use uuid::Uuid;

use crate::error::{FlagsServerError, Result};

/// One evaluation as kept for analytics. The stable id is stored hashed.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationRecord {
	pub id: Uuid,
	pub flag_key: String,
	pub enabled: bool,
	pub variant: Option<String>,
	pub reason: EvaluationReason,
	pub stable_id_hash: String,
	pub environment: String,
	pub evaluated_at: DateTime<Utc>,
}

impl EvaluationRecord {
	pub fn new(result: &EvaluationResult, context: &EvaluationContext) -> Self {
		Self {
			id: Uuid::new_v4(),
			flag_key: result.flag_key.clone(),
			enabled: result.enabled,
			variant: result.variant.clone(),
			reason: result.reason,
			stable_id_hash: hash_stable_id(context.stable_id()),
			environment: context.environment.clone(),
			evaluated_at: Utc::now(),
		}
	}
}

/// SHA-256 hex digest of a stable id.
pub fn hash_stable_id(stable_id: &str) -> String {
	hex::encode(Sha256::digest(stable_id.as_bytes()))
}

/// Evaluation counts for one flag.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationStats {
	pub flag_key: String,
	pub total: i64,
	pub enabled: i64,
	pub by_reason: BTreeMap<String, i64>,
	pub last_evaluated_at: Option<DateTime<Utc>>,
}

/// Repository trait for feature flag operations.
///
/// Mutations take the audit entry describing them so the flag row and
/// its audit row commit together.
#[async_trait]
pub trait FlagsRepository: Send + Sync {
	/// Fails with [`FlagsServerError::Conflict`] when the key is taken.
	async fn create_flag(&self, flag: &FeatureFlag, audit: &AuditLogEntry) -> Result<()>;
	/// Returns `false` (and writes nothing) when no flag has this key.
	async fn update_flag(&self, flag: &FeatureFlag, audit: &AuditLogEntry) -> Result<bool>;
	async fn delete_flag(&self, key: &str, audit: &AuditLogEntry) -> Result<bool>;
	async fn get_flag_by_key(&self, key: &str) -> Result<Option<FeatureFlag>>;
	async fn list_flags(&self) -> Result<Vec<FeatureFlag>>;

	async fn record_evaluation(&self, record: &EvaluationRecord) -> Result<()>;
	async fn evaluation_stats(&self, flag_key: &str) -> Result<EvaluationStats>;
}

/// SQLite implementation of the flags repository.
#[derive(Clone)]
pub struct SqliteFlagsRepository {
	pool: SqlitePool,
}

impl SqliteFlagsRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
	matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl FlagsRepository for SqliteFlagsRepository {
	#[instrument(skip(self, flag, audit), fields(flag_id = %flag.id, flag_key = %flag.key))]
	async fn create_flag(&self, flag: &FeatureFlag, audit: &AuditLogEntry) -> Result<()> {
		let mut tx = self.pool.begin().await?;

		let inserted = sqlx::query(
			r#"
			INSERT INTO feature_flags (id, key, name, description, enabled, environment, rollout,
			                           variants, dependencies, tags, created_at, updated_at,
			                           created_by, updated_by)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(flag.id.to_string())
		.bind(&flag.key)
		.bind(&flag.name)
		.bind(&flag.description)
		.bind(flag.enabled)
		.bind(&flag.environment)
		.bind(serde_json::to_string(&flag.rollout)?)
		.bind(serde_json::to_string(&flag.variants)?)
		.bind(serde_json::to_string(&flag.dependencies)?)
		.bind(serde_json::to_string(&flag.tags)?)
		.bind(flag.created_at.to_rfc3339())
		.bind(flag.updated_at.to_rfc3339())
		.bind(&flag.created_by)
		.bind(&flag.updated_by)
		.execute(&mut *tx)
		.await;

		match inserted {
			Ok(_) => {}
			Err(e) if is_unique_violation(&e) => {
				return Err(FlagsServerError::Conflict(flag.key.clone()));
			}
			Err(e) => return Err(e.into()),
		}

		insert_audit_entry(&mut *tx, audit).await?;
		tx.commit().await?;
		Ok(())
	}

	#[instrument(skip(self, flag, audit), fields(flag_key = %flag.key))]
	async fn update_flag(&self, flag: &FeatureFlag, audit: &AuditLogEntry) -> Result<bool> {
		let mut tx = self.pool.begin().await?;

		let result = sqlx::query(
			r#"
			UPDATE feature_flags
			SET name = ?, description = ?, enabled = ?, environment = ?, rollout = ?,
			    variants = ?, dependencies = ?, tags = ?, updated_at = ?, updated_by = ?
			WHERE key = ?
			"#,
		)
		.bind(&flag.name)
		.bind(&flag.description)
		.bind(flag.enabled)
		.bind(&flag.environment)
		.bind(serde_json::to_string(&flag.rollout)?)
		.bind(serde_json::to_string(&flag.variants)?)
		.bind(serde_json::to_string(&flag.dependencies)?)
		.bind(serde_json::to_string(&flag.tags)?)
		.bind(flag.updated_at.to_rfc3339())
		.bind(&flag.updated_by)
		.bind(&flag.key)
		.execute(&mut *tx)
		.await?;

		if result.rows_affected() == 0 {
			return Ok(false);
		}

		insert_audit_entry(&mut *tx, audit).await?;
		tx.commit().await?;
		Ok(true)
	}

	#[instrument(skip(self, audit))]
	async fn delete_flag(&self, key: &str, audit: &AuditLogEntry) -> Result<bool> {
		let mut tx = self.pool.begin().await?;

		let result = sqlx::query("DELETE FROM feature_flags WHERE key = ?")
			.bind(key)
			.execute(&mut *tx)
			.await?;

		if result.rows_affected() == 0 {
			return Ok(false);
		}

		insert_audit_entry(&mut *tx, audit).await?;
		tx.commit().await?;
		Ok(true)
	}

	#[instrument(skip(self))]
	async fn get_flag_by_key(&self, key: &str) -> Result<Option<FeatureFlag>> {
		let row = sqlx::query_as::<_, FlagRow>(&format!(
			"SELECT {FLAG_COLUMNS} FROM feature_flags WHERE key = ?"
		))
		.bind(key)
		.fetch_optional(&self.pool)
		.await?;

		row.map(TryInto::try_into).transpose()
	}

	#[instrument(skip(self))]
	async fn list_flags(&self) -> Result<Vec<FeatureFlag>> {
		let rows = sqlx::query_as::<_, FlagRow>(&format!(
			"SELECT {FLAG_COLUMNS} FROM feature_flags ORDER BY key ASC"
		))
		.fetch_all(&self.pool)
		.await?;

		rows.into_iter().map(TryInto::try_into).collect()
	}

	#[instrument(skip(self, record), fields(flag_key = %record.flag_key))]
	async fn record_evaluation(&self, record: &EvaluationRecord) -> Result<()> {
		sqlx::query(
			r#"
			INSERT INTO flag_evaluations (id, flag_key, enabled, variant, reason,
			                              stable_id_hash, environment, evaluated_at)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(record.id.to_string())
		.bind(&record.flag_key)
		.bind(record.enabled)
		.bind(&record.variant)
		.bind(record.reason.as_str())
		.bind(&record.stable_id_hash)
		.bind(&record.environment)
		.bind(record.evaluated_at.to_rfc3339())
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[instrument(skip(self))]
	async fn evaluation_stats(&self, flag_key: &str) -> Result<EvaluationStats> {
		let rows = sqlx::query(
			r#"
			SELECT reason, COUNT(*) AS cnt, SUM(enabled) AS enabled_cnt, MAX(evaluated_at) AS last_at
			FROM flag_evaluations
			WHERE flag_key = ?
			GROUP BY reason
			"#,
		)
		.bind(flag_key)
		.fetch_all(&self.pool)
		.await?;

		let mut stats = EvaluationStats {
			flag_key: flag_key.to_string(),
			..Default::default()
		};
		for row in rows {
			let reason: String = row.get("reason");
			let count: i64 = row.get("cnt");
			let enabled: Option<i64> = row.get("enabled_cnt");
			let last_at: Option<String> = row.get("last_at");

			stats.total += count;
			stats.enabled += enabled.unwrap_or(0);
			stats.by_reason.insert(reason, count);
			if let Some(last_at) = last_at {
				let last_at = parse_timestamp(&last_at)?;
				if stats.last_evaluated_at.map_or(true, |prev| last_at > prev) {
					stats.last_evaluated_at = Some(last_at);
				}
			}
		}
		Ok(stats)
	}
}

const FLAG_COLUMNS: &str = "id, key, name, description, enabled, environment, rollout, variants, \
                            dependencies, tags, created_at, updated_at, created_by, updated_by";

#[derive(sqlx::FromRow)]
struct FlagRow {
	id: String,
	key: String,
	name: String,
	description: Option<String>,
	enabled: i64,
	environment: Option<String>,
	rollout: String,
	variants: String,
	dependencies: String,
	tags: String,
	created_at: String,
	updated_at: String,
	created_by: Option<String>,
	updated_by: Option<String>,
}

impl TryFrom<FlagRow> for FeatureFlag {
	type Error = FlagsServerError;

	fn try_from(row: FlagRow) -> Result<Self> {
		Ok(FeatureFlag {
			id: parse_uuid(&row.id)?,
			key: row.key,
			name: row.name,
			description: row.description,
			enabled: row.enabled != 0,
			environment: row.environment,
			rollout: parse_json_column::<Rollout>(&row.rollout)?,
			variants: parse_json_column::<Vec<Variant>>(&row.variants)?,
			dependencies: parse_json_column(&row.dependencies)?,
			tags: parse_json_column(&row.tags)?,
			created_at: parse_timestamp(&row.created_at)?,
			updated_at: parse_timestamp(&row.updated_at)?,
			created_by: row.created_by,
			updated_by: row.updated_by,
		})
	}
}
