// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Audit log persistence.
//!
//! Writers that need the audit row to commit atomically with their own
//! mutation call [`insert_audit_entry`] with their transaction; everything
//! else goes through [`AuditRepository`].

use async_trait::async_trait;
use beacon_server_audit::{AuditLogEntry, AuditResourceType};
use sqlx::sqlite::{Sqlite, SqlitePool};
use sqlx::Row;

use crate::error::{DbError, Result};
use crate::util::{parse_timestamp, parse_uuid};

#[async_trait]
pub trait AuditRepository: Send + Sync {
	async fn append(&self, entry: &AuditLogEntry) -> Result<()>;

	/// Entries for one resource, newest first.
	async fn list_for_resource(
		&self,
		resource_type: AuditResourceType,
		resource_id: &str,
		limit: i64,
		offset: i64,
	) -> Result<Vec<AuditLogEntry>>;

	async fn latest_for_resource(
		&self,
		resource_type: AuditResourceType,
		resource_id: &str,
	) -> Result<Option<AuditLogEntry>>;

	/// Entries across resources, newest first, with the total match count.
	async fn query(
		&self,
		resource_type: Option<AuditResourceType>,
		limit: i64,
		offset: i64,
	) -> Result<(Vec<AuditLogEntry>, i64)>;
}

/// Insert an audit entry using any executor, including an open transaction.
pub async fn insert_audit_entry<'e, E>(executor: E, entry: &AuditLogEntry) -> Result<()>
where
	E: sqlx::Executor<'e, Database = Sqlite>,
{
	let previous_value = entry
		.previous_value
		.as_ref()
		.map(serde_json::to_string)
		.transpose()?;
	let new_value = entry
		.new_value
		.as_ref()
		.map(serde_json::to_string)
		.transpose()?;
	let diff = entry.diff.as_ref().map(serde_json::to_string).transpose()?;

	sqlx::query(
		r#"
		INSERT INTO audit_logs (id, resource_type, resource_id, action, previous_value,
		                        new_value, diff, environment, timestamp, performed_by)
		VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
		"#,
	)
	.bind(entry.id.to_string())
	.bind(entry.resource_type.as_str())
	.bind(&entry.resource_id)
	.bind(entry.action.as_str())
	.bind(previous_value)
	.bind(new_value)
	.bind(diff)
	.bind(&entry.environment)
	.bind(entry.timestamp.to_rfc3339())
	.bind(&entry.performed_by)
	.execute(executor)
	.await?;

	Ok(())
}

#[derive(Debug, sqlx::FromRow)]
struct AuditRow {
	id: String,
	resource_type: String,
	resource_id: String,
	action: String,
	previous_value: Option<String>,
	new_value: Option<String>,
	diff: Option<String>,
	environment: Option<String>,
	timestamp: String,
	performed_by: Option<String>,
}

impl TryFrom<AuditRow> for AuditLogEntry {
	type Error = DbError;

	fn try_from(row: AuditRow) -> Result<Self> {
		let parse_value = |v: Option<String>| -> Result<Option<serde_json::Value>> {
			Ok(v.map(|s| serde_json::from_str(&s)).transpose()?)
		};

		Ok(AuditLogEntry {
			id: parse_uuid(&row.id)?,
			resource_type: row
				.resource_type
				.parse()
				.map_err(|e: beacon_server_audit::AuditError| DbError::Internal(e.to_string()))?,
			resource_id: row.resource_id,
			action: row
				.action
				.parse()
				.map_err(|e: beacon_server_audit::AuditError| DbError::Internal(e.to_string()))?,
			previous_value: parse_value(row.previous_value)?,
			new_value: parse_value(row.new_value)?,
			diff: parse_value(row.diff)?,
			environment: row.environment,
			timestamp: parse_timestamp(&row.timestamp)?,
			performed_by: row.performed_by,
		})
	}
}

const SELECT_COLUMNS: &str = "id, resource_type, resource_id, action, previous_value, new_value, \
                              diff, environment, timestamp, performed_by";

#[derive(Clone)]
pub struct SqliteAuditRepository {
	pool: SqlitePool,
}

impl SqliteAuditRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}
}

#[async_trait]
impl AuditRepository for SqliteAuditRepository {
	#[tracing::instrument(skip(self, entry), fields(resource_type = %entry.resource_type, resource_id = %entry.resource_id))]
	async fn append(&self, entry: &AuditLogEntry) -> Result<()> {
		insert_audit_entry(&self.pool, entry).await
	}

	#[tracing::instrument(skip(self))]
	async fn list_for_resource(
		&self,
		resource_type: AuditResourceType,
		resource_id: &str,
		limit: i64,
		offset: i64,
	) -> Result<Vec<AuditLogEntry>> {
		let sql = format!(
			"SELECT {SELECT_COLUMNS} FROM audit_logs WHERE resource_type = ? AND resource_id = ? \
			 ORDER BY timestamp DESC, rowid DESC LIMIT ? OFFSET ?"
		);
		let rows: Vec<AuditRow> = sqlx::query_as(&sql)
			.bind(resource_type.as_str())
			.bind(resource_id)
			.bind(limit.clamp(1, 1000))
			.bind(offset.max(0))
			.fetch_all(&self.pool)
			.await?;

		rows.into_iter().map(AuditLogEntry::try_from).collect()
	}

	#[tracing::instrument(skip(self))]
	async fn latest_for_resource(
		&self,
		resource_type: AuditResourceType,
		resource_id: &str,
	) -> Result<Option<AuditLogEntry>> {
		let mut entries = self
			.list_for_resource(resource_type, resource_id, 1, 0)
			.await?;
		Ok(entries.pop())
	}

	#[tracing::instrument(skip(self))]
	async fn query(
		&self,
		resource_type: Option<AuditResourceType>,
		limit: i64,
		offset: i64,
	) -> Result<(Vec<AuditLogEntry>, i64)> {
		let where_clause = if resource_type.is_some() {
			"WHERE resource_type = ?"
		} else {
			""
		};

		let count_sql = format!("SELECT COUNT(*) as cnt FROM audit_logs {where_clause}");
		let mut count_query = sqlx::query(&count_sql);
		if let Some(rt) = resource_type {
			count_query = count_query.bind(rt.as_str());
		}
		let total: i64 = count_query.fetch_one(&self.pool).await?.get("cnt");

		let data_sql = format!(
			"SELECT {SELECT_COLUMNS} FROM audit_logs {where_clause} \
			 ORDER BY timestamp DESC, rowid DESC LIMIT ? OFFSET ?"
		);
		let mut data_query = sqlx::query_as::<_, AuditRow>(&data_sql);
		if let Some(rt) = resource_type {
			data_query = data_query.bind(rt.as_str());
		}
		let rows = data_query
			.bind(limit.clamp(1, 1000))
			.bind(offset.max(0))
			.fetch_all(&self.pool)
			.await?;

		let entries = rows
			.into_iter()
			.map(AuditLogEntry::try_from)
			.collect::<Result<Vec<_>>>()?;
		Ok((entries, total))
	}
}
