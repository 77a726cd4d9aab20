// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use beacon_server_audit::AuditLogEntry;
use beacon_server_db::{insert_audit_entry, parse_timestamp, parse_uuid, DbError};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::instrument;
use uuid::Uuid;

use crate::encryption::EncryptedValue;
use crate::error::Result;
use crate::types::StoredSecret;

#[async_trait]
pub trait SecretsRepository: Send + Sync {
	/// Insert or replace the secret for `(configuration_id, key)` and return
	/// the stored row. Id, creation time and access stats of an existing row
	/// are kept.
	async fn upsert_secret(&self, secret: &StoredSecret, audit: &AuditLogEntry)
		-> Result<StoredSecret>;
	async fn get_secret(&self, configuration_id: &str, key: &str) -> Result<Option<StoredSecret>>;
	async fn list_for_configuration(&self, configuration_id: &str) -> Result<Vec<StoredSecret>>;
	async fn delete_secret(
		&self,
		configuration_id: &str,
		key: &str,
		audit: &AuditLogEntry,
	) -> Result<bool>;
	async fn delete_by_id(&self, id: Uuid) -> Result<bool>;
	async fn record_access(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;

	/// Rows encrypted with a key version below `version`, ordered by id and
	/// starting after `after_id`.
	async fn list_below_version(
		&self,
		version: u32,
		after_id: &str,
		limit: i64,
	) -> Result<Vec<StoredSecret>>;
	async fn count_below_version(&self, version: u32) -> Result<i64>;

	/// Replace the ciphertext of one row, but only while it is still at
	/// `expected_version`. Returns whether the row was updated.
	async fn update_encryption(
		&self,
		id: Uuid,
		expected_version: u32,
		encrypted: &EncryptedValue,
		new_version: u32,
	) -> Result<bool>;

	async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

#[derive(Clone)]
pub struct SqliteSecretsRepository {
	pool: SqlitePool,
}

impl SqliteSecretsRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}
}

const SECRET_COLUMNS: &str = "id, configuration_id, key, encrypted_value, iv, auth_tag, key_version, \
                              description, expires_at, access_count, last_accessed_at, created_at, \
                              updated_at";

#[async_trait]
impl SecretsRepository for SqliteSecretsRepository {
	#[instrument(skip(self, secret, audit), fields(configuration_id = %secret.configuration_id, key = %secret.key))]
	async fn upsert_secret(
		&self,
		secret: &StoredSecret,
		audit: &AuditLogEntry,
	) -> Result<StoredSecret> {
		let mut tx = self.pool.begin().await?;

		sqlx::query(
			r#"
			INSERT INTO secrets (id, configuration_id, key, encrypted_value, iv, auth_tag,
			                     key_version, description, expires_at, access_count,
			                     last_accessed_at, created_at, updated_at)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, NULL, ?, ?)
			ON CONFLICT (configuration_id, key) DO UPDATE SET
				encrypted_value = excluded.encrypted_value,
				iv = excluded.iv,
				auth_tag = excluded.auth_tag,
				key_version = excluded.key_version,
				description = excluded.description,
				expires_at = excluded.expires_at,
				updated_at = excluded.updated_at
			"#,
		)
		.bind(secret.id.to_string())
		.bind(&secret.configuration_id)
		.bind(&secret.key)
		.bind(&secret.encrypted.ciphertext)
		.bind(&secret.encrypted.iv)
		.bind(&secret.encrypted.auth_tag)
		.bind(i64::from(secret.key_version))
		.bind(&secret.description)
		.bind(secret.expires_at.map(|at| at.to_rfc3339()))
		.bind(secret.created_at.to_rfc3339())
		.bind(secret.updated_at.to_rfc3339())
		.execute(&mut *tx)
		.await?;

		let row = sqlx::query_as::<_, SecretRow>(&format!(
			"SELECT {SECRET_COLUMNS} FROM secrets WHERE configuration_id = ? AND key = ?"
		))
		.bind(&secret.configuration_id)
		.bind(&secret.key)
		.fetch_one(&mut *tx)
		.await?;

		insert_audit_entry(&mut *tx, audit).await?;
		tx.commit().await?;

		row.try_into()
	}

	#[instrument(skip(self))]
	async fn get_secret(&self, configuration_id: &str, key: &str) -> Result<Option<StoredSecret>> {
		let row = sqlx::query_as::<_, SecretRow>(&format!(
			"SELECT {SECRET_COLUMNS} FROM secrets WHERE configuration_id = ? AND key = ?"
		))
		.bind(configuration_id)
		.bind(key)
		.fetch_optional(&self.pool)
		.await?;

		row.map(TryInto::try_into).transpose()
	}

	#[instrument(skip(self))]
	async fn list_for_configuration(&self, configuration_id: &str) -> Result<Vec<StoredSecret>> {
		let rows = sqlx::query_as::<_, SecretRow>(&format!(
			"SELECT {SECRET_COLUMNS} FROM secrets WHERE configuration_id = ? ORDER BY key ASC"
		))
		.bind(configuration_id)
		.fetch_all(&self.pool)
		.await?;

		rows.into_iter().map(TryInto::try_into).collect()
	}

	#[instrument(skip(self, audit))]
	async fn delete_secret(
		&self,
		configuration_id: &str,
		key: &str,
		audit: &AuditLogEntry,
	) -> Result<bool> {
		let mut tx = self.pool.begin().await?;

		let result = sqlx::query("DELETE FROM secrets WHERE configuration_id = ? AND key = ?")
			.bind(configuration_id)
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

	#[instrument(skip(self), fields(secret_id = %id))]
	async fn delete_by_id(&self, id: Uuid) -> Result<bool> {
		let result = sqlx::query("DELETE FROM secrets WHERE id = ?")
			.bind(id.to_string())
			.execute(&self.pool)
			.await?;
		Ok(result.rows_affected() > 0)
	}

	#[instrument(skip(self), fields(secret_id = %id))]
	async fn record_access(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
		sqlx::query(
			"UPDATE secrets SET access_count = access_count + 1, last_accessed_at = ? WHERE id = ?",
		)
		.bind(at.to_rfc3339())
		.bind(id.to_string())
		.execute(&self.pool)
		.await?;
		Ok(())
	}

	#[instrument(skip(self))]
	async fn list_below_version(
		&self,
		version: u32,
		after_id: &str,
		limit: i64,
	) -> Result<Vec<StoredSecret>> {
		let rows = sqlx::query_as::<_, SecretRow>(&format!(
			"SELECT {SECRET_COLUMNS} FROM secrets WHERE key_version < ? AND id > ? \
			 ORDER BY id ASC LIMIT ?"
		))
		.bind(i64::from(version))
		.bind(after_id)
		.bind(limit.max(1))
		.fetch_all(&self.pool)
		.await?;

		rows.into_iter().map(TryInto::try_into).collect()
	}

	#[instrument(skip(self))]
	async fn count_below_version(&self, version: u32) -> Result<i64> {
		let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM secrets WHERE key_version < ?")
			.bind(i64::from(version))
			.fetch_one(&self.pool)
			.await?;
		Ok(count)
	}

	#[instrument(skip(self, encrypted), fields(secret_id = %id))]
	async fn update_encryption(
		&self,
		id: Uuid,
		expected_version: u32,
		encrypted: &EncryptedValue,
		new_version: u32,
	) -> Result<bool> {
		let result = sqlx::query(
			r#"
			UPDATE secrets
			SET encrypted_value = ?, iv = ?, auth_tag = ?, key_version = ?, updated_at = ?
			WHERE id = ? AND key_version = ?
			"#,
		)
		.bind(&encrypted.ciphertext)
		.bind(&encrypted.iv)
		.bind(&encrypted.auth_tag)
		.bind(i64::from(new_version))
		.bind(Utc::now().to_rfc3339())
		.bind(id.to_string())
		.bind(i64::from(expected_version))
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected() > 0)
	}

	#[instrument(skip(self))]
	async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
		// RFC 3339 text in UTC compares chronologically.
		let result =
			sqlx::query("DELETE FROM secrets WHERE expires_at IS NOT NULL AND expires_at <= ?")
				.bind(now.to_rfc3339())
				.execute(&self.pool)
				.await?;
		Ok(result.rows_affected())
	}
}

#[derive(sqlx::FromRow)]
struct SecretRow {
	id: String,
	configuration_id: String,
	key: String,
	encrypted_value: String,
	iv: String,
	auth_tag: String,
	key_version: i64,
	description: Option<String>,
	expires_at: Option<String>,
	access_count: i64,
	last_accessed_at: Option<String>,
	created_at: String,
	updated_at: String,
}

impl TryFrom<SecretRow> for StoredSecret {
	type Error = crate::error::SecretsError;

	fn try_from(row: SecretRow) -> Result<Self> {
		let key_version = u32::try_from(row.key_version)
			.map_err(|_| DbError::Internal(format!("Invalid key version {}", row.key_version)))?;

		Ok(StoredSecret {
			id: parse_uuid(&row.id)?,
			configuration_id: row.configuration_id,
			key: row.key,
			encrypted: EncryptedValue {
				ciphertext: row.encrypted_value,
				iv: row.iv,
				auth_tag: row.auth_tag,
			},
			key_version,
			description: row.description,
			expires_at: row.expires_at.as_deref().map(parse_timestamp).transpose()?,
			access_count: row.access_count,
			last_accessed_at: row
				.last_accessed_at
				.as_deref()
				.map(parse_timestamp)
				.transpose()?,
			created_at: parse_timestamp(&row.created_at)?,
			updated_at: parse_timestamp(&row.updated_at)?,
		})
	}
}
