// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use beacon_common_secret::SecretString;
use beacon_server_audit::{AuditAction, AuditLogEntry, AuditResourceType};
use beacon_server_db::AuditRepository;
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::json;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::encryption::{decrypt, derive_key, encrypt, KEY_SIZE};
use crate::error::{Result, SecretsError};
use crate::keyring::KeyRing;
use crate::repository::SecretsRepository;
use crate::types::{
	NewSecret, RotationFailure, RotationReport, SecretMetadata, SecretValue, StoredSecret,
};

const ROTATION_PAGE_SIZE: i64 = 100;
const MAX_KEY_LEN: usize = 255;

/// Encrypted secret storage scoped by configuration id.
pub struct SecretVault {
	repo: Arc<dyn SecretsRepository>,
	audit: Arc<dyn AuditRepository>,
	keys: RwLock<KeyRing>,
	rotating: AtomicBool,
}

fn resource_id(configuration_id: &str, key: &str) -> String {
	format!("{configuration_id}/{key}")
}

impl SecretVault {
	pub fn new(
		repo: Arc<dyn SecretsRepository>,
		audit: Arc<dyn AuditRepository>,
		keys: KeyRing,
	) -> Self {
		Self {
			repo,
			audit,
			keys: RwLock::new(keys),
			rotating: AtomicBool::new(false),
		}
	}

	pub fn current_key_version(&self) -> u32 {
		self.keys.read().current_version()
	}

	fn key(&self, version: u32) -> Result<Zeroizing<[u8; KEY_SIZE]>> {
		self.keys.read().key(version)
	}

	fn current_key(&self) -> Result<(u32, Zeroizing<[u8; KEY_SIZE]>)> {
		let keys = self.keys.read();
		Ok((keys.current_version(), keys.current_key()?))
	}

	fn decrypt_row(&self, row: &StoredSecret) -> Result<SecretValue> {
		let key = self.key(row.key_version)?;
		decrypt(&key, &row.encrypted).map(SecretValue::new)
	}

	/// Encrypt and store one secret, replacing any value under the same key.
	#[instrument(skip(self, secret, performed_by), fields(key = %secret.key))]
	pub async fn store_secret(
		&self,
		configuration_id: &str,
		secret: NewSecret,
		performed_by: Option<String>,
	) -> Result<SecretMetadata> {
		validate_key(&secret.key)?;

		let (version, key) = self.current_key()?;
		let encrypted = encrypt(&key, secret.value.expose())?;
		let now = Utc::now();
		let row = StoredSecret {
			id: Uuid::new_v4(),
			configuration_id: configuration_id.to_string(),
			key: secret.key,
			encrypted,
			key_version: version,
			description: secret.description,
			expires_at: secret.expires_at,
			access_count: 0,
			last_accessed_at: None,
			created_at: now,
			updated_at: now,
		};

		let existing = self.repo.get_secret(configuration_id, &row.key).await?;
		let action = if existing.is_some() {
			AuditAction::Update
		} else {
			AuditAction::Create
		};
		let audit = AuditLogEntry::builder(
			AuditResourceType::Secret,
			resource_id(configuration_id, &row.key),
			action,
		)
		.new_value(json!({
			"key": row.key,
			"keyVersion": version,
			"expiresAt": row.expires_at,
		}))
		.performed_by(performed_by)
		.build();

		let stored = self.repo.upsert_secret(&row, &audit).await?;
		info!(configuration_id, key = %stored.key, key_version = version, "secret stored");
		Ok(stored.metadata())
	}

	/// Decrypt one secret. Expired secrets read as absent and are removed.
	#[instrument(skip(self))]
	pub async fn get_secret(&self, configuration_id: &str, key: &str) -> Result<Option<SecretValue>> {
		let Some(row) = self.repo.get_secret(configuration_id, key).await? else {
			return Ok(None);
		};

		let now = Utc::now();
		if row.is_expired(now) {
			self.repo.delete_by_id(row.id).await?;
			debug!(configuration_id, key, "expired secret removed on read");
			return Ok(None);
		}

		let value = self.decrypt_row(&row)?;
		if let Err(e) = self.repo.record_access(row.id, now).await {
			warn!(configuration_id, key, error = %e, "failed to record secret access");
		}
		Ok(Some(value))
	}

	/// Decrypt every live secret of a configuration. Secrets that fail to
	/// decrypt are logged and left out.
	#[instrument(skip(self))]
	pub async fn get_secrets_with_values(
		&self,
		configuration_id: &str,
	) -> Result<BTreeMap<String, SecretValue>> {
		let now = Utc::now();
		let mut values = BTreeMap::new();

		for row in self.repo.list_for_configuration(configuration_id).await? {
			if row.is_expired(now) {
				if let Err(e) = self.repo.delete_by_id(row.id).await {
					warn!(configuration_id, key = %row.key, error = %e, "failed to remove expired secret");
				}
				continue;
			}
			match self.decrypt_row(&row) {
				Ok(value) => {
					values.insert(row.key, value);
				}
				Err(e) => {
					warn!(configuration_id, key = %row.key, key_version = row.key_version, error = %e, "skipping undecryptable secret");
				}
			}
		}
		Ok(values)
	}

	/// Metadata of live secrets, no values.
	pub async fn list_secrets(&self, configuration_id: &str) -> Result<Vec<SecretMetadata>> {
		let now = Utc::now();
		Ok(self
			.repo
			.list_for_configuration(configuration_id)
			.await?
			.iter()
			.filter(|row| !row.is_expired(now))
			.map(StoredSecret::metadata)
			.collect())
	}

	/// Store every given secret. Keys not present are left alone.
	#[instrument(skip(self, secrets, performed_by), fields(count = secrets.len()))]
	pub async fn update_secrets_for_configuration(
		&self,
		configuration_id: &str,
		secrets: Vec<NewSecret>,
		performed_by: Option<String>,
	) -> Result<usize> {
		for secret in &secrets {
			validate_key(&secret.key)?;
		}
		let mut written = 0;
		for secret in secrets {
			self.store_secret(configuration_id, secret, performed_by.clone())
				.await?;
			written += 1;
		}
		Ok(written)
	}

	#[instrument(skip(self, performed_by))]
	pub async fn delete_secret(
		&self,
		configuration_id: &str,
		key: &str,
		performed_by: Option<String>,
	) -> Result<bool> {
		let audit = AuditLogEntry::builder(
			AuditResourceType::Secret,
			resource_id(configuration_id, key),
			AuditAction::Delete,
		)
		.performed_by(performed_by)
		.build();

		let deleted = self.repo.delete_secret(configuration_id, key, &audit).await?;
		if deleted {
			info!(configuration_id, key, "secret deleted");
		}
		Ok(deleted)
	}

	/// Re-encrypt every secret under a key derived from `new_master_key`.
	///
	/// The new key becomes current before the batch starts and older keys
	/// stay registered, so reads and writes keep working throughout. Each
	/// row is rewritten only after its new ciphertext exists; failures are
	/// collected in the report and the batch can be re-run.
	#[instrument(skip(self, new_master_key, performed_by))]
	pub async fn rotate_encryption_key(
		&self,
		new_master_key: &SecretString,
		performed_by: Option<String>,
	) -> Result<RotationReport> {
		let _guard = RotationGuard::acquire(&self.rotating)?;
		self.run_rotation(new_master_key, performed_by).await
	}

	async fn run_rotation(
		&self,
		new_master_key: &SecretString,
		performed_by: Option<String>,
	) -> Result<RotationReport> {
		let started_at = Utc::now();
		let new_key = derive_key(new_master_key.expose())?;

		let (from_version, to_version) = {
			let mut keys = self.keys.write();
			let from = keys.current_version();
			let to = keys.advance(Zeroizing::new(*new_key));
			(from, to)
		};
		info!(from_version, to_version, "encryption key rotation started");

		let mut report = RotationReport {
			from_version,
			to_version,
			total: 0,
			rotated: 0,
			failed: 0,
			skipped: 0,
			failures: Vec::new(),
			started_at,
			completed_at: started_at,
		};

		let mut after_id = String::new();
		loop {
			let page = self
				.repo
				.list_below_version(to_version, &after_id, ROTATION_PAGE_SIZE)
				.await?;
			let Some(last) = page.last() else {
				break;
			};
			after_id = last.id.to_string();

			for row in &page {
				report.total += 1;
				match self.reencrypt(row, &new_key, to_version).await {
					Ok(true) => report.rotated += 1,
					Ok(false) => report.skipped += 1,
					Err(e) => {
						warn!(secret_id = %row.id, configuration_id = %row.configuration_id, key = %row.key, key_version = row.key_version, error = %e, "secret rotation failed");
						report.failed += 1;
						report.failures.push(RotationFailure {
							secret_id: row.id,
							configuration_id: row.configuration_id.clone(),
							key: row.key.clone(),
							error: e.to_string(),
						});
					}
				}
			}
		}

		report.completed_at = Utc::now();

		let audit = AuditLogEntry::builder(
			AuditResourceType::EncryptionKey,
			to_version.to_string(),
			AuditAction::Rotate,
		)
		.previous_value(json!({ "keyVersion": from_version }))
		.new_value(json!({
			"keyVersion": to_version,
			"total": report.total,
			"rotated": report.rotated,
			"failed": report.failed,
			"skipped": report.skipped,
		}))
		.performed_by(performed_by)
		.build();
		if let Err(e) = self.audit.append(&audit).await {
			warn!(to_version, error = %e, "failed to audit key rotation");
		}

		info!(
			from_version,
			to_version,
			total = report.total,
			rotated = report.rotated,
			failed = report.failed,
			skipped = report.skipped,
			"encryption key rotation finished"
		);
		Ok(report)
	}

	async fn reencrypt(
		&self,
		row: &StoredSecret,
		new_key: &[u8; KEY_SIZE],
		to_version: u32,
	) -> Result<bool> {
		let plaintext = decrypt(&*self.key(row.key_version)?, &row.encrypted)?;
		let encrypted = encrypt(new_key, &plaintext)?;
		self.repo
			.update_encryption(row.id, row.key_version, &encrypted, to_version)
			.await
	}

	/// Number of secrets still encrypted with an older key.
	pub async fn secrets_pending_rotation(&self) -> Result<i64> {
		self.repo
			.count_below_version(self.current_key_version())
			.await
	}

	#[instrument(skip(self))]
	pub async fn cleanup_expired_secrets(&self) -> Result<u64> {
		let removed = self.repo.delete_expired(Utc::now()).await?;
		if removed > 0 {
			info!(removed, "expired secrets removed");
		}
		Ok(removed)
	}
}

/// Clears the rotation flag when the batch ends, including on cancellation.
struct RotationGuard<'a>(&'a AtomicBool);

impl<'a> RotationGuard<'a> {
	fn acquire(flag: &'a AtomicBool) -> Result<Self> {
		flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
			.map(|_| Self(flag))
			.map_err(|_| SecretsError::RotationInProgress)
	}
}

impl Drop for RotationGuard<'_> {
	fn drop(&mut self) {
		self.0.store(false, Ordering::Release);
	}
}

fn validate_key(key: &str) -> Result<()> {
	if key.trim().is_empty() {
		return Err(SecretsError::InvalidSecret("key must not be empty".to_string()));
	}
	if key.len() > MAX_KEY_LEN {
		return Err(SecretsError::InvalidSecret(format!(
			"key longer than {MAX_KEY_LEN} bytes"
		)));
	}
	if key.chars().any(char::is_whitespace) {
		return Err(SecretsError::InvalidSecret(
			"key must not contain whitespace".to_string(),
		));
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::repository::SqliteSecretsRepository;
	use beacon_server_db::testing::create_test_pool;
	use beacon_server_db::SqliteAuditRepository;
	use chrono::Duration;
	use sqlx::SqlitePool;

	async fn vault() -> (SqlitePool, SecretVault) {
		let pool = create_test_pool().await;
		let ring = KeyRing::new(1, &SecretString::new("test-master".to_string())).unwrap();
		let vault = SecretVault::new(
			Arc::new(SqliteSecretsRepository::new(pool.clone())),
			Arc::new(SqliteAuditRepository::new(pool.clone())),
			ring,
		);
		(pool, vault)
	}

	#[tokio::test]
	async fn test_store_and_get() {
		let (pool, vault) = vault().await;
		let meta = vault
			.store_secret("cfg-1", NewSecret::new("API_KEY", "abc123"), None)
			.await
			.unwrap();
		assert_eq!(meta.key_version, 1);

		let value = vault.get_secret("cfg-1", "API_KEY").await.unwrap().unwrap();
		assert_eq!(value.expose(), "abc123");

		let stored: String = sqlx::query_scalar("SELECT encrypted_value FROM secrets")
			.fetch_one(&pool)
			.await
			.unwrap();
		assert!(!stored.contains("abc123"));

		let listed = vault.list_secrets("cfg-1").await.unwrap();
		assert_eq!(listed[0].access_count, 1);
		assert!(listed[0].last_accessed_at.is_some());
	}

	#[tokio::test]
	async fn test_store_replaces_value_and_keeps_id() {
		let (_pool, vault) = vault().await;
		let first = vault
			.store_secret("cfg-1", NewSecret::new("API_KEY", "one"), None)
			.await
			.unwrap();
		let second = vault
			.store_secret("cfg-1", NewSecret::new("API_KEY", "two"), None)
			.await
			.unwrap();
		assert_eq!(first.id, second.id);
		let value = vault.get_secret("cfg-1", "API_KEY").await.unwrap().unwrap();
		assert_eq!(value.expose(), "two");
	}

	#[tokio::test]
	async fn test_expired_secret_is_absent_and_removed() {
		let (pool, vault) = vault().await;
		vault
			.store_secret(
				"cfg-1",
				NewSecret::new("API_KEY", "abc123").with_expires_at(Utc::now() + Duration::seconds(1)),
				None,
			)
			.await
			.unwrap();
		let value = vault.get_secret("cfg-1", "API_KEY").await.unwrap();
		assert_eq!(value.unwrap().expose(), "abc123");

		tokio::time::sleep(std::time::Duration::from_millis(1100)).await;

		assert!(vault.get_secret("cfg-1", "API_KEY").await.unwrap().is_none());
		let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM secrets")
			.fetch_one(&pool)
			.await
			.unwrap();
		assert_eq!(remaining, 0);
	}

	#[tokio::test]
	async fn test_bulk_read_skips_undecryptable() {
		let (pool, vault) = vault().await;
		vault
			.update_secrets_for_configuration(
				"cfg-1",
				vec![NewSecret::new("A", "1"), NewSecret::new("B", "2")],
				None,
			)
			.await
			.unwrap();
		sqlx::query("UPDATE secrets SET auth_tag = ? WHERE key = 'B'")
			.bind("00".repeat(16))
			.execute(&pool)
			.await
			.unwrap();

		let values = vault.get_secrets_with_values("cfg-1").await.unwrap();
		assert_eq!(values.len(), 1);
		assert_eq!(values["A"].expose(), "1");

		assert!(matches!(
			vault.get_secret("cfg-1", "B").await,
			Err(SecretsError::Decryption(_))
		));
	}

	#[tokio::test]
	async fn test_update_rejects_bad_key_before_writing() {
		let (_pool, vault) = vault().await;
		let result = vault
			.update_secrets_for_configuration(
				"cfg-1",
				vec![NewSecret::new("GOOD", "1"), NewSecret::new("BAD KEY", "2")],
				None,
			)
			.await;
		assert!(matches!(result, Err(SecretsError::InvalidSecret(_))));
		assert!(vault.list_secrets("cfg-1").await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_delete_secret() {
		let (_pool, vault) = vault().await;
		vault
			.store_secret("cfg-1", NewSecret::new("API_KEY", "abc"), None)
			.await
			.unwrap();
		assert!(vault.delete_secret("cfg-1", "API_KEY", None).await.unwrap());
		assert!(!vault.delete_secret("cfg-1", "API_KEY", None).await.unwrap());
		assert!(vault.get_secret("cfg-1", "API_KEY").await.unwrap().is_none());
	}

	#[tokio::test]
	async fn test_rotation_preserves_plaintext() {
		let (pool, vault) = vault().await;
		for (cfg, key, value) in [("c1", "A", "alpha"), ("c1", "B", "beta"), ("c2", "A", "gamma")] {
			vault
				.store_secret(cfg, NewSecret::new(key, value), None)
				.await
				.unwrap();
		}

		let report = vault
			.rotate_encryption_key(&SecretString::new("next-master".to_string()), Some("ops".to_string()))
			.await
			.unwrap();
		assert_eq!(report.from_version, 1);
		assert_eq!(report.to_version, 2);
		assert_eq!(report.total, 3);
		assert_eq!(report.rotated, 3);
		assert!(report.is_complete());
		assert_eq!(vault.secrets_pending_rotation().await.unwrap(), 0);

		assert_eq!(vault.get_secret("c1", "A").await.unwrap().unwrap().expose(), "alpha");
		assert_eq!(vault.get_secret("c1", "B").await.unwrap().unwrap().expose(), "beta");
		assert_eq!(vault.get_secret("c2", "A").await.unwrap().unwrap().expose(), "gamma");
		for meta in vault.list_secrets("c1").await.unwrap() {
			assert_eq!(meta.key_version, 2);
		}

		let audits = SqliteAuditRepository::new(pool);
		let entry = audits
			.latest_for_resource(AuditResourceType::EncryptionKey, "2")
			.await
			.unwrap()
			.unwrap();
		assert_eq!(entry.action, AuditAction::Rotate);
		assert_eq!(entry.new_value.unwrap()["rotated"], 3);
	}

	#[tokio::test]
	async fn test_rotation_reports_failures_and_resumes() {
		let (pool, vault) = vault().await;
		vault
			.store_secret("c1", NewSecret::new("GOOD", "ok"), None)
			.await
			.unwrap();
		vault
			.store_secret("c1", NewSecret::new("BROKEN", "x"), None)
			.await
			.unwrap();
		sqlx::query("UPDATE secrets SET auth_tag = ? WHERE key = 'BROKEN'")
			.bind("00".repeat(16))
			.execute(&pool)
			.await
			.unwrap();

		let report = vault
			.rotate_encryption_key(&SecretString::new("next-master".to_string()), None)
			.await
			.unwrap();
		assert_eq!(report.rotated, 1);
		assert_eq!(report.failed, 1);
		assert_eq!(report.failures[0].key, "BROKEN");
		assert_eq!(vault.secrets_pending_rotation().await.unwrap(), 1);

		// The failed row is untouched and still at the old version.
		let version: i64 = sqlx::query_scalar("SELECT key_version FROM secrets WHERE key = 'BROKEN'")
			.fetch_one(&pool)
			.await
			.unwrap();
		assert_eq!(version, 1);
		assert_eq!(vault.get_secret("c1", "GOOD").await.unwrap().unwrap().expose(), "ok");
	}

	#[tokio::test]
	async fn test_cleanup_expired_secrets() {
		let (_pool, vault) = vault().await;
		vault
			.store_secret(
				"c1",
				NewSecret::new("OLD", "x").with_expires_at(Utc::now() - Duration::minutes(1)),
				None,
			)
			.await
			.unwrap();
		vault
			.store_secret(
				"c1",
				NewSecret::new("NEW", "y").with_expires_at(Utc::now() + Duration::hours(1)),
				None,
			)
			.await
			.unwrap();
		vault
			.store_secret("c1", NewSecret::new("FOREVER", "z"), None)
			.await
			.unwrap();

		assert_eq!(vault.cleanup_expired_secrets().await.unwrap(), 1);
		let keys: Vec<_> = vault
			.list_secrets("c1")
			.await
			.unwrap()
			.into_iter()
			.map(|m| m.key)
			.collect();
		assert_eq!(keys, vec!["FOREVER", "NEW"]);
	}
}
