// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Schema bootstrap.
//!
//! Every statement is idempotent so the bootstrap runs on each start.

use sqlx::sqlite::SqlitePool;

use crate::error::DbError;

const STATEMENTS: &[&str] = &[
	r#"
	CREATE TABLE IF NOT EXISTS configurations (
		id TEXT PRIMARY KEY NOT NULL,
		service_name TEXT NOT NULL,
		environment TEXT NOT NULL,
		version INTEGER NOT NULL,
		config TEXT NOT NULL,
		description TEXT,
		tags TEXT NOT NULL DEFAULT '[]',
		is_active INTEGER NOT NULL DEFAULT 0,
		is_valid INTEGER NOT NULL DEFAULT 1,
		validation_errors TEXT,
		created_at TEXT NOT NULL,
		updated_at TEXT NOT NULL,
		created_by TEXT,
		updated_by TEXT,
		UNIQUE (service_name, environment, version)
	)
	"#,
	"CREATE UNIQUE INDEX IF NOT EXISTS idx_configurations_active \
	 ON configurations(service_name, environment) WHERE is_active = 1",
	r#"
	CREATE TABLE IF NOT EXISTS services (
		name TEXT PRIMARY KEY NOT NULL,
		description TEXT,
		required_keys TEXT NOT NULL DEFAULT '[]',
		optional_keys TEXT NOT NULL DEFAULT '[]',
		endpoints TEXT NOT NULL DEFAULT '[]',
		strict INTEGER NOT NULL DEFAULT 0,
		created_at TEXT NOT NULL,
		updated_at TEXT NOT NULL
	)
	"#,
	r#"
	CREATE TABLE IF NOT EXISTS feature_flags (
		id TEXT PRIMARY KEY NOT NULL,
		key TEXT NOT NULL UNIQUE,
		name TEXT NOT NULL,
		description TEXT,
		enabled INTEGER NOT NULL DEFAULT 0,
		environment TEXT,
		rollout TEXT NOT NULL,
		variants TEXT NOT NULL DEFAULT '[]',
		dependencies TEXT NOT NULL DEFAULT '[]',
		tags TEXT NOT NULL DEFAULT '[]',
		created_at TEXT NOT NULL,
		updated_at TEXT NOT NULL,
		created_by TEXT,
		updated_by TEXT
	)
	"#,
	r#"
	CREATE TABLE IF NOT EXISTS flag_evaluations (
		id TEXT PRIMARY KEY NOT NULL,
		flag_key TEXT NOT NULL,
		enabled INTEGER NOT NULL,
		variant TEXT,
		reason TEXT NOT NULL,
		stable_id_hash TEXT NOT NULL,
		environment TEXT,
		evaluated_at TEXT NOT NULL
	)
	"#,
	"CREATE INDEX IF NOT EXISTS idx_flag_evaluations_key ON flag_evaluations(flag_key, evaluated_at)",
	r#"
	CREATE TABLE IF NOT EXISTS secrets (
		id TEXT PRIMARY KEY NOT NULL,
		configuration_id TEXT NOT NULL,
		key TEXT NOT NULL,
		encrypted_value TEXT NOT NULL,
		iv TEXT NOT NULL,
		auth_tag TEXT NOT NULL,
		key_version INTEGER NOT NULL,
		description TEXT,
		expires_at TEXT,
		access_count INTEGER NOT NULL DEFAULT 0,
		last_accessed_at TEXT,
		created_at TEXT NOT NULL,
		updated_at TEXT NOT NULL,
		UNIQUE (configuration_id, key)
	)
	"#,
	"CREATE INDEX IF NOT EXISTS idx_secrets_key_version ON secrets(key_version)",
	r#"
	CREATE TABLE IF NOT EXISTS audit_logs (
		id TEXT PRIMARY KEY NOT NULL,
		resource_type TEXT NOT NULL,
		resource_id TEXT NOT NULL,
		action TEXT NOT NULL,
		previous_value TEXT,
		new_value TEXT,
		diff TEXT,
		environment TEXT,
		timestamp TEXT NOT NULL,
		performed_by TEXT
	)
	"#,
	"CREATE INDEX IF NOT EXISTS idx_audit_logs_resource \
	 ON audit_logs(resource_type, resource_id, timestamp)",
];

/// Create every table and index the server needs.
#[tracing::instrument(skip(pool))]
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), DbError> {
	for statement in STATEMENTS {
		sqlx::query(statement).execute(pool).await?;
	}
	tracing::debug!(statements = STATEMENTS.len(), "schema ready");
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use sqlx::Row;

	#[tokio::test]
	async fn test_migrations_are_idempotent() {
		let pool = crate::testing::create_bare_pool().await;
		run_migrations(&pool).await.unwrap();
		run_migrations(&pool).await.unwrap();

		let rows = sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
			.fetch_all(&pool)
			.await
			.unwrap();
		let names: Vec<String> = rows.iter().map(|r| r.get("name")).collect();
		for table in [
			"audit_logs",
			"configurations",
			"feature_flags",
			"flag_evaluations",
			"secrets",
			"services",
		] {
			assert!(names.iter().any(|n| n == table), "missing table {table}");
		}
	}

	#[tokio::test]
	async fn test_only_one_active_configuration_allowed() {
		let pool = crate::testing::create_test_pool().await;
		let insert = "INSERT INTO configurations (id, service_name, environment, version, config, \
		              is_active, created_at, updated_at) VALUES (?, 'svc', 'prod', ?, '{}', 1, 'now', 'now')";
		sqlx::query(insert)
			.bind("a")
			.bind(1)
			.execute(&pool)
			.await
			.unwrap();
		let second = sqlx::query(insert).bind("b").bind(2).execute(&pool).await;
		assert!(second.is_err());
	}
}
