// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{
	SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};

use crate::error::DbError;

/// Pool sizing and lock-wait settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
	pub max_connections: u32,
	pub busy_timeout: Duration,
}

impl Default for PoolSettings {
	fn default() -> Self {
		Self {
			max_connections: 10,
			busy_timeout: Duration::from_secs(5),
		}
	}
}

/// Create a SqlitePool with WAL mode and default [`PoolSettings`].
///
/// # Arguments
/// * `database_url` - SQLite connection string (e.g., "sqlite:./beacon.db")
///
/// # Errors
/// Returns `DbError::Internal` if the URL is invalid or connection fails.
pub async fn create_pool(database_url: &str) -> Result<SqlitePool, DbError> {
	create_pool_with(database_url, PoolSettings::default()).await
}

#[tracing::instrument(skip(database_url))]
pub async fn create_pool_with(
	database_url: &str,
	settings: PoolSettings,
) -> Result<SqlitePool, DbError> {
	let options = SqliteConnectOptions::from_str(database_url)
		.map_err(|e| DbError::Internal(format!("Invalid database URL: {e}")))?
		.journal_mode(SqliteJournalMode::Wal)
		.synchronous(SqliteSynchronous::Normal)
		.busy_timeout(settings.busy_timeout)
		.create_if_missing(true);

	let pool = SqlitePoolOptions::new()
		.max_connections(settings.max_connections.max(1))
		.connect_with(options)
		.await?;

	tracing::debug!(max_connections = settings.max_connections, "database pool created");
	Ok(pool)
}
