// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-memory pools for tests across the workspace.

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

/// A single-connection in-memory pool with no schema. The connection is
/// never recycled so the database lives as long as the pool.
pub async fn create_bare_pool() -> SqlitePool {
	SqlitePoolOptions::new()
		.max_connections(1)
		.idle_timeout(None)
		.max_lifetime(None)
		.connect("sqlite::memory:")
		.await
		.unwrap()
}

/// An in-memory pool with the full schema applied.
pub async fn create_test_pool() -> SqlitePool {
	let pool = create_bare_pool().await;
	crate::schema::run_migrations(&pool).await.unwrap();
	pool
}
