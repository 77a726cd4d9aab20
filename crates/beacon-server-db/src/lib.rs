// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! SQLite persistence shared by the Beacon server crates.
//!
//! Domain crates own their repositories; this crate provides the pool,
//! the schema bootstrap, the audit log repository and test helpers.

pub mod audit;
pub mod error;
pub mod pool;
pub mod schema;
pub mod testing;
pub mod util;

pub use audit::{insert_audit_entry, AuditRepository, SqliteAuditRepository};
pub use error::{DbError, Result};
pub use pool::{create_pool, create_pool_with, PoolSettings};
pub use schema::run_migrations;
pub use util::{bool_to_int, parse_json_column, parse_timestamp, parse_uuid};
