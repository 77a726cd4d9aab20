// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Feature flags server implementation for Beacon.
//!
//! # Architecture
//!
//! - `repository` - Database operations for flags and evaluation records
//! - `service` - Flag CRUD with audit, cache invalidation and change events,
//!   plus cached evaluation
//!
//! # Example
//!
//! ```ignore
//! use beacon_server_flags::{FlagService, SqliteFlagsRepository, EvaluationContext};
//!
//! let repo = Arc::new(SqliteFlagsRepository::new(pool));
//! let flags = FlagService::new(repo, cache, bus);
//!
//! let context = EvaluationContext::new("production").with_user_id("user123");
//! let result = flags.evaluate("checkout.v2", &context).await?;
//! ```

pub mod error;
pub mod repository;
pub mod service;

pub use error::{FlagsServerError, Result};
pub use repository::{EvaluationRecord, EvaluationStats, FlagsRepository, SqliteFlagsRepository};
pub use service::{flag_cache_key, FlagService};

// Re-export core types for convenience
pub use beacon_flags_core::*;
