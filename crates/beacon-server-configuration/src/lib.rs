// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Versioned service configuration.
//!
//! Every write to a (service, environment) pair inserts a new version,
//! makes it the only active one and records an audit entry in the same
//! transaction. Validation failures are stored on the version instead of
//! rejecting the write, so the history has no gaps.

pub mod error;
pub mod repository;
pub mod schema;
pub mod service;
pub mod subscriptions;
pub mod types;

pub use error::{ConfigurationError, Result};
pub use repository::{ConfigurationRepository, SqliteConfigurationRepository};
pub use schema::{ConfigSchema, ValidationOutcome};
pub use service::{config_cache_key, config_version_cache_key, ConfigurationStore};
pub use subscriptions::SubscriptionRegistry;
pub use types::{
	validate_name, ConfigBlob, Configuration, ConfigurationDraft, HistoryEntry, HistoryPage,
	ServiceInput, ServiceRegistration, UpdateOptions,
};
