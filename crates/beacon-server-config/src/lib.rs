// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Centralized configuration management for Beacon server.
//!
//! This crate provides:
//! - Layered configuration from multiple sources (defaults, TOML file, environment)
//! - Type-safe configuration with validation
//! - Consistent environment variable naming (`BEACON_SERVER_*`)
//!
//! # Usage
//!
//! ```ignore
//! use beacon_server_config::load_config;
//!
//! let config = load_config()?;
//! println!("Server listening on {}:{}", config.http.host, config.http.port);
//! ```

pub mod error;
pub mod layer;
pub mod sections;
pub mod sources;

pub use error::ConfigError;
pub use layer::ServerConfigLayer;
pub use sections::*;
pub use sources::{ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource};

use tracing::{debug, info};

/// Environment variable holding the vault master key (or `*_FILE` path to it).
pub const MASTER_KEY_ENV: &str = "BEACON_SERVER_SECRETS_MASTER_KEY";

/// Fully resolved server configuration.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
	pub http: HttpConfig,
	pub database: DatabaseConfig,
	pub cache: CacheConfig,
	pub secrets: SecretsConfig,
	pub hub: HubConfig,
	pub logging: LoggingConfig,
}

impl ServerConfig {
	/// Get the socket address string for binding.
	pub fn socket_addr(&self) -> String {
		format!("{}:{}", self.http.host, self.http.port)
	}
}

/// Load configuration from all sources with standard precedence.
///
/// Precedence (highest to lowest):
/// 1. Environment variables (`BEACON_SERVER_*`)
/// 2. Config file (`/etc/beacon/server.toml`)
/// 3. Built-in defaults
pub fn load_config() -> Result<ServerConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::system()),
		Box::new(EnvSource),
	])
}

/// Load configuration from environment only (for testing or simple deployments).
pub fn load_config_from_env() -> Result<ServerConfig, ConfigError> {
	let mut merged = ServerConfigLayer::default();
	merged.merge(EnvSource.load()?);
	finalize(merged)
}

/// Load configuration with a custom config file path.
pub fn load_config_with_file(
	config_path: impl Into<std::path::PathBuf>,
) -> Result<ServerConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::new(config_path)),
		Box::new(EnvSource),
	])
}

fn load_from_sources(mut sources: Vec<Box<dyn ConfigSource>>) -> Result<ServerConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = ServerConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		let layer = source.load()?;
		merged.merge(layer);
	}

	finalize(merged)
}

/// Finalize configuration layer into resolved config.
fn finalize(layer: ServerConfigLayer) -> Result<ServerConfig, ConfigError> {
	let http = layer.http.unwrap_or_default().finalize();
	let database = layer.database.unwrap_or_default().finalize()?;
	let cache = layer.cache.unwrap_or_default().finalize();
	let hub = layer.hub.unwrap_or_default().finalize();
	let logging = layer.logging.unwrap_or_default().finalize();

	let master_key = beacon_common_config::load_secret_env(MASTER_KEY_ENV)
		.map_err(|e| ConfigError::Secret(e.to_string()))?;
	let secrets = layer.secrets.unwrap_or_default().finalize(master_key);

	validate_config(&secrets, &hub)?;

	info!(
		host = %http.host,
		port = http.port,
		database = %database.url,
		max_connections = database.max_connections,
		cache_enabled = cache.enabled,
		secrets_enabled = secrets.enabled,
		key_version = secrets.key_version,
		heartbeat_secs = hub.heartbeat_interval_secs,
		"Server configuration loaded"
	);

	Ok(ServerConfig {
		http,
		database,
		cache,
		secrets,
		hub,
		logging,
	})
}

/// Validate cross-field configuration rules.
fn validate_config(secrets: &SecretsConfig, hub: &HubConfig) -> Result<(), ConfigError> {
	if secrets.enabled && secrets.master_key.as_ref().map_or(true, |k| k.is_empty()) {
		return Err(ConfigError::Validation(format!(
			"secrets are enabled but {MASTER_KEY_ENV} is not set. \
			 Provide a master key or set BEACON_SERVER_SECRETS_ENABLED=false."
		)));
	}

	if secrets
		.retired_keys
		.iter()
		.any(|k| k.version >= secrets.key_version)
	{
		return Err(ConfigError::Validation(
			"retired key versions must be lower than the active key_version".to_string(),
		));
	}

	if hub.heartbeat_interval_secs == 0 {
		return Err(ConfigError::Validation(
			"hub heartbeat interval must be greater than zero".to_string(),
		));
	}

	if hub.connection_timeout_secs <= hub.heartbeat_interval_secs {
		return Err(ConfigError::Validation(
			"hub connection timeout must exceed the heartbeat interval".to_string(),
		));
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use beacon_common_config::SecretString;

	fn secrets_with_key() -> SecretsConfig {
		SecretsConfig {
			master_key: Some(SecretString::new("test-master-key".to_string())),
			..Default::default()
		}
	}

	#[test]
	fn test_missing_master_key_rejected_when_enabled() {
		let result = validate_config(&SecretsConfig::default(), &HubConfig::default());
		assert!(matches!(result, Err(ConfigError::Validation(_))));
	}

	#[test]
	fn test_missing_master_key_allowed_when_disabled() {
		let secrets = SecretsConfig {
			enabled: false,
			..Default::default()
		};
		assert!(validate_config(&secrets, &HubConfig::default()).is_ok());
	}

	#[test]
	fn test_timeout_must_exceed_heartbeat() {
		let hub = HubConfig {
			heartbeat_interval_secs: 60,
			connection_timeout_secs: 30,
			..Default::default()
		};
		assert!(validate_config(&secrets_with_key(), &hub).is_err());
		assert!(validate_config(&secrets_with_key(), &HubConfig::default()).is_ok());
	}

	#[test]
	fn test_retired_key_version_must_be_older() {
		let mut secrets = secrets_with_key();
		secrets.retired_keys.push(RetiredKeyConfig {
			version: 1,
			master_key: SecretString::new("old".to_string()),
		});
		assert!(validate_config(&secrets, &HubConfig::default()).is_err());

		secrets.key_version = 2;
		assert!(validate_config(&secrets, &HubConfig::default()).is_ok());
	}

	#[test]
	fn test_socket_addr() {
		let config = ServerConfig::default();
		assert_eq!(config.socket_addr(), "0.0.0.0:8080");
	}
}
