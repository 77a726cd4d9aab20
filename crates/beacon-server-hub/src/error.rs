// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use beacon_bus::BusError;
use beacon_server_configuration::ConfigurationError;
use beacon_server_flags::FlagsServerError;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum HubError {
	#[error("Configuration error: {0}")]
	Configuration(#[from] ConfigurationError),

	#[error("Feature flag error: {0}")]
	Flags(#[from] FlagsServerError),

	#[error("Change bus error: {0}")]
	Bus(#[from] BusError),

	#[error("Serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	#[error("Unknown connection: {0}")]
	UnknownConnection(Uuid),

	#[error("Connection closed: {0}")]
	ConnectionClosed(Uuid),
}

pub type Result<T> = std::result::Result<T, HubError>;
