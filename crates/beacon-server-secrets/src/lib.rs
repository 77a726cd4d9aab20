// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Secret vault for the Beacon server.
//!
//! Secret values are encrypted with AES-256-GCM under a key derived from
//! an operator master key. Every row records the key version it was
//! encrypted with; the [`KeyRing`] keeps older versions readable so key
//! rotation can run while the vault is in use.

pub mod encryption;
pub mod error;
pub mod keyring;
pub mod repository;
pub mod types;
pub mod vault;

pub use encryption::{derive_key, EncryptedValue, IV_SIZE, KDF_ITERATIONS, KEY_SIZE, TAG_SIZE};
pub use error::{Result, SecretsError};
pub use keyring::KeyRing;
pub use repository::{SecretsRepository, SqliteSecretsRepository};
pub use types::{
	NewSecret, RotationFailure, RotationReport, SecretMetadata, SecretValue, StoredSecret,
};
pub use vault::SecretVault;
