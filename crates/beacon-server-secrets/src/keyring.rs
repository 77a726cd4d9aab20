// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::BTreeMap;
use std::fmt;

use beacon_common_secret::SecretString;
use zeroize::Zeroizing;

use crate::encryption::{derive_key, KEY_SIZE};
use crate::error::{Result, SecretsError};

/// Derived keys by key version. New values are always encrypted with the
/// current version; any registered version can decrypt.
pub struct KeyRing {
	current: u32,
	keys: BTreeMap<u32, Zeroizing<[u8; KEY_SIZE]>>,
}

impl KeyRing {
	pub fn new(version: u32, master_key: &SecretString) -> Result<Self> {
		let mut keys = BTreeMap::new();
		keys.insert(version, derive_key(master_key.expose())?);
		Ok(Self {
			current: version,
			keys,
		})
	}

	/// A ring over an already derived key.
	pub fn from_key(version: u32, key: Zeroizing<[u8; KEY_SIZE]>) -> Self {
		let mut keys = BTreeMap::new();
		keys.insert(version, key);
		Self {
			current: version,
			keys,
		}
	}

	/// Register an older master key so secrets still at its version stay
	/// readable.
	pub fn with_retired(mut self, version: u32, master_key: &SecretString) -> Result<Self> {
		if version >= self.current {
			return Err(SecretsError::InvalidMasterKey(format!(
				"retired key version {version} must be below current version {}",
				self.current
			)));
		}
		self.keys.insert(version, derive_key(master_key.expose())?);
		Ok(self)
	}

	pub fn current_version(&self) -> u32 {
		self.current
	}

	pub fn versions(&self) -> Vec<u32> {
		self.keys.keys().copied().collect()
	}

	pub fn contains(&self, version: u32) -> bool {
		self.keys.contains_key(&version)
	}

	/// A copy of the key for `version`.
	pub fn key(&self, version: u32) -> Result<Zeroizing<[u8; KEY_SIZE]>> {
		self.keys
			.get(&version)
			.map(|k| Zeroizing::new(**k))
			.ok_or(SecretsError::UnknownKeyVersion(version))
	}

	pub fn current_key(&self) -> Result<Zeroizing<[u8; KEY_SIZE]>> {
		self.key(self.current)
	}

	/// Add a key one version above the current one and make it current.
	/// Older keys stay registered.
	pub fn advance(&mut self, key: Zeroizing<[u8; KEY_SIZE]>) -> u32 {
		self.current += 1;
		self.keys.insert(self.current, key);
		self.current
	}
}

impl fmt::Debug for KeyRing {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("KeyRing")
			.field("current", &self.current)
			.field("versions", &self.versions())
			.field("keys", &beacon_common_secret::REDACTED)
			.finish()
	}
}
