// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Environment helpers for secrets.

use std::path::PathBuf;

use beacon_common_secret::SecretString;

#[derive(Debug, thiserror::Error)]
pub enum SecretEnvError {
	#[error("both {name} and {name}_FILE are set; use only one")]
	Ambiguous { name: String },

	#[error("failed to read secret file {path} for {name}: {source}")]
	FileRead {
		name: String,
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
}

/// Load a secret from `NAME` or from the file referenced by `NAME_FILE`.
///
/// Returns `Ok(None)` when neither variable is set (or both are empty).
/// File contents are trimmed of trailing newlines.
pub fn load_secret_env(name: &str) -> Result<Option<SecretString>, SecretEnvError> {
	let direct = std::env::var(name).ok().filter(|v| !v.is_empty());
	let file_var = format!("{name}_FILE");
	let file = std::env::var(&file_var).ok().filter(|v| !v.is_empty());

	match (direct, file) {
		(Some(_), Some(_)) => Err(SecretEnvError::Ambiguous {
			name: name.to_string(),
		}),
		(Some(value), None) => Ok(Some(SecretString::new(value))),
		(None, Some(path)) => {
			let path = PathBuf::from(path);
			let contents = std::fs::read_to_string(&path).map_err(|e| SecretEnvError::FileRead {
				name: name.to_string(),
				path: path.clone(),
				source: e,
			})?;
			let trimmed = contents.trim_end_matches(['\n', '\r']).to_string();
			if trimmed.is_empty() {
				Ok(None)
			} else {
				Ok(Some(SecretString::new(trimmed)))
			}
		}
		(None, None) => Ok(None),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	// Each test uses a unique variable name; the process environment is shared.

	#[test]
	fn missing_returns_none() {
		assert!(load_secret_env("BEACON_TEST_SECRET_MISSING")
			.unwrap()
			.is_none());
	}

	#[test]
	fn direct_value_is_loaded() {
		std::env::set_var("BEACON_TEST_SECRET_DIRECT", "direct-value");
		let secret = load_secret_env("BEACON_TEST_SECRET_DIRECT").unwrap().unwrap();
		assert_eq!(secret.expose(), "direct-value");
		std::env::remove_var("BEACON_TEST_SECRET_DIRECT");
	}

	#[test]
	fn file_value_is_loaded_and_trimmed() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		writeln!(file, "from-file").unwrap();
		std::env::set_var("BEACON_TEST_SECRET_VIA_FILE_FILE", file.path());
		let secret = load_secret_env("BEACON_TEST_SECRET_VIA_FILE")
			.unwrap()
			.unwrap();
		assert_eq!(secret.expose(), "from-file");
		std::env::remove_var("BEACON_TEST_SECRET_VIA_FILE_FILE");
	}

	#[test]
	fn both_set_is_ambiguous() {
		std::env::set_var("BEACON_TEST_SECRET_BOTH", "a");
		std::env::set_var("BEACON_TEST_SECRET_BOTH_FILE", "/nonexistent");
		let result = load_secret_env("BEACON_TEST_SECRET_BOTH");
		assert!(matches!(result, Err(SecretEnvError::Ambiguous { .. })));
		std::env::remove_var("BEACON_TEST_SECRET_BOTH");
		std::env::remove_var("BEACON_TEST_SECRET_BOTH_FILE");
	}
}
