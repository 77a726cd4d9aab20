// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Secret value encryption.
//!
//! AES-256-GCM with a random 128-bit IV per value. The key is derived from
//! an operator master key with PBKDF2-HMAC-SHA256.

use aes_gcm::{
	aead::{consts::U16, AeadInPlace, KeyInit, OsRng},
	aes::Aes256,
	AesGcm, Key, Nonce, Tag,
};
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{Result, SecretsError};

/// Size of encryption keys in bytes (256 bits for AES-256).
pub const KEY_SIZE: usize = 32;

/// Size of the per-value IV in bytes.
pub const IV_SIZE: usize = 16;

/// Size of the GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// PBKDF2 iteration count for master key derivation.
pub const KDF_ITERATIONS: u32 = 100_000;

const KDF_SALT: &[u8] = b"beacon-secret-vault";

type Aes256Gcm16 = AesGcm<Aes256, U16>;

/// Ciphertext, IV and tag as stored, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedValue {
	pub ciphertext: String,
	pub iv: String,
	pub auth_tag: String,
}

/// Derive the 256-bit working key from a master key.
pub fn derive_key(master_key: &str) -> Result<Zeroizing<[u8; KEY_SIZE]>> {
	if master_key.is_empty() {
		return Err(SecretsError::InvalidMasterKey(
			"master key must not be empty".to_string(),
		));
	}
	let mut key = Zeroizing::new([0u8; KEY_SIZE]);
	pbkdf2::pbkdf2_hmac::<Sha256>(master_key.as_bytes(), KDF_SALT, KDF_ITERATIONS, key.as_mut());
	Ok(key)
}

fn generate_iv() -> [u8; IV_SIZE] {
	let mut iv = [0u8; IV_SIZE];
	OsRng.fill_bytes(&mut iv);
	iv
}

pub fn encrypt(key: &[u8; KEY_SIZE], plaintext: &str) -> Result<EncryptedValue> {
	let cipher = Aes256Gcm16::new(Key::<Aes256Gcm16>::from_slice(key));
	let iv = generate_iv();

	let mut buffer = plaintext.as_bytes().to_vec();
	let tag = cipher
		.encrypt_in_place_detached(Nonce::<U16>::from_slice(&iv), b"", &mut buffer)
		.map_err(|e| SecretsError::Encryption(format!("secret encryption failed: {e}")))?;

	Ok(EncryptedValue {
		ciphertext: hex::encode(&buffer),
		iv: hex::encode(iv),
		auth_tag: hex::encode(tag),
	})
}

pub fn decrypt(key: &[u8; KEY_SIZE], encrypted: &EncryptedValue) -> Result<Zeroizing<String>> {
	let iv = decode_fixed::<IV_SIZE>("iv", &encrypted.iv)?;
	let tag = decode_fixed::<TAG_SIZE>("auth tag", &encrypted.auth_tag)?;
	let mut buffer = Zeroizing::new(
		hex::decode(&encrypted.ciphertext)
			.map_err(|e| SecretsError::MalformedCiphertext(format!("ciphertext: {e}")))?,
	);

	let cipher = Aes256Gcm16::new(Key::<Aes256Gcm16>::from_slice(key));
	cipher
		.decrypt_in_place_detached(
			Nonce::<U16>::from_slice(&iv),
			b"",
			buffer.as_mut_slice(),
			Tag::from_slice(&tag),
		)
		.map_err(|e| SecretsError::Decryption(format!("secret decryption failed: {e}")))?;

	let plaintext = String::from_utf8(std::mem::take(&mut *buffer))
		.map_err(|_| SecretsError::Decryption("plaintext is not valid UTF-8".to_string()))?;
	Ok(Zeroizing::new(plaintext))
}

fn decode_fixed<const N: usize>(field: &str, value: &str) -> Result<[u8; N]> {
	let bytes =
		hex::decode(value).map_err(|e| SecretsError::MalformedCiphertext(format!("{field}: {e}")))?;
	bytes.try_into().map_err(|bytes: Vec<u8>| {
		SecretsError::MalformedCiphertext(format!(
			"{field}: expected {N} bytes, got {}",
			bytes.len()
		))
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	fn key() -> Zeroizing<[u8; KEY_SIZE]> {
		let mut key = Zeroizing::new([0u8; KEY_SIZE]);
		OsRng.fill_bytes(key.as_mut());
		key
	}

	#[test]
	fn derive_key_is_deterministic() {
		let a = derive_key("correct horse").unwrap();
		let b = derive_key("correct horse").unwrap();
		let c = derive_key("battery staple").unwrap();
		assert_eq!(a.as_slice(), b.as_slice());
		assert_ne!(a.as_slice(), c.as_slice());
	}

	#[test]
	fn derive_key_rejects_empty_master() {
		assert!(matches!(
			derive_key(""),
			Err(SecretsError::InvalidMasterKey(_))
		));
	}

	#[test]
	fn stored_sizes() {
		let encrypted = encrypt(&key(), "abc123").unwrap();
		assert_eq!(encrypted.iv.len(), IV_SIZE * 2);
		assert_eq!(encrypted.auth_tag.len(), TAG_SIZE * 2);
		assert_eq!(encrypted.ciphertext.len(), "abc123".len() * 2);
		assert!(!encrypted.ciphertext.contains("abc123"));
	}

	#[test]
	fn wrong_key_fails_decryption() {
		let encrypted = encrypt(&key(), "secret").unwrap();
		assert!(matches!(
			decrypt(&key(), &encrypted),
			Err(SecretsError::Decryption(_))
		));
	}

	#[test]
	fn tampered_tag_fails() {
		let k = key();
		let mut encrypted = encrypt(&k, "secret").unwrap();
		let replacement = if encrypted.auth_tag.starts_with('0') { "1" } else { "0" };
		encrypted.auth_tag.replace_range(0..1, replacement);
		assert!(decrypt(&k, &encrypted).is_err());
	}

	#[test]
	fn malformed_iv_is_reported() {
		let k = key();
		let mut encrypted = encrypt(&k, "secret").unwrap();
		encrypted.iv = "abcd".to_string();
		assert!(matches!(
			decrypt(&k, &encrypted),
			Err(SecretsError::MalformedCiphertext(_))
		));
	}

	proptest! {
		#[test]
		fn prop_encryption_roundtrip(plaintext in ".{0,512}") {
			let k = key();
			let encrypted = encrypt(&k, &plaintext).unwrap();
			let decrypted = decrypt(&k, &encrypted).unwrap();
			prop_assert_eq!(plaintext.as_str(), decrypted.as_str());
		}

		#[test]
		fn prop_fresh_iv_per_encryption(plaintext in ".{1,128}") {
			let k = key();
			let first = encrypt(&k, &plaintext).unwrap();
			let second = encrypt(&k, &plaintext).unwrap();
			prop_assert_ne!(first.iv, second.iv);
			prop_assert_ne!(first.ciphertext, second.ciphertext);
		}
	}
}
