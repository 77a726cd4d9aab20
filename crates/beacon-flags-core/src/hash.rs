// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Deterministic bucketing.

use std::io::Cursor;

use murmur3::murmur3_32;

/// MurmurHash3 (x86, 32-bit, seed 0) of the UTF-8 bytes of `input`.
pub fn stable_hash(input: &str) -> u32 {
	// Reading from an in-memory cursor cannot fail.
	murmur3_32(&mut Cursor::new(input.as_bytes()), 0).unwrap_or(0)
}

/// Map `input` onto 1..=100.
pub fn bucket(input: &str) -> u32 {
	stable_hash(input) % 100 + 1
}
