// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Column conversion helpers shared by the row types of every repository.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::error::DbError;

pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, DbError> {
	DateTime::parse_from_rfc3339(value)
		.map(|dt| dt.with_timezone(&Utc))
		.map_err(|e| DbError::Internal(format!("Invalid timestamp '{value}': {e}")))
}

pub fn parse_uuid(value: &str) -> Result<Uuid, DbError> {
	Uuid::parse_str(value).map_err(|e| DbError::Internal(format!("Invalid id '{value}': {e}")))
}

pub fn parse_json_column<T: DeserializeOwned>(value: &str) -> Result<T, DbError> {
	Ok(serde_json::from_str(value)?)
}

pub fn bool_to_int(value: bool) -> i64 {
	i64::from(value)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_parse_timestamp_round_trip() {
		let now = Utc::now();
		let parsed = parse_timestamp(&now.to_rfc3339()).unwrap();
		assert_eq!(parsed, now);
	}

	#[test]
	fn test_parse_timestamp_rejects_garbage() {
		assert!(matches!(
			parse_timestamp("yesterday"),
			Err(DbError::Internal(_))
		));
	}

	#[test]
	fn test_parse_json_column() {
		let tags: Vec<String> = parse_json_column(r#"["a","b"]"#).unwrap();
		assert_eq!(tags, vec!["a", "b"]);
		assert!(parse_json_column::<Vec<String>>("{").is_err());
	}
}
