// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Shallow JSON diff recorded alongside audit entries.

use serde_json::{json, Map, Value};

/// Compare two JSON values key by key.
///
/// Objects produce `{added, removed, changed}` where `changed` maps each key
/// to `{from, to}`. Any other pair of values is reported as a single
/// top-level change, or an empty diff when equal.
pub fn compute_diff(previous: &Value, new: &Value) -> Value {
	match (previous, new) {
		(Value::Object(before), Value::Object(after)) => diff_objects(before, after),
		(Value::Null, Value::Object(after)) => diff_objects(&Map::new(), after),
		(Value::Object(before), Value::Null) => diff_objects(before, &Map::new()),
		_ if previous == new => json!({"added": {}, "removed": {}, "changed": {}}),
		_ => json!({
			"added": {},
			"removed": {},
			"changed": {"": {"from": previous, "to": new}},
		}),
	}
}

fn diff_objects(before: &Map<String, Value>, after: &Map<String, Value>) -> Value {
	let mut added = Map::new();
	let mut removed = Map::new();
	let mut changed = Map::new();

	for (key, value) in after {
		match before.get(key) {
			None => {
				added.insert(key.clone(), value.clone());
			}
			Some(old) if old != value => {
				changed.insert(key.clone(), json!({"from": old, "to": value}));
			}
			Some(_) => {}
		}
	}

	for (key, value) in before {
		if !after.contains_key(key) {
			removed.insert(key.clone(), value.clone());
		}
	}

	json!({
		"added": added,
		"removed": removed,
		"changed": changed,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	#[test]
	fn test_added_removed_changed() {
		let diff = compute_diff(
			&json!({"keep": 1, "gone": true, "edit": "a"}),
			&json!({"keep": 1, "edit": "b", "new": [1, 2]}),
		);
		assert_eq!(diff["added"], json!({"new": [1, 2]}));
		assert_eq!(diff["removed"], json!({"gone": true}));
		assert_eq!(diff["changed"], json!({"edit": {"from": "a", "to": "b"}}));
	}

	#[test]
	fn test_create_reports_everything_added() {
		let diff = compute_diff(&Value::Null, &json!({"a": 1}));
		assert_eq!(diff["added"], json!({"a": 1}));
		assert_eq!(diff["removed"], json!({}));
	}

	#[test]
	fn test_scalar_change() {
		let diff = compute_diff(&json!(1), &json!(2));
		assert_eq!(diff["changed"][""]["to"], json!(2));
	}

	proptest! {
		#[test]
		fn identical_objects_have_empty_diff(keys in proptest::collection::btree_map("[a-z]{1,8}", 0i64..100, 0..10)) {
			let value = serde_json::to_value(&keys).unwrap();
			let diff = compute_diff(&value, &value);
			prop_assert_eq!(&diff["added"], &json!({}));
			prop_assert_eq!(&diff["removed"], &json!({}));
			prop_assert_eq!(&diff["changed"], &json!({}));
		}
	}
}
