// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Wire protocol: one JSON object per frame, discriminated by `type`.
//!
//! Every server frame carries an RFC 3339 `timestamp`; clients may send
//! one too and it is ignored.

use std::collections::BTreeSet;

use beacon_server_configuration::Configuration;
use beacon_server_flags::{EvaluationContext, EvaluationResult};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
	Configuration,
	FeatureFlags,
}

impl Topic {
	pub fn all() -> BTreeSet<Topic> {
		BTreeSet::from([Topic::Configuration, Topic::FeatureFlags])
	}
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
	#[serde(rename_all = "camelCase")]
	Subscribe {
		service_name: String,
		#[serde(default)]
		environment: Option<String>,
		#[serde(default)]
		subscriptions: Option<Vec<Topic>>,
	},
	#[serde(rename_all = "camelCase")]
	Unsubscribe {
		service_name: String,
		#[serde(default)]
		subscriptions: Option<Vec<Topic>>,
	},
	Ping,
	#[serde(rename_all = "camelCase")]
	GetConfig {
		service_name: String,
		#[serde(default)]
		environment: Option<String>,
		#[serde(default)]
		version: Option<i64>,
	},
	EvaluateFlags {
		flags: Vec<String>,
		#[serde(default)]
		context: Option<ContextPayload>,
	},
}

/// Targeting input as sent by clients. Unlike [`EvaluationContext`] the
/// environment may be left out, in which case the hub fills it in.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextPayload {
	#[serde(default)]
	pub user_id: Option<String>,
	#[serde(default)]
	pub user_group: Option<String>,
	#[serde(default)]
	pub region: Option<String>,
	#[serde(default)]
	pub environment: Option<String>,
	#[serde(default)]
	pub client_ip: Option<String>,
}

impl ContextPayload {
	pub fn into_context(self, fallback_environment: impl Into<String>) -> EvaluationContext {
		let mut context =
			EvaluationContext::new(self.environment.unwrap_or_else(|| fallback_environment.into()));
		context.user_id = self.user_id;
		context.user_group = self.user_group;
		context.region = self.region;
		context.client_ip = self.client_ip;
		context
	}
}

impl ClientMessage {
	pub fn parse(text: &str) -> Result<Self> {
		Ok(serde_json::from_str(text)?)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
	InvalidMessage,
	NotSubscribed,
	NotFound,
	InternalError,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
	#[serde(rename_all = "camelCase")]
	Welcome { connection_id: Uuid },
	Pong,
	#[serde(rename_all = "camelCase")]
	ConfigurationUpdate {
		service_name: String,
		environment: String,
		version: i64,
		config: serde_json::Value,
		is_valid: bool,
		changed_by: Option<String>,
	},
	#[serde(rename_all = "camelCase")]
	ConfigurationReload {
		service_name: String,
		environment: String,
		force: bool,
	},
	#[serde(rename_all = "camelCase")]
	FeatureFlagUpdate {
		flag_key: String,
		enabled: bool,
		rollout_percentage: Option<u8>,
		environment: Option<String>,
	},
	#[serde(rename_all = "camelCase")]
	ConfigResponse { configuration: Configuration },
	FeatureFlagsResponse { evaluations: Vec<EvaluationResult> },
	#[serde(rename_all = "camelCase")]
	SubscriptionConfirmed {
		service_name: String,
		environment: Option<String>,
		subscriptions: BTreeSet<Topic>,
	},
	#[serde(rename_all = "camelCase")]
	UnsubscriptionConfirmed {
		service_name: String,
		subscriptions: BTreeSet<Topic>,
	},
	Error {
		message: String,
		code: Option<ErrorCode>,
	},
}

impl ServerMessage {
	pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
		ServerMessage::Error {
			message: message.into(),
			code: Some(code),
		}
	}

	/// Serialize to a text frame, stamped with the current time.
	pub fn to_frame(&self) -> Result<String> {
		let mut value = serde_json::to_value(self)?;
		if let Some(object) = value.as_object_mut() {
			object.insert(
				"timestamp".to_string(),
				serde_json::to_value(Utc::now())?,
			);
		}
		Ok(serde_json::to_string(&value)?)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;
	use serde_json::json;

	#[test]
	fn test_parse_subscribe() {
		let message = ClientMessage::parse(
			r#"{"type":"SUBSCRIBE","serviceName":"svc-a","environment":"prod","subscriptions":["configuration"],"timestamp":"2025-01-01T00:00:00Z"}"#,
		)
		.unwrap();
		assert_eq!(
			message,
			ClientMessage::Subscribe {
				service_name: "svc-a".to_string(),
				environment: Some("prod".to_string()),
				subscriptions: Some(vec![Topic::Configuration]),
			}
		);
	}

	#[test]
	fn test_parse_minimal_messages() {
		assert_eq!(
			ClientMessage::parse(r#"{"type":"PING"}"#).unwrap(),
			ClientMessage::Ping
		);

		let message =
			ClientMessage::parse(r#"{"type":"EVALUATE_FLAGS","flags":["checkout"]}"#).unwrap();
		assert_eq!(
			message,
			ClientMessage::EvaluateFlags {
				flags: vec!["checkout".to_string()],
				context: None,
			}
		);
	}

	#[test]
	fn test_context_environment_is_optional() {
		let message = ClientMessage::parse(
			r#"{"type":"EVALUATE_FLAGS","flags":["checkout"],"context":{"userId":"u-1"}}"#,
		)
		.unwrap();
		let ClientMessage::EvaluateFlags { context, .. } = message else {
			panic!("expected EVALUATE_FLAGS");
		};
		let payload = context.unwrap();
		assert_eq!(payload.environment, None);

		let context = payload.into_context("staging");
		assert_eq!(context.environment, "staging");
		assert_eq!(context.user_id.as_deref(), Some("u-1"));

		let explicit = ContextPayload {
			environment: Some("dev".to_string()),
			..Default::default()
		};
		assert_eq!(explicit.into_context("staging").environment, "dev");
	}

	#[test]
	fn test_parse_rejects_unknown_type() {
		assert!(ClientMessage::parse(r#"{"type":"DANCE"}"#).is_err());
		assert!(ClientMessage::parse("not json").is_err());
		assert!(ClientMessage::parse(r#"{"type":"SUBSCRIBE"}"#).is_err());
	}

	#[test]
	fn test_frames_carry_type_and_timestamp() {
		let id = Uuid::new_v4();
		let frame = ServerMessage::Welcome { connection_id: id }.to_frame().unwrap();
		let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
		assert_eq!(value["type"], "WELCOME");
		assert_eq!(value["connectionId"], json!(id));
		assert!(value["timestamp"].is_string());

		let frame = ServerMessage::error(ErrorCode::NotSubscribed, "nope")
			.to_frame()
			.unwrap();
		let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
		assert_eq!(value["type"], "ERROR");
		assert_eq!(value["code"], "NOT_SUBSCRIBED");
	}

	#[test]
	fn test_variant_names() {
		let value = serde_json::to_value(ServerMessage::FeatureFlagsResponse {
			evaluations: vec![],
		})
		.unwrap();
		assert_eq!(value["type"], "FEATURE_FLAGS_RESPONSE");

		let value = serde_json::to_value(ServerMessage::UnsubscriptionConfirmed {
			service_name: "svc-a".to_string(),
			subscriptions: BTreeSet::new(),
		})
		.unwrap();
		assert_eq!(value["type"], "UNSUBSCRIPTION_CONFIRMED");
		assert_eq!(value["serviceName"], "svc-a");
	}

	proptest! {
		#[test]
		fn parse_never_panics(text in ".{0,200}") {
			let _ = ClientMessage::parse(&text);
		}
	}
}
