// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The evaluation pipeline.
//!
//! Evaluation walks [`PREDICATES`] in order. Each step either lets the
//! request through or produces a final [`EvaluationResult`]; the first
//! step that decides wins. Anything that passes every step is enabled.

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::evaluation::{EvaluationContext, EvaluationReason, EvaluationResult};
use crate::flag::{FeatureFlag, Variant};
use crate::hash::bucket;

/// Inputs shared by every predicate.
pub struct Step<'a> {
	pub flag: &'a FeatureFlag,
	pub ctx: &'a EvaluationContext,
	pub now: DateTime<Utc>,
}

/// `None` passes to the next predicate; `Some` ends evaluation.
pub type Predicate = fn(&Step<'_>) -> Option<EvaluationResult>;

pub const PREDICATES: &[(&str, Predicate)] = &[
	("enabled", check_enabled),
	("environment", check_environment),
	("schedule", check_schedule),
	("user_group", check_user_group),
	("region", check_region),
	("percentage", check_percentage),
	("variant", select_variant),
];

/// Evaluate a flag for a request. Never fails: an unknown flag yields
/// `FLAG_NOT_FOUND`.
pub fn evaluate(
	flag_key: &str,
	flag: Option<&FeatureFlag>,
	ctx: &EvaluationContext,
	now: DateTime<Utc>,
) -> EvaluationResult {
	let Some(flag) = flag else {
		return EvaluationResult::disabled(flag_key, EvaluationReason::FlagNotFound);
	};

	let step = Step { flag, ctx, now };
	for (name, predicate) in PREDICATES {
		if let Some(result) = predicate(&step) {
			tracing::trace!(flag_key, step = *name, reason = %result.reason, "flag evaluation decided");
			return result;
		}
	}

	EvaluationResult::enabled(flag_key)
}

fn check_enabled(step: &Step<'_>) -> Option<EvaluationResult> {
	(!step.flag.enabled)
		.then(|| EvaluationResult::disabled(&step.flag.key, EvaluationReason::FlagDisabled))
}

fn check_environment(step: &Step<'_>) -> Option<EvaluationResult> {
	match &step.flag.environment {
		Some(env) if *env != step.ctx.environment => Some(EvaluationResult::disabled(
			&step.flag.key,
			EvaluationReason::EnvironmentMismatch,
		)),
		_ => None,
	}
}

fn check_schedule(step: &Step<'_>) -> Option<EvaluationResult> {
	let rollout = &step.flag.rollout;
	if rollout.start_date.is_some_and(|start| step.now < start) {
		return Some(EvaluationResult::disabled(
			&step.flag.key,
			EvaluationReason::RolloutNotStarted,
		));
	}
	if rollout.end_date.is_some_and(|end| step.now > end) {
		return Some(EvaluationResult::disabled(
			&step.flag.key,
			EvaluationReason::RolloutEnded,
		));
	}
	None
}

fn check_user_group(step: &Step<'_>) -> Option<EvaluationResult> {
	let groups = &step.flag.rollout.user_groups;
	if groups.is_empty() {
		return None;
	}
	let member = step
		.ctx
		.user_group
		.as_ref()
		.is_some_and(|group| groups.contains(group));
	(!member).then(|| {
		EvaluationResult::disabled(&step.flag.key, EvaluationReason::UserGroupNotTargeted)
	})
}

fn check_region(step: &Step<'_>) -> Option<EvaluationResult> {
	let regions = &step.flag.rollout.regions;
	if regions.is_empty() {
		return None;
	}
	let member = step
		.ctx
		.region
		.as_ref()
		.is_some_and(|region| regions.contains(region));
	(!member).then(|| EvaluationResult::disabled(&step.flag.key, EvaluationReason::RegionNotTargeted))
}

fn check_percentage(step: &Step<'_>) -> Option<EvaluationResult> {
	let percentage = step.flag.rollout.percentage;
	let b = bucket(&format!("{}:{}", step.flag.key, step.ctx.stable_id()));
	(b > u32::from(percentage)).then(|| {
		EvaluationResult::disabled(&step.flag.key, EvaluationReason::PercentageRollout)
			.with_metadata(json!({ "bucket": b, "percentage": percentage }))
	})
}

fn select_variant(step: &Step<'_>) -> Option<EvaluationResult> {
	let b = bucket(&format!("variant:{}", step.ctx.stable_id()));
	let variant = pick_variant(&step.flag.variants, b)?;
	Some(EvaluationResult {
		flag_key: step.flag.key.clone(),
		enabled: true,
		variant: Some(variant.id.clone()),
		reason: EvaluationReason::AbTestVariant,
		metadata: Some(json!({
			"bucket": b,
			"variantName": variant.name,
			"configuration": variant.configuration,
		})),
	})
}

/// Weighted choice over `variants` for a bucket in `1..=100`. Weights are
/// scaled to sum to 100; a zero total selects nothing.
fn pick_variant(variants: &[Variant], bucket: u32) -> Option<&Variant> {
	let total: u32 = variants.iter().map(|v| u32::from(v.weight)).sum();
	if total == 0 {
		return None;
	}

	let target = f64::from(bucket);
	let mut cumulative = 0.0;
	for variant in variants {
		cumulative += f64::from(variant.weight) * 100.0 / f64::from(total);
		if cumulative >= target {
			return Some(variant);
		}
	}
	variants.last()
}
