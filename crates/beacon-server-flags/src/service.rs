// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use beacon_bus::{flag_change_channel, ChangeBus, ChangeEvent};
use beacon_cache::CacheLayer;
use beacon_flags_core::{
	evaluate, EvaluationContext, EvaluationReason, EvaluationResult, FeatureFlag, FlagInput,
	FlagUpdate,
};
use beacon_server_audit::{AuditAction, AuditLogEntry, AuditResourceType};
use chrono::Utc;
use futures::future::try_join_all;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::error::{FlagsServerError, Result};
use crate::repository::{EvaluationRecord, EvaluationStats, FlagsRepository};

const ALL_FLAGS_TAG: &str = "flags";
const EVALUATION_QUEUE_CAPACITY: usize = 1024;

pub fn flag_cache_key(key: &str) -> String {
	format!("flag:{key}")
}

#[derive(Default)]
struct ReasonCounters([AtomicU64; 10]);

impl ReasonCounters {
	fn increment(&self, reason: EvaluationReason) {
		if let Some(i) = EvaluationReason::all().iter().position(|r| *r == reason) {
			self.0[i].fetch_add(1, Ordering::Relaxed);
		}
	}

	fn snapshot(&self) -> Vec<(EvaluationReason, u64)> {
		EvaluationReason::all()
			.iter()
			.zip(self.0.iter())
			.map(|(reason, count)| (*reason, count.load(Ordering::Relaxed)))
			.collect()
	}
}

/// Feature flag engine: CRUD with audit, cache and change events, and
/// cached evaluation with best-effort analytics.
pub struct FlagService {
	repo: Arc<dyn FlagsRepository>,
	cache: Arc<CacheLayer>,
	bus: Arc<dyn ChangeBus>,
	record_evaluations: bool,
	queue_capacity: usize,
	recorder: OnceLock<mpsc::Sender<EvaluationRecord>>,
	dropped_records: AtomicU64,
	counters: ReasonCounters,
}

impl FlagService {
	pub fn new(
		repo: Arc<dyn FlagsRepository>,
		cache: Arc<CacheLayer>,
		bus: Arc<dyn ChangeBus>,
	) -> Self {
		Self {
			repo,
			cache,
			bus,
			record_evaluations: true,
			queue_capacity: EVALUATION_QUEUE_CAPACITY,
			recorder: OnceLock::new(),
			dropped_records: AtomicU64::new(0),
			counters: ReasonCounters::default(),
		}
	}

	/// Turn analytics recording on or off.
	pub fn with_evaluation_recording(mut self, enabled: bool) -> Self {
		self.record_evaluations = enabled;
		self
	}

	/// Records waiting for the analytics writer beyond this are dropped.
	pub fn with_evaluation_queue_capacity(mut self, capacity: usize) -> Self {
		self.queue_capacity = capacity.max(1);
		self
	}

	#[instrument(skip(self, input), fields(flag_key = %input.key))]
	pub async fn create_flag(
		&self,
		input: FlagInput,
		created_by: Option<String>,
	) -> Result<FeatureFlag> {
		let flag = FeatureFlag::from_input(input, created_by.clone())?;
		self.check_dependencies(&flag).await?;

		let audit = AuditLogEntry::builder(AuditResourceType::FeatureFlag, &flag.key, AuditAction::Create)
			.new_value(serde_json::to_value(&flag)?)
			.performed_by(created_by);
		let audit = with_environment(audit, &flag).build();

		self.repo.create_flag(&flag, &audit).await?;
		info!(flag_key = %flag.key, enabled = flag.enabled, "feature flag created");

		self.invalidate(&flag.key).await;
		self.publish(&flag).await;
		Ok(flag)
	}

	#[instrument(skip(self, update))]
	pub async fn update_flag(
		&self,
		key: &str,
		update: FlagUpdate,
		updated_by: Option<String>,
	) -> Result<FeatureFlag> {
		let previous = self
			.repo
			.get_flag_by_key(key)
			.await?
			.ok_or_else(|| FlagsServerError::NotFound(key.to_string()))?;

		let mut flag = previous.clone();
		flag.apply(update, updated_by.clone())?;
		self.check_dependencies(&flag).await?;

		let audit = AuditLogEntry::builder(AuditResourceType::FeatureFlag, key, AuditAction::Update)
			.previous_value(serde_json::to_value(&previous)?)
			.new_value(serde_json::to_value(&flag)?)
			.performed_by(updated_by);
		let audit = with_environment(audit, &flag).build();

		if !self.repo.update_flag(&flag, &audit).await? {
			return Err(FlagsServerError::NotFound(key.to_string()));
		}
		info!(flag_key = %key, enabled = flag.enabled, "feature flag updated");

		self.invalidate(key).await;
		self.publish(&flag).await;
		Ok(flag)
	}

	#[instrument(skip(self))]
	pub async fn delete_flag(&self, key: &str, deleted_by: Option<String>) -> Result<()> {
		let previous = self
			.repo
			.get_flag_by_key(key)
			.await?
			.ok_or_else(|| FlagsServerError::NotFound(key.to_string()))?;

		let audit = AuditLogEntry::builder(AuditResourceType::FeatureFlag, key, AuditAction::Delete)
			.previous_value(serde_json::to_value(&previous)?)
			.performed_by(deleted_by);
		let audit = with_environment(audit, &previous).build();

		if !self.repo.delete_flag(key, &audit).await? {
			return Err(FlagsServerError::NotFound(key.to_string()));
		}
		info!(flag_key = %key, "feature flag deleted");

		self.invalidate(key).await;
		let event = ChangeEvent::feature_flag_changed(key, false, None, previous.environment);
		if let Err(e) = self.bus.publish(&flag_change_channel(key), event).await {
			warn!(flag_key = %key, error = %e, "failed to publish flag deletion");
		}
		Ok(())
	}

	/// Read a flag through the cache.
	pub async fn get_flag(&self, key: &str) -> Result<Option<FeatureFlag>> {
		let tags = [flag_cache_key(key), ALL_FLAGS_TAG.to_string()];
		self.cache
			.get_or_load(&flag_cache_key(key), None, &tags, || async {
				self.repo.get_flag_by_key(key).await
			})
			.await
	}

	pub async fn list_flags(&self) -> Result<Vec<FeatureFlag>> {
		self.repo.list_flags().await
	}

	/// Evaluate one flag. Unknown keys produce a `FLAG_NOT_FOUND` result;
	/// only storage failures are errors.
	#[instrument(skip(self, context), fields(environment = %context.environment))]
	pub async fn evaluate(
		&self,
		flag_key: &str,
		context: &EvaluationContext,
	) -> Result<EvaluationResult> {
		let flag = self.get_flag(flag_key).await?;
		let result = evaluate(flag_key, flag.as_ref(), context, Utc::now());

		self.counters.increment(result.reason);
		debug!(flag_key, enabled = result.enabled, reason = %result.reason, "flag evaluated");
		self.record(&result, context);
		Ok(result)
	}

	/// Evaluate several flags concurrently. Results come back in the order
	/// of `flag_keys`.
	pub async fn evaluate_feature_flags(
		&self,
		flag_keys: &[String],
		context: &EvaluationContext,
	) -> Result<Vec<EvaluationResult>> {
		try_join_all(flag_keys.iter().map(|key| self.evaluate(key, context))).await
	}

	pub async fn evaluation_stats(&self, flag_key: &str) -> Result<EvaluationStats> {
		self.repo.evaluation_stats(flag_key).await
	}

	/// Process-local evaluation counts by reason since start.
	pub fn evaluation_counts(&self) -> Vec<(EvaluationReason, u64)> {
		self.counters.snapshot()
	}

	/// Analytics records discarded because the writer fell behind.
	pub fn dropped_evaluation_records(&self) -> u64 {
		self.dropped_records.load(Ordering::Relaxed)
	}

	fn record(&self, result: &EvaluationResult, context: &EvaluationContext) {
		if !self.record_evaluations {
			return;
		}
		let Some(tx) = self.recorder() else {
			return;
		};

		match tx.try_send(EvaluationRecord::new(result, context)) {
			Ok(()) => {}
			Err(mpsc::error::TrySendError::Full(record)) => {
				self.dropped_records.fetch_add(1, Ordering::Relaxed);
				debug!(flag_key = %record.flag_key, "evaluation queue full, dropping record");
			}
			Err(mpsc::error::TrySendError::Closed(record)) => {
				debug!(flag_key = %record.flag_key, "evaluation writer gone, dropping record");
			}
		}
	}

	/// The analytics queue, starting its single writer on first use. `None`
	/// outside a Tokio runtime.
	fn recorder(&self) -> Option<&mpsc::Sender<EvaluationRecord>> {
		if let Some(tx) = self.recorder.get() {
			return Some(tx);
		}
		let handle = tokio::runtime::Handle::try_current().ok()?;
		Some(self.recorder.get_or_init(|| {
			let (tx, mut rx) = mpsc::channel::<EvaluationRecord>(self.queue_capacity);
			let repo = Arc::clone(&self.repo);
			handle.spawn(async move {
				while let Some(record) = rx.recv().await {
					if let Err(e) = repo.record_evaluation(&record).await {
						debug!(flag_key = %record.flag_key, error = %e, "failed to write evaluation record");
					}
				}
			});
			tx
		}))
	}

	async fn check_dependencies(&self, flag: &FeatureFlag) -> Result<()> {
		for dependency in &flag.dependencies {
			if *dependency == flag.key {
				return Err(FlagsServerError::InvalidDependency(dependency.clone()));
			}
			if self.repo.get_flag_by_key(dependency).await?.is_none() {
				return Err(FlagsServerError::InvalidDependency(dependency.clone()));
			}
		}
		Ok(())
	}

	async fn invalidate(&self, key: &str) {
		self.cache.invalidate_by_tags(&[flag_cache_key(key)]).await;
	}

	async fn publish(&self, flag: &FeatureFlag) {
		let event = ChangeEvent::feature_flag_changed(
			&flag.key,
			flag.enabled,
			Some(flag.rollout.percentage),
			flag.environment.clone(),
		);
		if let Err(e) = self.bus.publish(&flag_change_channel(&flag.key), event).await {
			warn!(flag_key = %flag.key, error = %e, "failed to publish flag change");
		}
	}
}

fn with_environment(
	builder: beacon_server_audit::AuditLogBuilder,
	flag: &FeatureFlag,
) -> beacon_server_audit::AuditLogBuilder {
	match &flag.environment {
		Some(env) => builder.environment(env),
		None => builder,
	}
}
