// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Prometheus metrics for `GET /metrics`.
//!
//! The components keep their own atomic counters; the registry here mirrors
//! them on every scrape through [`ServerMetrics::observe`].

use beacon_bus::BusStats;
use beacon_cache::CacheStats;
use beacon_server_flags::EvaluationReason;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

/// Component counters read at scrape time.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
	pub open_connections: usize,
	pub configuration_writes: u64,
	pub flag_evaluations: Vec<(EvaluationReason, u64)>,
	pub cache: CacheStats,
	pub bus: BusStats,
	pub events_delivered: u64,
}

pub struct ServerMetrics {
	registry: Registry,

	pub open_connections: IntGauge,
	pub configuration_writes: IntCounter,
	pub flag_evaluations: IntCounterVec,
	pub cache_operations: IntGaugeVec,
	pub bus_events: IntGaugeVec,
	pub events_delivered: IntCounter,
}

impl ServerMetrics {
	pub fn new() -> Result<Self, prometheus::Error> {
		let registry = Registry::new();

		let open_connections = IntGauge::with_opts(Opts::new(
			"beacon_hub_open_connections",
			"WebSocket connections currently open",
		))?;
		registry.register(Box::new(open_connections.clone()))?;

		let configuration_writes = IntCounter::with_opts(Opts::new(
			"beacon_configuration_writes_total",
			"Configuration versions written",
		))?;
		registry.register(Box::new(configuration_writes.clone()))?;

		let flag_evaluations = IntCounterVec::new(
			Opts::new(
				"beacon_flag_evaluations_total",
				"Feature flag evaluations by reason",
			),
			&["reason"],
		)?;
		registry.register(Box::new(flag_evaluations.clone()))?;

		let cache_operations = IntGaugeVec::new(
			Opts::new("beacon_cache_operations", "Cache operations since start"),
			&["operation"],
		)?;
		registry.register(Box::new(cache_operations.clone()))?;

		let bus_events = IntGaugeVec::new(
			Opts::new("beacon_bus_events", "Change bus events since start"),
			&["outcome"],
		)?;
		registry.register(Box::new(bus_events.clone()))?;

		let events_delivered = IntCounter::with_opts(Opts::new(
			"beacon_hub_events_delivered_total",
			"Change events pushed to WebSocket connections",
		))?;
		registry.register(Box::new(events_delivered.clone()))?;

		Ok(Self {
			registry,
			open_connections,
			configuration_writes,
			flag_evaluations,
			cache_operations,
			bus_events,
			events_delivered,
		})
	}

	/// Bring the registry up to date with the component counters.
	pub fn observe(&self, snapshot: &MetricsSnapshot) {
		self.open_connections
			.set(i64::try_from(snapshot.open_connections).unwrap_or(i64::MAX));
		advance(&self.configuration_writes, snapshot.configuration_writes);
		advance(&self.events_delivered, snapshot.events_delivered);

		for (reason, count) in &snapshot.flag_evaluations {
			advance(
				&self.flag_evaluations.with_label_values(&[reason.as_str()]),
				*count,
			);
		}

		let cache = &snapshot.cache;
		for (operation, value) in [
			("hit", cache.hits),
			("miss", cache.misses),
			("set", cache.sets),
			("delete", cache.deletes),
			("error", cache.errors),
		] {
			self.cache_operations
				.with_label_values(&[operation])
				.set(saturating_i64(value));
		}

		let bus = &snapshot.bus;
		for (outcome, value) in [
			("published", bus.published),
			("delivered", bus.delivered),
			("dropped", bus.dropped),
		] {
			self.bus_events
				.with_label_values(&[outcome])
				.set(saturating_i64(value));
		}
	}

	pub fn encode(&self) -> Result<String, prometheus::Error> {
		let mut buffer = Vec::new();
		TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
		String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
	}
}

/// Counters only move forward; catch up to the component's running total.
fn advance(counter: &IntCounter, total: u64) {
	let current = counter.get();
	if total > current {
		counter.inc_by(total - current);
	}
}

fn saturating_i64(value: u64) -> i64 {
	i64::try_from(value).unwrap_or(i64::MAX)
}
