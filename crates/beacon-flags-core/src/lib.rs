// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for the Beacon feature flag engine.
//!
//! Evaluation is a pure function of the flag, the request context and the
//! current time: no I/O, no locks, no randomness. The same flag state and
//! stable identifier always produce the same decision on every instance.
//!
//! # Example
//!
//! ```
//! use beacon_flags_core::{evaluate, EvaluationContext, EvaluationReason};
//! use chrono::Utc;
//!
//! let ctx = EvaluationContext::new("production").with_user_id("user-123");
//! let result = evaluate("checkout.v2", None, &ctx, Utc::now());
//! assert!(!result.enabled);
//! assert_eq!(result.reason, EvaluationReason::FlagNotFound);
//! ```

pub mod error;
pub mod evaluation;
pub mod flag;
pub mod hash;
pub mod pipeline;

pub use error::{FlagsError, Result};
pub use evaluation::{EvaluationContext, EvaluationReason, EvaluationResult};
pub use flag::{FeatureFlag, FlagInput, FlagUpdate, Rollout, Variant};
pub use hash::{bucket, stable_hash};
pub use pipeline::{evaluate, PREDICATES};
