// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Append-only audit records for configuration, flag and secret mutations.

pub mod diff;
pub mod error;
pub mod event;

pub use diff::compute_diff;
pub use error::AuditError;
pub use event::{AuditAction, AuditLogBuilder, AuditLogEntry, AuditResourceType};
