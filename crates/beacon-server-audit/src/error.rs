// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuditError {
	#[error("unknown audit action: {0}")]
	UnknownAction(String),

	#[error("unknown audit resource type: {0}")]
	UnknownResourceType(String),
}
