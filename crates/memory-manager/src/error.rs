// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for device memory management.

use crate::ContextId;

/// Failures of a [`DeviceContext`](crate::DeviceContext) or of budget parsing.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("context {context}: cannot allocate {requested_bytes} bytes, {available_bytes} of {budget_bytes} left")]
    OutOfMemory {
        context: ContextId,
        requested_bytes: usize,
        available_bytes: usize,
        budget_bytes: usize,
    },

    #[error("device buffers must hold at least one byte")]
    ZeroSizedAllocation,

    #[error("invalid memory budget {0}")]
    InvalidBudget(String),
}
