// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the request runtime.

/// A failure reported by the device while executing a request.
///
/// This is the value carried through completion callbacks and stored in the
/// request pool's sticky error cell, so it is cheap to clone and compare.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("device execution failed: {detail}")]
pub struct DeviceError {
    pub detail: String,
}

impl DeviceError {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

impl From<&RuntimeError> for DeviceError {
    fn from(err: &RuntimeError) -> Self {
        match err {
            RuntimeError::DeviceExecution(inner) => inner.clone(),
            other => DeviceError::new(other.to_string()),
        }
    }
}

/// Errors that can occur while binding tensors or running requests.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// A caller tensor was rejected for a port.
    #[error("failed to set tensor '{port}': {detail}")]
    Validation { port: String, detail: String },

    /// No caller-visible port answers to this name.
    #[error("port not found: '{0}'")]
    PortNotFound(String),

    /// The device reported a failure.
    #[error(transparent)]
    DeviceExecution(#[from] DeviceError),

    /// An internal invariant was violated.
    #[error("internal consistency error: {0}")]
    InternalConsistency(String),

    /// The operation is not supported in this configuration.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// The request is executing and cannot be modified or restarted.
    #[error("request is busy")]
    Busy,

    /// Device memory allocation failed.
    #[error("memory error: {0}")]
    MemoryError(#[from] memory_manager::MemoryError),

    /// Graph metadata is unusable.
    #[error("model error: {0}")]
    ModelError(#[from] model_ir::ModelError),

    /// A shape or payload could not be interpreted.
    #[error("tensor error: {0}")]
    TensorError(#[from] tensor_core::TensorError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),
}
