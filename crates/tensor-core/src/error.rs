// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for shape and element handling.

use crate::{PartialShape, Shape};

/// Errors that can occur while interpreting tensor shapes and payloads.
#[derive(Debug, thiserror::Error)]
pub enum TensorError {
    /// The provided buffer size does not match the expected size for the given shape and dtype.
    #[error("buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    /// A concrete shape falls outside the bounds of a compiler shape.
    #[error("shape {actual} is not compatible with {expected}")]
    IncompatibleShape {
        expected: PartialShape,
        actual: Shape,
    },

    /// A byte payload cannot be decoded as the requested element type.
    #[error("payload of {len} bytes is not a whole number of {dtype} elements")]
    MisalignedPayload { len: usize, dtype: crate::DType },

    /// A dimension value does not fit in the wire representation.
    #[error("dimension {value} does not fit in {target}")]
    DimensionOverflow { value: usize, target: &'static str },
}
