// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # tensor-core
//!
//! Element types and shape descriptors shared by the inference request
//! runtime.
//!
//! This crate provides:
//! - [`DType`]: the element precisions a compiled graph may declare.
//! - [`Shape`]: a concrete, fully known tensor shape.
//! - [`PartialShape`] / [`Dim`]: a compiler shape whose dimensions may be
//!   dynamic with a known upper bound. Device buffers are always sized from
//!   [`PartialShape::max_shape`].
//! - [`codec`]: little-endian element encoding used for shape-tensor
//!   payloads (`u32`) and `f32` data in kernels and tests.
//!
//! # Example
//! ```
//! use tensor_core::{DType, Dim, PartialShape, Shape};
//!
//! let compiler = PartialShape::new(vec![Dim::Static(1), Dim::Dynamic { max: 16 }]);
//! assert!(compiler.is_dynamic());
//! assert_eq!(compiler.max_shape(), Shape::new(vec![1, 16]));
//! assert!(compiler.accepts(&Shape::new(vec![1, 7])));
//! assert_eq!(compiler.max_shape().size_bytes(DType::F32), 64);
//! ```

pub mod codec;
mod dtype;
mod error;
mod partial;
mod shape;

pub use dtype::DType;
pub use error::TensorError;
pub use partial::{Dim, PartialShape};
pub use shape::{Shape, BATCH_AXIS};
