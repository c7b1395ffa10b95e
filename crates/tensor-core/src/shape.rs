// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Concrete tensor shapes.

use std::fmt;

/// Batched layouts stack items along this axis.
pub const BATCH_AXIS: usize = 0;

/// A fully known tensor shape.
///
/// Caller tensors always carry a concrete `Shape`; only compiler
/// descriptors use [`crate::PartialShape`]. A rank-0 shape describes a
/// single element.
///
/// ```
/// use tensor_core::{Shape, BATCH_AXIS};
/// let s = Shape::new(vec![1, 3, 8]);
/// assert_eq!(s.num_elements(), 24);
/// assert_eq!(s.with_dim(BATCH_AXIS, 4).num_elements(), 96);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    pub fn new(dims: Vec<usize>) -> Self {
        Self { dims }
    }

    pub fn scalar() -> Self {
        Self::default()
    }

    pub fn vector(len: usize) -> Self {
        Self::new(vec![len])
    }

    pub fn matrix(rows: usize, cols: usize) -> Self {
        Self::new(vec![rows, cols])
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Product of all extents; the empty product covers the scalar case.
    pub fn num_elements(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn dim(&self, axis: usize) -> Option<usize> {
        self.dims.get(axis).copied()
    }

    /// Bytes needed to store this shape densely as `dtype`.
    pub fn size_bytes(&self, dtype: super::DType) -> usize {
        dtype.size_bytes() * self.num_elements()
    }

    /// Returns a copy with extent `value` on `axis`. Axes past the rank
    /// are ignored, so resizing the batch of a scalar is a no-op.
    pub fn with_dim(&self, axis: usize, value: usize) -> Shape {
        let dims = self
            .dims
            .iter()
            .enumerate()
            .map(|(i, &d)| if i == axis { value } else { d })
            .collect();
        Shape { dims }
    }

    /// Extent of [`BATCH_AXIS`], if the shape has one.
    pub fn batch(&self) -> Option<usize> {
        self.dim(BATCH_AXIS)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.dims.iter().map(usize::to_string).collect();
        write!(f, "[{}]", parts.join(", "))
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Self { dims }
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Self { dims: dims.to_vec() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DType;

    #[test]
    fn test_scalar_is_one_element_without_batch() {
        let s = Shape::scalar();
        assert_eq!(s.rank(), 0);
        assert_eq!(s.num_elements(), 1);
        assert_eq!(s.batch(), None);
        assert_eq!(s.with_dim(BATCH_AXIS, 8), s);
    }

    #[test]
    fn test_resize_batch() {
        let item = Shape::new(vec![1, 3, 16]);
        let batched = item.with_dim(BATCH_AXIS, 6);
        assert_eq!(batched.dims(), &[6, 3, 16]);
        assert_eq!(batched.batch(), Some(6));
        assert_eq!(item.with_dim(7, 2), item);
    }

    #[test]
    fn test_byte_size() {
        assert_eq!(Shape::matrix(3, 4).size_bytes(DType::F32), 48);
        assert_eq!(Shape::new(vec![4, 0]).size_bytes(DType::F64), 0);
    }

    #[test]
    fn test_display_and_conversions() {
        let a: Shape = vec![2, 3].into();
        let b: Shape = (&[2, 3][..]).into();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "[2, 3]");
        assert_eq!(Shape::scalar().to_string(), "[]");
    }
}
