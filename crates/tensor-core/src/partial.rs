// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Compiler shapes with bounded dynamic dimensions.
//!
//! A compiled graph declares each argument's shape as a [`PartialShape`].
//! Static dimensions must be matched exactly by caller tensors; dynamic
//! dimensions accept any extent up to their bound.
//!
//! ```text
//!   PartialShape [1, ?<=16]
//!        │
//!        ├── max_shape()      → [1, 16]   (device buffer size)
//!        ├── accepts([1, 7])  → true
//!        └── accepts([1, 17]) → false
//! ```
//!
//! In manifests a static dimension serializes as a plain integer and a
//! dynamic one as `{"max": N}`.

use crate::shape::BATCH_AXIS;
use crate::{Shape, TensorError};
use std::fmt;

/// One dimension of a compiler shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum Dim {
    /// A dimension fixed at compile time.
    Static(usize),
    /// A dimension resolved per inference, bounded by `max`.
    Dynamic { max: usize },
}

impl Dim {
    /// The largest extent this dimension can take.
    pub fn max(self) -> usize {
        match self {
            Dim::Static(d) => d,
            Dim::Dynamic { max } => max,
        }
    }

    pub fn is_dynamic(self) -> bool {
        matches!(self, Dim::Dynamic { .. })
    }

    /// Returns `true` if a concrete extent satisfies this dimension.
    pub fn accepts(self, extent: usize) -> bool {
        match self {
            Dim::Static(d) => d == extent,
            Dim::Dynamic { max } => extent <= max,
        }
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Static(d) => write!(f, "{d}"),
            Dim::Dynamic { max } => write!(f, "?<={max}"),
        }
    }
}

/// A shape as produced by the graph compiler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct PartialShape {
    dims: Vec<Dim>,
}

impl PartialShape {
    pub fn new(dims: Vec<Dim>) -> Self {
        Self { dims }
    }

    /// A fully static compiler shape.
    pub fn from_static(dims: &[usize]) -> Self {
        Self {
            dims: dims.iter().map(|&d| Dim::Static(d)).collect(),
        }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn dims(&self) -> &[Dim] {
        &self.dims
    }

    /// Returns `true` if any dimension is dynamic.
    pub fn is_dynamic(&self) -> bool {
        self.dims.iter().any(|d| d.is_dynamic())
    }

    /// The concrete shape that covers every admissible extent.
    pub fn max_shape(&self) -> Shape {
        Shape::new(self.dims.iter().map(|d| d.max()).collect())
    }

    /// Returns the static shape, or `None` if any dimension is dynamic.
    pub fn to_static(&self) -> Option<Shape> {
        if self.is_dynamic() {
            None
        } else {
            Some(self.max_shape())
        }
    }

    /// Returns `true` if `shape` has the same rank and every extent is
    /// admissible.
    pub fn accepts(&self, shape: &Shape) -> bool {
        shape.rank() == self.rank()
            && self
                .dims
                .iter()
                .zip(shape.dims())
                .all(|(dim, &extent)| dim.accepts(extent))
    }

    /// Like [`accepts`](Self::accepts), but produces a descriptive error.
    pub fn check(&self, shape: &Shape) -> Result<(), TensorError> {
        if self.accepts(shape) {
            Ok(())
        } else {
            Err(TensorError::IncompatibleShape {
                expected: self.clone(),
                actual: shape.clone(),
            })
        }
    }

    /// Returns a copy with the batch dimension fixed to `batch`.
    pub fn with_batch(&self, batch: usize) -> PartialShape {
        let mut dims = self.dims.clone();
        if let Some(d) = dims.get_mut(BATCH_AXIS) {
            *d = Dim::Static(batch);
        }
        PartialShape { dims }
    }
}

impl fmt::Display for PartialShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, "]")
    }
}

impl From<&Shape> for PartialShape {
    fn from(shape: &Shape) -> Self {
        PartialShape::from_static(shape.dims())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn dynamic_row() -> PartialShape {
        PartialShape::new(vec![Dim::Static(1), Dim::Dynamic { max: 16 }])
    }

    #[test]
    fn test_max_shape() {
        assert_eq!(dynamic_row().max_shape(), Shape::new(vec![1, 16]));
        assert!(dynamic_row().to_static().is_none());
        assert_eq!(
            PartialShape::from_static(&[2, 3]).to_static(),
            Some(Shape::matrix(2, 3))
        );
    }

    #[test]
    fn test_accepts() {
        let p = dynamic_row();
        assert!(p.accepts(&Shape::new(vec![1, 0])));
        assert!(p.accepts(&Shape::new(vec![1, 16])));
        assert!(!p.accepts(&Shape::new(vec![1, 17])));
        assert!(!p.accepts(&Shape::new(vec![2, 4])));
        assert!(!p.accepts(&Shape::vector(4)));
    }

    #[test]
    fn test_check_error_message() {
        let err = dynamic_row().check(&Shape::new(vec![1, 20])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "shape [1, 20] is not compatible with [1, ?<=16]"
        );
    }

    #[test]
    fn test_with_batch() {
        let p = PartialShape::new(vec![Dim::Dynamic { max: 8 }, Dim::Static(3)]);
        assert_eq!(p.with_batch(4), PartialShape::from_static(&[4, 3]));
    }

    #[test]
    fn test_serde_mixed_dims() {
        let p: PartialShape = serde_json::from_str(r#"[1, {"max": 16}]"#).unwrap();
        assert_eq!(p, dynamic_row());
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, r#"[1,{"max":16}]"#);
    }

    proptest! {
        #[test]
        fn prop_max_shape_is_accepted(dims in proptest::collection::vec((0usize..32, any::<bool>()), 0..5)) {
            let p = PartialShape::new(
                dims.iter()
                    .map(|&(d, dynamic)| if dynamic { Dim::Dynamic { max: d } } else { Dim::Static(d) })
                    .collect(),
            );
            prop_assert!(p.accepts(&p.max_shape()));
        }
    }
}
