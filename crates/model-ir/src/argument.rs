// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Device-side argument descriptors.
//!
//! The device knows each graph argument by an index, a name, a precision
//! and a fixed-rank dimension array. Non-data slots are named with a
//! kind prefix so that, e.g., the read and assign halves of one variable
//! state can share a base name:
//!
//! ```text
//!   IoDescriptor { name: "acc", kind: StateInput }  ↔  "read_value::acc"
//!   IoDescriptor { name: "acc", kind: StateOutput } ↔  "assign::acc"
//!   IoDescriptor { name: "y",   kind: ShapeTensor } ↔  "shape::y"
//! ```

use crate::{IoDescriptor, ModelError, SlotKind};
use tensor_core::DType;

/// Maximum rank of a device argument.
pub const MAX_ARGUMENT_DIMENSIONS: usize = 5;

pub const READ_VALUE_PREFIX: &str = "read_value::";
pub const ASSIGN_PREFIX: &str = "assign::";
pub const SHAPE_TENSOR_PREFIX: &str = "shape::";
pub const INIT_INPUT_WEIGHTS_PREFIX: &str = "init_in::";
pub const INIT_OUTPUT_WEIGHTS_PREFIX: &str = "init_out::";
pub const MAIN_INPUT_WEIGHTS_PREFIX: &str = "main_weights::";

const ALL_PREFIXES: [&str; 6] = [
    READ_VALUE_PREFIX,
    ASSIGN_PREFIX,
    SHAPE_TENSOR_PREFIX,
    INIT_INPUT_WEIGHTS_PREFIX,
    INIT_OUTPUT_WEIGHTS_PREFIX,
    MAIN_INPUT_WEIGHTS_PREFIX,
];

/// Returns the prefix the device uses for slots of `kind`.
pub fn prefix_for(kind: SlotKind) -> &'static str {
    match kind {
        SlotKind::Data => "",
        SlotKind::StateInput => READ_VALUE_PREFIX,
        SlotKind::StateOutput => ASSIGN_PREFIX,
        SlotKind::ShapeTensor => SHAPE_TENSOR_PREFIX,
        SlotKind::InitInputWeights => INIT_INPUT_WEIGHTS_PREFIX,
        SlotKind::InitOutputWeights => INIT_OUTPUT_WEIGHTS_PREFIX,
        SlotKind::MainInputWeights => MAIN_INPUT_WEIGHTS_PREFIX,
    }
}

/// Strips a slot-kind prefix from a device argument name, if present.
pub fn strip_slot_prefix(name: &str) -> &str {
    ALL_PREFIXES
        .iter()
        .find_map(|p| name.strip_prefix(p))
        .unwrap_or(name)
}

/// Returns the device argument name for an I/O descriptor.
pub fn argument_name(desc: &IoDescriptor) -> String {
    format!("{}{}", prefix_for(desc.kind), desc.name)
}

/// One argument of a compiled graph, as seen by the device.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ArgumentDescriptor {
    /// Argument index used when updating the pipeline's bindings.
    pub idx: u32,
    pub name: String,
    pub precision: DType,
    /// Always `MAX_ARGUMENT_DIMENSIONS` long; unused trailing dims are 1.
    pub dims: Vec<usize>,
}

impl ArgumentDescriptor {
    /// Builds the argument the device would expose for `desc`.
    pub fn for_slot(desc: &IoDescriptor, idx: u32) -> Self {
        let mut dims = desc.shape.max_shape().dims().to_vec();
        if dims.len() < MAX_ARGUMENT_DIMENSIONS {
            dims.resize(MAX_ARGUMENT_DIMENSIONS, 1);
        }
        Self {
            idx,
            name: argument_name(desc),
            precision: desc.precision,
            dims,
        }
    }

    /// Checks that this argument agrees with `desc` on name, precision and
    /// dimensions.
    pub fn check(&self, desc: &IoDescriptor) -> Result<(), ModelError> {
        let mismatch = |detail: String| ModelError::ArgumentMismatch {
            name: desc.name.clone(),
            detail,
        };

        let base = strip_slot_prefix(&self.name);
        if base != desc.name {
            return Err(mismatch(format!(
                "argument #{} is named '{}'",
                self.idx, self.name
            )));
        }

        if self.precision != desc.precision {
            return Err(mismatch(format!(
                "precision {} vs argument precision {}",
                desc.precision, self.precision
            )));
        }

        let max_shape = desc.shape.max_shape();
        let rank = max_shape.rank();
        if rank > MAX_ARGUMENT_DIMENSIONS || rank > self.dims.len() {
            return Err(mismatch(format!(
                "rank {rank} exceeds argument rank {}",
                self.dims.len().min(MAX_ARGUMENT_DIMENSIONS)
            )));
        }

        for (axis, (&expected, &actual)) in max_shape.dims().iter().zip(&self.dims).enumerate() {
            if expected != actual {
                return Err(mismatch(format!(
                    "dim {axis} is {expected} but the argument has {actual}"
                )));
            }
        }

        if let Some(axis) = self.dims[rank..].iter().position(|&d| d > 1) {
            return Err(mismatch(format!(
                "unused argument dim {} is {}, expected 0 or 1",
                rank + axis,
                self.dims[rank + axis]
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tensor_core::{Dim, PartialShape};

    fn input() -> IoDescriptor {
        IoDescriptor::data(
            "x",
            DType::F32,
            PartialShape::new(vec![Dim::Static(1), Dim::Dynamic { max: 16 }]),
        )
    }

    #[test]
    fn test_for_slot_pads_dims() {
        let arg = ArgumentDescriptor::for_slot(&input(), 3);
        assert_eq!(arg.idx, 3);
        assert_eq!(arg.name, "x");
        assert_eq!(arg.dims, vec![1, 16, 1, 1, 1]);
        arg.check(&input()).unwrap();
    }

    #[test]
    fn test_prefixed_names_round_trip() {
        let state = IoDescriptor::state(
            "acc",
            SlotKind::StateOutput,
            DType::F32,
            PartialShape::from_static(&[4]),
            0,
        );
        let arg = ArgumentDescriptor::for_slot(&state, 7);
        assert_eq!(arg.name, "assign::acc");
        assert_eq!(strip_slot_prefix(&arg.name), "acc");
        arg.check(&state).unwrap();
    }

    #[test]
    fn test_unprefixed_names_untouched() {
        assert_eq!(strip_slot_prefix("plain"), "plain");
        assert_eq!(strip_slot_prefix("shape::y"), "y");
    }

    #[test]
    fn test_precision_mismatch() {
        let mut arg = ArgumentDescriptor::for_slot(&input(), 0);
        arg.precision = DType::F16;
        let err = arg.check(&input()).unwrap_err();
        assert!(err.to_string().contains("precision f32 vs argument precision f16"));
    }

    #[test]
    fn test_dim_mismatch() {
        let mut arg = ArgumentDescriptor::for_slot(&input(), 0);
        arg.dims[1] = 8;
        assert!(matches!(
            arg.check(&input()),
            Err(ModelError::ArgumentMismatch { .. })
        ));
    }

    #[test]
    fn test_unused_dims_must_be_trivial() {
        let mut arg = ArgumentDescriptor::for_slot(&input(), 0);
        arg.dims[4] = 0;
        arg.check(&input()).unwrap();
        arg.dims[4] = 2;
        assert!(arg.check(&input()).is_err());
    }

    #[test]
    fn test_name_mismatch() {
        let mut arg = ArgumentDescriptor::for_slot(&input(), 0);
        arg.name = "read_value::z".into();
        assert!(arg.check(&input()).is_err());
    }
}
