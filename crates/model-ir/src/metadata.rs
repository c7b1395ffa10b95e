// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Network metadata: the ordered input and output slots of a compiled graph.
//!
//! # Type-State Pattern
//!
//! ```text
//! NetworkMetadata<Loaded>    : descriptors parsed, linkage unchecked.
//!       │  .validate()
//!       ▼
//! NetworkMetadata<Validated> : every related index resolved, names unique.
//! ```
//!
//! Request code indexes `related_index` without re-checking it, so only
//! validated metadata can be compiled.

use crate::argument::argument_name;
use crate::{IoDescriptor, ModelError, SlotKind};
use std::collections::HashSet;
use std::fmt;
use tensor_core::DType;

// ── Type-state markers ─────────────────────────────────────────────

/// Marker: metadata parsed but not validated.
#[derive(Debug, Clone)]
pub struct Loaded;

/// Marker: metadata validated.
#[derive(Debug, Clone)]
pub struct Validated;

/// Sealed trait for metadata states.
pub trait MetadataState: fmt::Debug + Clone {}
impl MetadataState for Loaded {}
impl MetadataState for Validated {}

// ── NetworkMetadata ────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct NetworkMetadata<S: MetadataState = Loaded> {
    pub name: String,
    inputs: Vec<IoDescriptor>,
    outputs: Vec<IoDescriptor>,
    /// Batch size the caller-facing tensors carry when the graph itself
    /// was compiled for batch 1.
    batch_size: Option<usize>,
    _state: std::marker::PhantomData<S>,
}

#[derive(Clone, Copy)]
enum Direction {
    Input,
    Output,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::Input => "input",
            Direction::Output => "output",
        }
    }
}

// ── Loaded state ───────────────────────────────────────────────────

impl NetworkMetadata<Loaded> {
    pub fn new(name: impl Into<String>, inputs: Vec<IoDescriptor>, outputs: Vec<IoDescriptor>) -> Self {
        Self {
            name: name.into(),
            inputs,
            outputs,
            batch_size: None,
            _state: std::marker::PhantomData,
        }
    }

    pub fn with_batch_size(mut self, batch_size: Option<usize>) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Validates the metadata and transitions to the `Validated` state.
    ///
    /// # Checks
    /// - At least one output exists.
    /// - Every slot kind is legal for its direction.
    /// - Device argument names are unique per direction.
    /// - Shape tensors are rank-1 `u32` with one element per dim of their
    ///   related data slot, which lives in the same direction.
    /// - State inputs and outputs point at each other and agree on
    ///   precision and shape.
    /// - A batch size, if present, is non-zero.
    pub fn validate(self) -> Result<NetworkMetadata<Validated>, ModelError> {
        if self.outputs.is_empty() {
            return Err(ModelError::InvalidMetadata(format!(
                "'{}' declares no outputs",
                self.name
            )));
        }
        if self.batch_size == Some(0) {
            return Err(ModelError::InvalidMetadata("batch size must be positive".into()));
        }

        for (direction, slots) in [(Direction::Input, &self.inputs), (Direction::Output, &self.outputs)] {
            let mut seen = HashSet::new();
            for desc in slots {
                let legal = match direction {
                    Direction::Input => desc.kind.allowed_as_input(),
                    Direction::Output => desc.kind.allowed_as_output(),
                };
                if !legal {
                    return Err(invalid(desc, format!(
                        "{} slots cannot be used as an {}",
                        desc.kind.as_str(),
                        direction.as_str()
                    )));
                }
                if !seen.insert(argument_name(desc)) {
                    return Err(invalid(desc, format!("duplicate {} name", direction.as_str())));
                }
            }
        }

        for (direction, slots, partners) in [
            (Direction::Input, &self.inputs, &self.outputs),
            (Direction::Output, &self.outputs, &self.inputs),
        ] {
            for (index, desc) in slots.iter().enumerate() {
                check_linkage(direction, index, desc, slots, partners)?;
            }
        }

        tracing::debug!(
            "validated metadata '{}': {} inputs, {} outputs",
            self.name,
            self.inputs.len(),
            self.outputs.len()
        );

        Ok(NetworkMetadata {
            name: self.name,
            inputs: self.inputs,
            outputs: self.outputs,
            batch_size: self.batch_size,
            _state: std::marker::PhantomData,
        })
    }
}

fn invalid(desc: &IoDescriptor, detail: String) -> ModelError {
    ModelError::InvalidDescriptor {
        name: desc.name.clone(),
        detail,
    }
}

fn related<'a>(
    desc: &IoDescriptor,
    pool: &'a [IoDescriptor],
    what: &str,
) -> Result<(usize, &'a IoDescriptor), ModelError> {
    let index = desc
        .related_index
        .ok_or_else(|| invalid(desc, format!("missing related {what} index")))?;
    let partner = pool
        .get(index)
        .ok_or_else(|| invalid(desc, format!("related {what} index {index} out of range")))?;
    Ok((index, partner))
}

fn check_linkage(
    direction: Direction,
    index: usize,
    desc: &IoDescriptor,
    same_side: &[IoDescriptor],
    other_side: &[IoDescriptor],
) -> Result<(), ModelError> {
    match desc.kind {
        SlotKind::ShapeTensor => {
            let (_, data) = related(desc, same_side, "data")?;
            if data.kind != SlotKind::Data {
                return Err(invalid(desc, format!(
                    "shape tensor must describe a data slot, not {}",
                    data.kind.as_str()
                )));
            }
            if desc.precision != DType::U32 {
                return Err(invalid(desc, "shape tensors must be u32".into()));
            }
            let expected = [data.shape.rank()];
            if desc.shape.to_static().as_ref().map(|s| s.dims()) != Some(&expected[..]) {
                return Err(invalid(desc, format!(
                    "shape tensor shape {} cannot hold the {} dims of '{}'",
                    desc.shape,
                    data.shape.rank(),
                    data.name
                )));
            }
        }
        SlotKind::StateInput | SlotKind::StateOutput => {
            let (_, partner) = related(desc, other_side, "state")?;
            let expected_kind = match direction {
                Direction::Input => SlotKind::StateOutput,
                Direction::Output => SlotKind::StateInput,
            };
            if partner.kind != expected_kind || partner.related_index != Some(index) {
                return Err(invalid(desc, format!(
                    "state partner '{}' does not point back",
                    partner.name
                )));
            }
            if partner.name != desc.name
                || partner.precision != desc.precision
                || partner.shape != desc.shape
            {
                return Err(invalid(desc, format!(
                    "state halves disagree: {} {} vs {} {}",
                    desc.precision, desc.shape, partner.precision, partner.shape
                )));
            }
        }
        SlotKind::Data => {
            if desc.related_index.is_some() {
                let (_, shape) = related(desc, same_side, "shape tensor")?;
                if shape.kind != SlotKind::ShapeTensor || shape.related_index != Some(index) {
                    return Err(invalid(desc, "related slot is not its shape tensor".into()));
                }
            }
        }
        SlotKind::InitInputWeights | SlotKind::InitOutputWeights | SlotKind::MainInputWeights => {}
    }
    Ok(())
}

// ── Shared accessors ───────────────────────────────────────────────

impl<S: MetadataState> NetworkMetadata<S> {
    pub fn inputs(&self) -> &[IoDescriptor] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[IoDescriptor] {
        &self.outputs
    }

    pub fn batch_size(&self) -> Option<usize> {
        self.batch_size
    }
}

// ── Validated state ────────────────────────────────────────────────

impl NetworkMetadata<Validated> {
    pub fn input(&self, index: usize) -> Option<&IoDescriptor> {
        self.inputs.get(index)
    }

    pub fn output(&self, index: usize) -> Option<&IoDescriptor> {
        self.outputs.get(index)
    }

    /// Finds the caller-visible input answering to `name`.
    pub fn find_input(&self, name: &str) -> Option<usize> {
        self.inputs
            .iter()
            .position(|d| d.is_user_visible() && d.answers_to(name))
    }

    /// Finds the caller-visible output answering to `name`.
    pub fn find_output(&self, name: &str) -> Option<usize> {
        self.outputs
            .iter()
            .position(|d| d.is_user_visible() && d.answers_to(name))
    }

    /// Iterates over `(input_index, descriptor)` for every state input.
    pub fn state_inputs(&self) -> impl Iterator<Item = (usize, &IoDescriptor)> {
        self.inputs
            .iter()
            .enumerate()
            .filter(|(_, d)| d.is_state_input())
    }

    pub fn summary(&self) -> String {
        let states = self.state_inputs().count();
        let shape_tensors = self
            .inputs
            .iter()
            .chain(&self.outputs)
            .filter(|d| d.is_shape_tensor())
            .count();
        let batch = self
            .batch_size
            .map(|b| format!(", batch {b}"))
            .unwrap_or_default();
        format!(
            "{}: {} inputs, {} outputs, {} states, {} shape tensors{}",
            self.name,
            self.inputs.len(),
            self.outputs.len(),
            states,
            shape_tensors,
            batch
        )
    }
}

impl<S: MetadataState> fmt::Display for NetworkMetadata<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "NetworkMetadata({}, {} inputs, {} outputs)",
            self.name,
            self.inputs.len(),
            self.outputs.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tensor_core::{Dim, PartialShape};

    fn f32_vec(n: usize) -> PartialShape {
        PartialShape::from_static(&[n])
    }

    fn stateful() -> NetworkMetadata<Loaded> {
        NetworkMetadata::new(
            "accumulator",
            vec![
                IoDescriptor::data("x", DType::F32, f32_vec(4)),
                IoDescriptor::state("acc", SlotKind::StateInput, DType::F32, f32_vec(4), 1),
            ],
            vec![
                IoDescriptor::data("y", DType::F32, f32_vec(4)),
                IoDescriptor::state("acc", SlotKind::StateOutput, DType::F32, f32_vec(4), 1),
            ],
        )
    }

    #[test]
    fn test_valid_stateful_metadata() {
        let m = stateful().validate().unwrap();
        assert_eq!(m.state_inputs().map(|(i, _)| i).collect::<Vec<_>>(), vec![1]);
        assert_eq!(m.find_input("x"), Some(0));
        // State slots are not reachable by name.
        assert_eq!(m.find_input("acc"), None);
        assert!(m.summary().contains("1 states"));
    }

    #[test]
    fn test_state_must_point_back() {
        let mut m = stateful();
        m.outputs[1].related_index = Some(0);
        let err = m.validate().unwrap_err();
        assert!(err.to_string().contains("does not point back"));
    }

    #[test]
    fn test_state_halves_must_agree() {
        let mut m = stateful();
        m.outputs[1].shape = f32_vec(8);
        assert!(matches!(
            m.validate(),
            Err(ModelError::InvalidDescriptor { .. })
        ));
    }

    #[test]
    fn test_shape_tensor_linkage() {
        let dynamic = PartialShape::new(vec![Dim::Static(1), Dim::Dynamic { max: 16 }]);
        let ok = NetworkMetadata::new(
            "dynamic",
            vec![IoDescriptor::data("x", DType::F32, dynamic.clone())],
            vec![
                IoDescriptor::data("y", DType::F32, dynamic.clone()).with_related(1),
                IoDescriptor::shape_tensor("y", 2, 0),
            ],
        );
        ok.validate().unwrap();

        let wrong_rank = NetworkMetadata::new(
            "dynamic",
            vec![],
            vec![
                IoDescriptor::data("y", DType::F32, dynamic),
                IoDescriptor::shape_tensor("y", 3, 0),
            ],
        );
        assert!(wrong_rank.validate().is_err());
    }

    #[test]
    fn test_shape_tensor_without_related_index() {
        let mut st = IoDescriptor::shape_tensor("y", 1, 0);
        st.related_index = None;
        let m = NetworkMetadata::new(
            "broken",
            vec![],
            vec![IoDescriptor::data("y", DType::F32, f32_vec(2)), st],
        );
        let err = m.validate().unwrap_err();
        assert!(err.to_string().contains("missing related data index"));
    }

    #[test]
    fn test_related_index_out_of_range() {
        let m = NetworkMetadata::new(
            "broken",
            vec![],
            vec![
                IoDescriptor::data("y", DType::F32, f32_vec(2)),
                IoDescriptor::shape_tensor("y", 1, 9),
            ],
        );
        assert!(m.validate().unwrap_err().to_string().contains("out of range"));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let m = NetworkMetadata::new(
            "dup",
            vec![
                IoDescriptor::data("x", DType::F32, f32_vec(2)),
                IoDescriptor::data("x", DType::F32, f32_vec(2)),
            ],
            vec![IoDescriptor::data("y", DType::F32, f32_vec(2))],
        );
        assert!(m.validate().unwrap_err().to_string().contains("duplicate input"));
    }

    #[test]
    fn test_kind_direction_enforced() {
        let m = NetworkMetadata::new(
            "bad",
            vec![],
            vec![IoDescriptor {
                kind: SlotKind::MainInputWeights,
                ..IoDescriptor::data("w", DType::F32, f32_vec(2))
            }],
        );
        assert!(m.validate().is_err());
    }

    #[test]
    fn test_no_outputs_rejected() {
        let m = NetworkMetadata::new("empty", vec![], vec![]);
        assert!(matches!(m.validate(), Err(ModelError::InvalidMetadata(_))));
    }

    #[test]
    fn test_zero_batch_rejected() {
        let m = stateful().with_batch_size(Some(0));
        assert!(m.validate().is_err());
    }
}
