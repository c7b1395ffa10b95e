// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! I/O slot descriptors.

use tensor_core::{DType, PartialShape};

/// What a graph slot carries. Fixed at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotKind {
    /// A caller-visible data tensor.
    #[default]
    Data,
    /// Reads a variable state; paired with a `StateOutput`.
    StateInput,
    /// Writes a variable state back; paired with a `StateInput`.
    StateOutput,
    /// Carries the runtime dims of a paired data slot as reversed `u32`s.
    ShapeTensor,
    /// Weights consumed by a weights-initialisation graph.
    InitInputWeights,
    /// Weights produced by a weights-initialisation graph.
    InitOutputWeights,
    /// Pre-processed weights fed to the main graph.
    MainInputWeights,
}

impl SlotKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SlotKind::Data => "data",
            SlotKind::StateInput => "state_input",
            SlotKind::StateOutput => "state_output",
            SlotKind::ShapeTensor => "shape_tensor",
            SlotKind::InitInputWeights => "init_input_weights",
            SlotKind::InitOutputWeights => "init_output_weights",
            SlotKind::MainInputWeights => "main_input_weights",
        }
    }

    /// Whether this kind may appear among a graph's inputs.
    pub fn allowed_as_input(self) -> bool {
        !matches!(self, SlotKind::StateOutput | SlotKind::InitOutputWeights)
    }

    /// Whether this kind may appear among a graph's outputs.
    pub fn allowed_as_output(self) -> bool {
        matches!(
            self,
            SlotKind::Data
                | SlotKind::StateOutput
                | SlotKind::ShapeTensor
                | SlotKind::InitOutputWeights
        )
    }
}

/// Describes one input or output slot of a compiled graph.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct IoDescriptor {
    /// Name as emitted by the compiler.
    pub name: String,
    pub precision: DType,
    /// Compiler shape; dynamic dims carry their upper bound.
    pub shape: PartialShape,
    #[serde(default)]
    pub kind: SlotKind,
    /// Index of the partner slot (see [`SlotKind`]).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_friendly_name: Option<String>,
    /// Additional tensor names the slot answers to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tensor_names: Vec<String>,
}

impl IoDescriptor {
    /// Creates a plain data slot.
    pub fn data(name: impl Into<String>, precision: DType, shape: PartialShape) -> Self {
        Self {
            name: name.into(),
            precision,
            shape,
            kind: SlotKind::Data,
            related_index: None,
            node_friendly_name: None,
            tensor_names: Vec::new(),
        }
    }

    /// Creates a state slot of the given kind, linked to `related_index`.
    pub fn state(
        name: impl Into<String>,
        kind: SlotKind,
        precision: DType,
        shape: PartialShape,
        related_index: usize,
    ) -> Self {
        Self {
            kind,
            related_index: Some(related_index),
            ..Self::data(name, precision, shape)
        }
    }

    /// Creates a shape-tensor slot for the data slot at `related_index`
    /// whose rank is `rank`.
    pub fn shape_tensor(name: impl Into<String>, rank: usize, related_index: usize) -> Self {
        Self {
            kind: SlotKind::ShapeTensor,
            related_index: Some(related_index),
            ..Self::data(name, DType::U32, PartialShape::from_static(&[rank]))
        }
    }

    pub fn with_related(mut self, index: usize) -> Self {
        self.related_index = Some(index);
        self
    }

    pub fn with_tensor_names(mut self, names: &[&str]) -> Self {
        self.tensor_names = names.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn is_state_input(&self) -> bool {
        self.kind == SlotKind::StateInput
    }

    pub fn is_state_output(&self) -> bool {
        self.kind == SlotKind::StateOutput
    }

    pub fn is_shape_tensor(&self) -> bool {
        self.kind == SlotKind::ShapeTensor
    }

    /// Only data slots are reachable through the caller-facing tensor API.
    pub fn is_user_visible(&self) -> bool {
        self.kind == SlotKind::Data
    }

    /// Returns `true` if `name` identifies this slot.
    pub fn answers_to(&self, name: &str) -> bool {
        self.name == name
            || self.node_friendly_name.as_deref() == Some(name)
            || self.tensor_names.iter().any(|n| n == name)
    }

    /// One-line description for logs and the inspector.
    pub fn summary(&self) -> String {
        let related = self
            .related_index
            .map(|i| format!(" -> #{i}"))
            .unwrap_or_default();
        format!(
            "{:<24} {:<14} {:>5} {}{}",
            self.name,
            self.kind.as_str(),
            self.precision,
            self.shape,
            related
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tensor_core::Dim;

    #[test]
    fn test_json_defaults_to_data() {
        let d: IoDescriptor =
            serde_json::from_str(r#"{"name":"x","precision":"f32","shape":[1,{"max":8}]}"#)
                .unwrap();
        assert_eq!(d.kind, SlotKind::Data);
        assert!(d.is_user_visible());
        assert_eq!(
            d.shape,
            PartialShape::new(vec![Dim::Static(1), Dim::Dynamic { max: 8 }])
        );
    }

    #[test]
    fn test_shape_tensor_constructor() {
        let d = IoDescriptor::shape_tensor("y", 3, 0);
        assert!(d.is_shape_tensor());
        assert_eq!(d.precision, DType::U32);
        assert_eq!(d.shape, PartialShape::from_static(&[3]));
        assert_eq!(d.related_index, Some(0));
    }

    #[test]
    fn test_answers_to_aliases() {
        let mut d = IoDescriptor::data("input_0", DType::F32, PartialShape::from_static(&[4]))
            .with_tensor_names(&["pixels", "image"]);
        d.node_friendly_name = Some("Parameter_1".into());
        assert!(d.answers_to("input_0"));
        assert!(d.answers_to("image"));
        assert!(d.answers_to("Parameter_1"));
        assert!(!d.answers_to("labels"));
    }

    #[test]
    fn test_kind_directions() {
        assert!(SlotKind::StateInput.allowed_as_input());
        assert!(!SlotKind::StateInput.allowed_as_output());
        assert!(SlotKind::StateOutput.allowed_as_output());
        assert!(!SlotKind::MainInputWeights.allowed_as_output());
    }
}
