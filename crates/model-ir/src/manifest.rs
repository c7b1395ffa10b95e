// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! JSON metadata manifest.
//!
//! # Format
//! ```json
//! {
//!   "name": "dynamic-echo",
//!   "batch_size": null,
//!   "inputs": [
//!     { "name": "x", "precision": "f32", "shape": [1, {"max": 16}] }
//!   ],
//!   "outputs": [
//!     { "name": "y", "precision": "f32", "shape": [1, {"max": 16}], "related_index": 1 },
//!     { "name": "y", "precision": "u32", "shape": [2], "kind": "shape_tensor", "related_index": 0 }
//!   ]
//! }
//! ```

use crate::{IoDescriptor, Loaded, ModelError, NetworkMetadata};
use std::path::Path;

/// Top-level metadata manifest, deserialized from `metadata.json`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MetadataManifest {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub inputs: Vec<IoDescriptor>,
    pub outputs: Vec<IoDescriptor>,
}

impl MetadataManifest {
    /// Loads a manifest from a JSON file path.
    pub fn from_file(path: &Path) -> Result<Self, ModelError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parses a manifest from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        let manifest: Self = serde_json::from_str(json)?;
        Ok(manifest)
    }

    pub fn to_json(&self) -> Result<String, ModelError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Captures existing metadata, e.g. to persist a synthetic graph.
    pub fn from_metadata<S: crate::metadata::MetadataState>(metadata: &NetworkMetadata<S>) -> Self {
        Self {
            name: metadata.name.clone(),
            batch_size: metadata.batch_size(),
            inputs: metadata.inputs().to_vec(),
            outputs: metadata.outputs().to_vec(),
        }
    }

    /// Checks the fields that are not covered by metadata validation.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.name.trim().is_empty() {
            return Err(ModelError::InvalidMetadata("manifest name is empty".into()));
        }
        if let Some(desc) = self
            .inputs
            .iter()
            .chain(&self.outputs)
            .find(|d| d.name.trim().is_empty())
        {
            return Err(ModelError::InvalidDescriptor {
                name: desc.name.clone(),
                detail: "empty slot name".into(),
            });
        }
        Ok(())
    }

    /// Converts into unvalidated metadata.
    pub fn into_metadata(self) -> NetworkMetadata<Loaded> {
        NetworkMetadata::new(self.name, self.inputs, self.outputs).with_batch_size(self.batch_size)
    }
}
