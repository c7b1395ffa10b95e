// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Loading compiled-graph metadata from disk.

use crate::{MetadataManifest, ModelError, NetworkMetadata, Validated};
use std::path::Path;

/// Default manifest filename inside a model directory.
pub const MANIFEST_FILE: &str = "metadata.json";

/// Loads metadata from disk into a validated [`NetworkMetadata`].
///
/// # Example
/// ```no_run
/// use model_ir::MetadataLoader;
/// use std::path::Path;
///
/// let metadata = MetadataLoader::load(Path::new("./models/resnet")).unwrap();
/// println!("{} outputs", metadata.outputs().len());
/// ```
pub struct MetadataLoader;

impl MetadataLoader {
    /// Loads `metadata.json` from `model_dir`, or `model_dir` itself when it
    /// points at a file.
    pub fn load(model_dir: &Path) -> Result<NetworkMetadata<Validated>, ModelError> {
        let path = if model_dir.is_file() {
            model_dir.to_path_buf()
        } else {
            model_dir.join(MANIFEST_FILE)
        };
        tracing::info!("loading graph metadata from {}", path.display());
        let manifest = MetadataManifest::from_file(&path)?;
        Self::from_manifest(manifest)
    }

    /// Validates an in-memory manifest.
    pub fn from_manifest(manifest: MetadataManifest) -> Result<NetworkMetadata<Validated>, ModelError> {
        manifest.validate()?;
        manifest.into_metadata().validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IoDescriptor;
    use tensor_core::{DType, PartialShape};

    fn manifest() -> MetadataManifest {
        MetadataManifest {
            name: "echo".into(),
            batch_size: Some(2),
            inputs: vec![IoDescriptor::data("x", DType::F32, PartialShape::from_static(&[1, 4]))],
            outputs: vec![IoDescriptor::data("y", DType::F32, PartialShape::from_static(&[1, 4]))],
        }
    }

    #[test]
    fn test_load_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE), manifest().to_json().unwrap()).unwrap();

        let metadata = MetadataLoader::load(dir.path()).unwrap();
        assert_eq!(metadata.name, "echo");
        assert_eq!(metadata.batch_size(), Some(2));
    }

    #[test]
    fn test_load_from_file_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.json");
        std::fs::write(&path, manifest().to_json().unwrap()).unwrap();
        assert!(MetadataLoader::load(&path).is_ok());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            MetadataLoader::load(dir.path()),
            Err(ModelError::ManifestReadError(_))
        ));
    }
}
