// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for graph metadata.

/// Errors that can occur when loading or checking graph metadata.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// The metadata file could not be read.
    #[error("failed to read metadata: {0}")]
    ManifestReadError(#[from] std::io::Error),

    /// The metadata JSON is malformed.
    #[error("failed to parse metadata: {0}")]
    ManifestParseError(#[from] serde_json::Error),

    /// A single descriptor is malformed or its linkage is broken.
    #[error("invalid descriptor '{name}': {detail}")]
    InvalidDescriptor { name: String, detail: String },

    /// The metadata as a whole is unusable.
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    /// An I/O descriptor disagrees with the device argument bound to it.
    #[error("descriptor '{name}' does not match its device argument: {detail}")]
    ArgumentMismatch { name: String, detail: String },
}
