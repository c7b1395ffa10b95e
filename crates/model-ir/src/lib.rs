// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # model-ir
//!
//! The metadata a compiled graph exposes to the request runtime.
//!
//! - [`IoDescriptor`]: one input or output slot: compiler name, precision,
//!   compiler shape, and its [`SlotKind`] (plain data, variable-state
//!   read/assign, shape tensor, weights). Shape tensors and state slots
//!   point at their partner through `related_index`.
//! - [`NetworkMetadata`]: the ordered input and output descriptors, with a
//!   **type-state pattern** (`Loaded` → `Validated`) so the runtime only
//!   ever binds against linkage-checked metadata.
//! - [`ArgumentDescriptor`]: the device-side view of one graph argument
//!   (argument index, prefixed name, precision, padded dims) and the check
//!   that it agrees with its I/O descriptor.
//! - [`MetadataManifest`] / [`MetadataLoader`]: JSON persistence
//!   (`metadata.json`).
//!
//! # Example
//! ```no_run
//! use model_ir::MetadataLoader;
//! use std::path::Path;
//!
//! let metadata = MetadataLoader::load(Path::new("./models/resnet")).unwrap();
//! println!("{}", metadata.summary());
//! for input in metadata.inputs() {
//!     println!("  {}", input.summary());
//! }
//! ```

pub mod argument;
mod descriptor;
mod error;
mod loader;
mod manifest;
pub mod metadata;

pub use argument::{strip_slot_prefix, ArgumentDescriptor, MAX_ARGUMENT_DIMENSIONS};
pub use descriptor::{IoDescriptor, SlotKind};
pub use error::ModelError;
pub use loader::MetadataLoader;
pub use manifest::MetadataManifest;
pub use metadata::{Loaded, NetworkMetadata, Validated};
