// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Variable states of stateful graphs.
//!
//! A variable state is carried by a read slot (a state input) and an
//! assign slot (the related state output). Both are bound to the same
//! tensor, so whatever the graph assigns is read back on the next
//! inference.
//!
//! Replacing the state tensor raises `tensor_updated`; the request then
//! rebinds its user slots before the next submission. When the new tensor
//! can be bound without a copy, `zero_tensor_updated` is raised too and the
//! device slots follow.

use crate::tensor::{Tensor, TensorKind};
use crate::RuntimeError;
use memory_manager::DeviceContext;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

pub struct VariableState {
    name: String,
    state: RwLock<Tensor>,
    /// Index of the state input slot.
    tensor_index: usize,
    /// Index of the state output slot.
    related_tensor_index: usize,
    context: DeviceContext,
    mutable_command_lists: bool,
    tensor_updated: AtomicBool,
    zero_tensor_updated: AtomicBool,
}

impl VariableState {
    pub(crate) fn new(
        name: impl Into<String>,
        tensor: Tensor,
        tensor_index: usize,
        related_tensor_index: usize,
        context: DeviceContext,
        mutable_command_lists: bool,
    ) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(tensor),
            tensor_index,
            related_tensor_index,
            context,
            mutable_command_lists,
            tensor_updated: AtomicBool::new(false),
            zero_tensor_updated: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The current state tensor.
    pub fn state(&self) -> Tensor {
        self.state.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Replaces the state tensor.
    ///
    /// The new tensor must match the current one in precision and shape.
    /// Remote tensors must belong to the request's device context.
    pub fn set_state(&self, tensor: Tensor) -> Result<(), RuntimeError> {
        let current = self.state();
        if tensor.dtype() != current.dtype() || tensor.shape() != current.shape() {
            return Err(RuntimeError::Validation {
                port: self.name.clone(),
                detail: format!(
                    "state expects {} {}, got {} {}",
                    current.dtype(),
                    current.shape(),
                    tensor.dtype(),
                    tensor.shape()
                ),
            });
        }

        let bindable = match tensor.kind() {
            TensorKind::Remote => {
                if tensor.allocation_context() != Some(self.context.id()) {
                    return Err(RuntimeError::Unsupported(
                        "Using different context for creating the tensor is not supported".into(),
                    ));
                }
                true
            }
            _ => self.context.contains_address(tensor.address()),
        };

        *self.state.write().unwrap_or_else(PoisonError::into_inner) = tensor;
        self.tensor_updated.store(true, Ordering::Release);
        if self.mutable_command_lists && bindable {
            self.zero_tensor_updated.store(true, Ordering::Release);
        }
        tracing::debug!("state '{}' replaced (bindable: {bindable})", self.name);
        Ok(())
    }

    /// Zero-fills the state.
    pub fn reset(&self) {
        self.state().fill_zero();
    }

    pub fn tensor_index(&self) -> usize {
        self.tensor_index
    }

    pub fn related_tensor_index(&self) -> usize {
        self.related_tensor_index
    }

    pub(crate) fn tensor_was_updated(&self) -> bool {
        self.tensor_updated.load(Ordering::Acquire)
    }

    pub(crate) fn reset_tensor_updated_flag(&self) {
        self.tensor_updated.store(false, Ordering::Release);
    }

    pub(crate) fn zero_tensor_should_be_updated(&self) -> bool {
        self.zero_tensor_updated.load(Ordering::Acquire)
    }

    pub(crate) fn reset_zero_tensor_updated_flag(&self) {
        self.zero_tensor_updated.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for VariableState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariableState")
            .field("name", &self.name)
            .field("tensor_index", &self.tensor_index)
            .field("related_tensor_index", &self.related_tensor_index)
            .field("tensor_updated", &self.tensor_was_updated())
            .finish()
    }
}
