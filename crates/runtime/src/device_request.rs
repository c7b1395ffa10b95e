// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The stateful request a caller binds tensors to.
//!
//! Every I/O slot of the compiled graph has two sides:
//!
//! ```text
//!   user tensor(s)    what set_tensor / get_tensor exchange with the caller
//!   device tensor(s)  what the pipeline arguments are bound to
//! ```
//!
//! When a caller tensor lives in the request's device context the two sides
//! alias the same tensor and nothing is copied. Otherwise the device side
//! is a request-owned allocation and `infer_async` / `get_result` copy in
//! and out of it. Batched inputs carry one user tensor per batch item.
//!
//! Per slot the binding moves `Unbound → UserBound → DeviceBound →
//! PipelineBuilt`; [`DeviceRequest::slot_state`] reports where a slot is.

use crate::config::{DryRunFlag, RuntimeConfig};
use crate::graph::CompiledGraph;
use crate::pipeline::{Pipeline, ProfilingInfo};
use crate::tensor::{copy_region, Tensor, TensorKind};
use crate::variable_state::VariableState;
use crate::RuntimeError;
use memory_manager::DeviceContext;
use model_ir::{IoDescriptor, NetworkMetadata, SlotKind, Validated};
use std::sync::Arc;
use tensor_core::{codec, Dim, PartialShape, BATCH_AXIS};

// ── Ports ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Input,
    Output,
}

/// A resolved I/O slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Port {
    pub direction: Direction,
    pub index: usize,
}

impl Port {
    pub fn input(index: usize) -> Self {
        Self {
            direction: Direction::Input,
            index,
        }
    }

    pub fn output(index: usize) -> Self {
        Self {
            direction: Direction::Output,
            index,
        }
    }

    pub fn is_input(&self) -> bool {
        self.direction == Direction::Input
    }
}

/// Binding progress of one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Unbound,
    UserBound,
    DeviceBound,
    PipelineBuilt,
}

/// Counters of the data movement a request performed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct TransferStats {
    pub host_to_device_copies: u64,
    pub device_to_host_copies: u64,
    /// Slots found aliased (or remote) at execution time.
    pub zero_copy_bindings: u64,
    pub argument_updates: u64,
    pub allocations: u64,
}

fn descriptor(metadata: &NetworkMetadata<Validated>, port: Port) -> Result<&IoDescriptor, RuntimeError> {
    let desc = match port.direction {
        Direction::Input => metadata.input(port.index),
        Direction::Output => metadata.output(port.index),
    };
    desc.ok_or_else(|| {
        RuntimeError::InternalConsistency(format!("no descriptor for {:?} #{}", port.direction, port.index))
    })
}

fn empty_buffer() -> RuntimeError {
    RuntimeError::InternalConsistency("Empty buffer".into())
}

const FOREIGN_CONTEXT: &str = "Using different context for creating the tensor is not supported";

// ── DeviceRequest ──────────────────────────────────────────────────

pub struct DeviceRequest {
    graph: Arc<CompiledGraph>,
    context: DeviceContext,
    config: RuntimeConfig,
    dry_run: DryRunFlag,
    user_inputs: Vec<Vec<Option<Tensor>>>,
    user_outputs: Vec<Option<Tensor>>,
    device_inputs: Vec<Vec<Option<Tensor>>>,
    device_outputs: Vec<Option<Tensor>>,
    states: Vec<Arc<VariableState>>,
    pipeline: Option<Box<dyn Pipeline>>,
    stats: TransferStats,
}

impl DeviceRequest {
    /// Creates a request for `graph`.
    ///
    /// Checks every descriptor against its device argument, then allocates
    /// the state and shape-tensor slots. The two halves of a variable state
    /// share one tensor.
    pub fn new(
        graph: Arc<CompiledGraph>,
        context: DeviceContext,
        config: &RuntimeConfig,
        dry_run: DryRunFlag,
    ) -> Result<Self, RuntimeError> {
        let metadata = graph.metadata();
        for (desc, arg) in metadata.inputs().iter().zip(graph.input_arguments()) {
            arg.check(desc)?;
        }
        for (desc, arg) in metadata.outputs().iter().zip(graph.output_arguments()) {
            arg.check(desc)?;
        }

        let num_inputs = metadata.inputs().len();
        let num_outputs = metadata.outputs().len();
        let mut request = Self {
            graph: Arc::clone(&graph),
            context,
            config: config.clone(),
            dry_run,
            user_inputs: vec![vec![None]; num_inputs],
            user_outputs: vec![None; num_outputs],
            device_inputs: vec![vec![None]; num_inputs],
            device_outputs: vec![None; num_outputs],
            states: Vec::new(),
            pipeline: None,
            stats: TransferStats::default(),
        };

        for (index, desc) in metadata.inputs().iter().enumerate() {
            if !(desc.is_state_input() || desc.is_shape_tensor()) {
                continue;
            }
            let tensor = request.allocate_tensor(Port::input(index), None)?;
            request.device_inputs[index][0] = Some(tensor.clone());
            if desc.is_state_input() {
                request.add_state(index, desc, tensor)?;
            }
        }

        for (index, desc) in metadata.outputs().iter().enumerate() {
            match desc.kind {
                SlotKind::ShapeTensor => {
                    let tensor = request.allocate_tensor(Port::output(index), None)?;
                    request.device_outputs[index] = Some(tensor);
                }
                SlotKind::StateOutput => {
                    let read = desc.related_index.ok_or_else(|| {
                        RuntimeError::InternalConsistency(format!(
                            "state output '{}' has no related input",
                            desc.name
                        ))
                    })?;
                    let state = request.device_inputs[read][0].clone().ok_or_else(|| {
                        RuntimeError::InternalConsistency(format!(
                            "state output '{}' precedes its input",
                            desc.name
                        ))
                    })?;
                    request.user_outputs[index] = Some(state.clone());
                    request.device_outputs[index] = Some(state);
                }
                _ => {}
            }
        }

        tracing::debug!(
            "created request for '{}' ({} inputs, {} outputs, {} states)",
            graph.name(),
            num_inputs,
            num_outputs,
            request.states.len()
        );
        Ok(request)
    }

    fn add_state(&mut self, index: usize, desc: &IoDescriptor, tensor: Tensor) -> Result<(), RuntimeError> {
        let related = desc.related_index.ok_or_else(|| {
            RuntimeError::InternalConsistency(format!("state input '{}' has no related output", desc.name))
        })?;
        self.states.push(Arc::new(VariableState::new(
            model_ir::strip_slot_prefix(&desc.name),
            tensor,
            index,
            related,
            self.context.clone(),
            self.config.mutable_command_lists,
        )));
        Ok(())
    }

    /// Zero-fills every variable state.
    pub fn initialize_states(&self) {
        for state in &self.states {
            state.reset();
        }
    }

    pub fn graph(&self) -> &Arc<CompiledGraph> {
        &self.graph
    }

    pub fn context(&self) -> &DeviceContext {
        &self.context
    }

    pub fn dry_run(&self) -> &DryRunFlag {
        &self.dry_run
    }

    pub fn pipeline_created(&self) -> bool {
        self.pipeline.is_some()
    }

    pub fn transfer_stats(&self) -> TransferStats {
        self.stats
    }

    pub fn query_state(&self) -> Vec<Arc<VariableState>> {
        self.states.clone()
    }

    // ── Slot helpers ──────────────────────────────────────────────

    fn find_port(&self, name: &str) -> Result<Port, RuntimeError> {
        let metadata = self.graph.metadata();
        metadata
            .find_input(name)
            .map(Port::input)
            .or_else(|| metadata.find_output(name).map(Port::output))
            .ok_or_else(|| RuntimeError::PortNotFound(name.to_string()))
    }

    fn is_batched_input(&self, index: usize) -> bool {
        self.user_inputs[index].len() > 1
    }

    /// Batch hint applied to data slots with a batch axis.
    fn batch_for(&self, desc: &IoDescriptor) -> Option<usize> {
        if desc.kind == SlotKind::Data && desc.shape.rank() > 0 {
            self.graph.batch_size()
        } else {
            None
        }
    }

    /// The shape the caller sees for a slot.
    fn user_shape(&self, desc: &IoDescriptor) -> PartialShape {
        match self.batch_for(desc) {
            Some(batch) => desc.shape.with_batch(batch),
            None => desc.shape.clone(),
        }
    }

    fn user_input(&self, index: usize) -> Option<&Tensor> {
        self.user_inputs[index].first().and_then(Option::as_ref)
    }

    fn device_slot(&mut self, port: Port) -> &mut Option<Tensor> {
        match port.direction {
            Direction::Input => &mut self.device_inputs[port.index][0],
            Direction::Output => &mut self.device_outputs[port.index],
        }
    }

    fn argument_index(&self, port: Port) -> u32 {
        match port.direction {
            Direction::Input => self.graph.input_arguments()[port.index].idx,
            Direction::Output => self.graph.output_arguments()[port.index].idx,
        }
    }

    fn check_tensor(&self, name: &str, desc: &IoDescriptor, tensor: &Tensor) -> Result<(), RuntimeError> {
        if tensor.dtype() != desc.precision {
            return Err(RuntimeError::Validation {
                port: name.to_string(),
                detail: format!("expected precision {}, got {}", desc.precision, tensor.dtype()),
            });
        }
        self.user_shape(desc)
            .check(&tensor.shape())
            .map_err(|e| RuntimeError::Validation {
                port: name.to_string(),
                detail: e.to_string(),
            })
    }

    fn check_batched_tensors(
        &self,
        name: &str,
        desc: &IoDescriptor,
        tensors: &[Tensor],
    ) -> Result<(), RuntimeError> {
        let invalid = |detail: String| RuntimeError::Validation {
            port: name.to_string(),
            detail,
        };
        let first = tensors
            .first()
            .ok_or_else(|| invalid("empty tensor list".into()))?;
        let item_shape = first.shape();
        if item_shape.rank() == 0 || desc.shape.rank() == 0 {
            return Err(invalid("batched tensors need a batch dimension".into()));
        }
        for (i, t) in tensors.iter().enumerate() {
            if t.dtype() != desc.precision {
                return Err(invalid(format!(
                    "batch item {i}: expected precision {}, got {}",
                    desc.precision,
                    t.dtype()
                )));
            }
            if t.shape() != item_shape {
                return Err(invalid(format!(
                    "batch item {i}: shape {} differs from {item_shape}",
                    t.shape()
                )));
            }
        }
        if item_shape.batch() != Some(1) {
            return Err(invalid(format!("batch items must have batch 1, got {item_shape}")));
        }
        desc.shape
            .with_batch(1)
            .check(&item_shape)
            .map_err(|e| invalid(e.to_string()))?;

        let count = tensors.len();
        let fits = match self.batch_for(desc) {
            Some(batch) => count == batch,
            None => match desc.shape.dims()[BATCH_AXIS] {
                Dim::Static(n) => count == n,
                Dim::Dynamic { max } => count <= max,
            },
        };
        if !fits {
            return Err(invalid(format!(
                "{count} batch items do not match batch dimension of {}",
                self.user_shape(desc)
            )));
        }
        Ok(())
    }

    /// Allocates a request-owned tensor for `port` at the slot's upper-bound
    /// shape, with dimension 0 replaced by `batch` when given. Installs it as
    /// the user tensor when none is bound.
    fn allocate_tensor(&mut self, port: Port, batch: Option<usize>) -> Result<Tensor, RuntimeError> {
        let graph = Arc::clone(&self.graph);
        let desc = descriptor(graph.metadata(), port)?;
        let mut shape = desc.shape.max_shape();
        if let Some(batch) = batch {
            if shape.rank() > 0 {
                shape = shape.with_dim(BATCH_AXIS, batch);
            }
        }
        let tensor = Tensor::local(&self.context, desc.precision, shape)?;
        self.stats.allocations += 1;
        tracing::debug!("allocated {} for '{}' at {:#x}", tensor.shape(), desc.name, tensor.address());

        let user = match port.direction {
            Direction::Input => &mut self.user_inputs[port.index][0],
            Direction::Output => &mut self.user_outputs[port.index],
        };
        if user.is_none() {
            *user = Some(tensor.clone());
        }
        Ok(tensor)
    }

    fn update_argument(&mut self, arg_index: u32, tensor: &Tensor) -> Result<(), RuntimeError> {
        if tensor.address() == 0 {
            return Err(empty_buffer());
        }
        if let Some(pipeline) = self.pipeline.as_mut() {
            pipeline.update_graph_arguments(arg_index, tensor, tensor.byte_size())?;
            self.stats.argument_updates += 1;
        }
        Ok(())
    }

    fn update_argument_batching(
        &mut self,
        arg_index: u32,
        tensor: &Tensor,
        batch_index: usize,
    ) -> Result<(), RuntimeError> {
        if let Some(pipeline) = self.pipeline.as_mut() {
            pipeline.update_graph_arguments_batching(arg_index, tensor, batch_index)?;
            self.stats.argument_updates += 1;
        }
        Ok(())
    }

    // ── Tensor binding ────────────────────────────────────────────

    /// Binds `tensor` to the caller-visible slot `name`.
    ///
    /// Passing the tensor already bound is a no-op. With mutable command
    /// lists the device side is rebound at once: aliased when the tensor
    /// lives in the device context, otherwise backed by a request-owned
    /// buffer that `infer_async` copies into.
    pub fn set_tensor(&mut self, name: &str, tensor: Tensor) -> Result<(), RuntimeError> {
        let port = self.find_port(name)?;
        let graph = Arc::clone(&self.graph);
        let desc = descriptor(graph.metadata(), port)?;
        self.check_tensor(name, desc, &tensor)?;

        let mutable = self.config.mutable_command_lists;
        let remote = tensor.kind() == TensorKind::Remote;
        if mutable && remote && tensor.allocation_context() != Some(self.context.id()) {
            return Err(RuntimeError::Unsupported(FOREIGN_CONTEXT.into()));
        }

        match port.direction {
            Direction::Input => {
                if self.user_input(port.index).is_some_and(|t| t.same_object(&tensor)) {
                    tracing::debug!("'{name}' already bound to this tensor");
                    return Ok(());
                }
                if self.is_batched_input(port.index) {
                    self.user_inputs[port.index] = vec![None];
                    self.device_inputs[port.index] = vec![None];
                }
                self.user_inputs[port.index][0] = Some(tensor.clone());
            }
            Direction::Output => {
                if self.user_outputs[port.index]
                    .as_ref()
                    .is_some_and(|t| t.same_object(&tensor))
                {
                    tracing::debug!("'{name}' already bound to this tensor");
                    return Ok(());
                }
                self.user_outputs[port.index] = Some(tensor.clone());
            }
        }

        if mutable {
            if remote {
                self.set_remote_tensor_data(port, tensor)?;
            } else {
                self.set_tensor_data(port, desc, tensor)?;
            }
        }
        Ok(())
    }

    fn set_tensor_data(&mut self, port: Port, desc: &IoDescriptor, tensor: Tensor) -> Result<(), RuntimeError> {
        let mut updated = false;
        if self.context.contains_address(tensor.address()) {
            tracing::debug!("'{}' aliases caller memory at {:#x}", desc.name, tensor.address());
            *self.device_slot(port) = Some(tensor);
            updated = true;
        } else {
            let stale = match self.device_slot(port) {
                None => true,
                Some(t) => t.kind() != TensorKind::Local || t.is_shared_with_user(),
            };
            if stale {
                tracing::warn!(
                    "'{}' is not allocated in {}; data will be copied",
                    desc.name,
                    self.context.id()
                );
                let fresh = self.allocate_tensor(port, self.batch_for(desc))?;
                *self.device_slot(port) = Some(fresh);
                updated = true;
            }
        }

        if updated && self.pipeline.is_some() {
            let device = self.device_slot(port).clone().ok_or_else(empty_buffer)?;
            self.update_argument(self.argument_index(port), &device)?;
        }
        Ok(())
    }

    fn set_remote_tensor_data(&mut self, port: Port, tensor: Tensor) -> Result<(), RuntimeError> {
        if tensor.allocation_context() != Some(self.context.id()) {
            return Err(RuntimeError::Unsupported(FOREIGN_CONTEXT.into()));
        }
        *self.device_slot(port) = Some(tensor.clone());
        if self.pipeline.is_some() {
            self.update_argument(self.argument_index(port), &tensor)?;
        }
        Ok(())
    }

    /// Binds one tensor per batch item to input `name`.
    pub fn set_tensors(&mut self, name: &str, mut tensors: Vec<Tensor>) -> Result<(), RuntimeError> {
        if tensors.len() == 1 {
            if let Some(tensor) = tensors.pop() {
                return self.set_tensor(name, tensor);
            }
        }
        let port = self.find_port(name)?;
        if !port.is_input() {
            return Err(RuntimeError::Unsupported(format!(
                "batched tensors cannot be bound to output '{name}'"
            )));
        }
        let graph = Arc::clone(&self.graph);
        let desc = descriptor(graph.metadata(), port)?;
        self.check_batched_tensors(name, desc, &tensors)?;

        let index = port.index;
        let mutable = self.config.mutable_command_lists;
        let arg_index = self.argument_index(port);

        match graph.batch_size() {
            Some(_) => {
                if self.pipeline.is_some() && !mutable && self.device_inputs[index].len() != tensors.len() {
                    return Err(RuntimeError::Unsupported(format!(
                        "'{name}' cannot switch to per-item buffers after the pipeline was created"
                    )));
                }
                self.user_inputs[index] = tensors.iter().cloned().map(Some).collect();
                if mutable {
                    self.device_inputs[index] = vec![None; tensors.len()];
                    for (item, tensor) in tensors.iter().enumerate() {
                        let device = if tensor.kind() == TensorKind::Remote {
                            if tensor.allocation_context() != Some(self.context.id()) {
                                return Err(RuntimeError::Unsupported(FOREIGN_CONTEXT.into()));
                            }
                            tensor.clone()
                        } else if self.context.contains_address(tensor.address()) {
                            tensor.clone()
                        } else {
                            self.allocate_tensor(port, Some(1))?
                        };
                        self.device_inputs[index][item] = Some(device.clone());
                        self.update_argument_batching(arg_index, &device, item)?;
                    }
                }
            }
            None => {
                self.user_inputs[index] = tensors.iter().cloned().map(Some).collect();
                let stale = match self.device_inputs[index].as_slice() {
                    [Some(t)] => t.kind() != TensorKind::Local || t.is_shared_with_user(),
                    _ => true,
                };
                if stale {
                    if self.pipeline.is_none() {
                        self.device_inputs[index] = vec![None];
                    } else if mutable {
                        let fresh = self.allocate_tensor(port, None)?;
                        self.device_inputs[index] = vec![Some(fresh.clone())];
                        self.update_argument(arg_index, &fresh)?;
                    }
                }
            }
        }
        tracing::debug!("'{name}' bound to {} batch items", tensors.len());
        Ok(())
    }

    /// Returns the tensor bound to `name`, allocating one when needed.
    ///
    /// The returned tensor is marked as shared with the caller, so the
    /// request will not silently reuse it as a device buffer for a later
    /// binding.
    pub fn get_tensor(&mut self, name: &str) -> Result<Tensor, RuntimeError> {
        let port = self.find_port(name)?;
        let existing = match port.direction {
            Direction::Input => {
                if self.is_batched_input(port.index) {
                    return Err(RuntimeError::Unsupported("Cannot return tensors in a tensor".into()));
                }
                self.user_input(port.index).cloned()
            }
            Direction::Output => self.user_outputs[port.index].clone(),
        };
        if let Some(tensor) = existing {
            tensor.mark_shared_with_user();
            return Ok(tensor);
        }

        let graph = Arc::clone(&self.graph);
        let desc = descriptor(graph.metadata(), port)?;
        let tensor = self.allocate_tensor(port, self.batch_for(desc))?;
        *self.device_slot(port) = Some(tensor.clone());
        tensor.mark_shared_with_user();
        Ok(tensor)
    }

    /// The tensors bound to `name`: one per batch item for batched inputs.
    pub fn get_tensors(&self, name: &str) -> Result<Vec<Tensor>, RuntimeError> {
        let port = self.find_port(name)?;
        Ok(match port.direction {
            Direction::Input => self.user_inputs[port.index].iter().flatten().cloned().collect(),
            Direction::Output => self.user_outputs[port.index].iter().cloned().collect(),
        })
    }

    pub fn slot_state(&self, name: &str) -> Result<SlotState, RuntimeError> {
        let port = self.find_port(name)?;
        let (user, device) = match port.direction {
            Direction::Input => (
                self.user_inputs[port.index].iter().any(Option::is_some),
                self.device_inputs[port.index].iter().any(Option::is_some),
            ),
            Direction::Output => (
                self.user_outputs[port.index].is_some(),
                self.device_outputs[port.index].is_some(),
            ),
        };
        Ok(match (user, device, self.pipeline.is_some()) {
            (_, true, true) => SlotState::PipelineBuilt,
            (_, true, false) => SlotState::DeviceBound,
            (true, false, _) => SlotState::UserBound,
            (false, false, _) => SlotState::Unbound,
        })
    }

    // ── Pipeline construction and updates ─────────────────────────

    fn create_pipeline(&mut self) -> Result<(), RuntimeError> {
        let graph = Arc::clone(&self.graph);
        let metadata = graph.metadata();
        let per_item = graph.batch_size().is_some();

        for (index, desc) in metadata.inputs().iter().enumerate() {
            if self.is_batched_input(index) && per_item {
                if !self.config.mutable_command_lists {
                    let items = self.user_inputs[index].len();
                    self.device_inputs[index] = vec![None; items];
                    for item in 0..items {
                        self.device_inputs[index][item] = Some(self.allocate_tensor(Port::input(index), Some(1))?);
                    }
                }
                continue;
            }
            if self.device_inputs[index][0].is_some() {
                tracing::debug!("input '{}' already bound", desc.name);
                continue;
            }
            let tensor = self.allocate_tensor(Port::input(index), self.batch_for(desc))?;
            self.device_inputs[index][0] = Some(tensor);
        }

        for (index, desc) in metadata.outputs().iter().enumerate() {
            if self.device_outputs[index].is_some() {
                tracing::debug!("output '{}' already bound", desc.name);
                continue;
            }
            let tensor = self.allocate_tensor(Port::output(index), self.batch_for(desc))?;
            self.device_outputs[index] = Some(tensor);
        }

        for state in self.states.clone() {
            if !state.tensor_was_updated() {
                continue;
            }
            let tensor = state.state();
            self.user_inputs[state.tensor_index()][0] = Some(tensor.clone());
            self.user_outputs[state.related_tensor_index()] = Some(tensor.clone());
            state.reset_tensor_updated_flag();
            if state.zero_tensor_should_be_updated() {
                state.reset_zero_tensor_updated_flag();
                self.device_inputs[state.tensor_index()][0] = Some(tensor.clone());
                self.device_outputs[state.related_tensor_index()] = Some(tensor);
            }
        }

        let missing = |desc: &IoDescriptor| {
            RuntimeError::InternalConsistency(format!("'{}' has no device buffer", desc.name))
        };
        let inputs = self
            .device_inputs
            .iter()
            .zip(metadata.inputs())
            .map(|(slots, desc)| {
                slots
                    .iter()
                    .map(|slot| slot.clone().ok_or_else(|| missing(desc)))
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;
        let outputs = self
            .device_outputs
            .iter()
            .zip(metadata.outputs())
            .map(|(slot, desc)| slot.clone().ok_or_else(|| missing(desc)))
            .collect::<Result<Vec<_>, _>>()?;

        self.pipeline = Some(graph.create_pipeline(
            inputs,
            outputs,
            self.dry_run.clone(),
            self.config.enable_profiling,
        ));
        tracing::info!("pipeline created for '{}'", graph.name());
        Ok(())
    }

    /// Rebinds arguments whose request-owned buffer was reallocated.
    fn update_pipeline_if_memory_changed(&mut self) -> Result<(), RuntimeError> {
        let graph = Arc::clone(&self.graph);
        let metadata = graph.metadata();

        for (index, desc) in metadata.inputs().iter().enumerate() {
            if self.is_batched_input(index) || desc.is_shape_tensor() {
                continue;
            }
            let Some(tensor) = self.device_inputs[index][0].clone() else {
                continue;
            };
            if tensor.kind() != TensorKind::Local || !tensor.memory_address_changed() {
                continue;
            }
            tracing::debug!("input '{}' moved to {:#x}", desc.name, tensor.address());
            self.update_argument(graph.input_arguments()[index].idx, &tensor)?;
            if !desc.is_state_input() {
                tensor.reset_memory_flag();
            }
        }

        for (index, desc) in metadata.outputs().iter().enumerate() {
            if desc.is_shape_tensor() {
                continue;
            }
            let Some(tensor) = self.device_outputs[index].clone() else {
                continue;
            };
            if tensor.kind() != TensorKind::Local || !tensor.memory_address_changed() {
                continue;
            }
            tracing::debug!("output '{}' moved to {:#x}", desc.name, tensor.address());
            self.update_argument(graph.output_arguments()[index].idx, &tensor)?;
            tensor.reset_memory_flag();
        }
        Ok(())
    }

    /// Applies state tensors replaced through [`VariableState::set_state`].
    fn update_states_if_memory_changed(&mut self) -> Result<(), RuntimeError> {
        for state in self.states.clone() {
            if !state.tensor_was_updated() {
                continue;
            }
            let tensor = state.state();
            let (read, assign) = (state.tensor_index(), state.related_tensor_index());
            self.user_inputs[read][0] = Some(tensor.clone());
            self.user_outputs[assign] = Some(tensor.clone());
            state.reset_tensor_updated_flag();

            if state.zero_tensor_should_be_updated() {
                self.update_argument(self.graph.input_arguments()[read].idx, &tensor)?;
                self.update_argument(self.graph.output_arguments()[assign].idx, &tensor)?;
                state.reset_zero_tensor_updated_flag();
                self.device_inputs[read][0] = Some(tensor.clone());
                self.device_outputs[assign] = Some(tensor);
                tracing::debug!("state '{}' rebound without copy", state.name());
            }
        }
        Ok(())
    }

    // ── Execution ─────────────────────────────────────────────────

    /// Brings the pipeline up to date, stages the inputs and submits.
    pub fn infer_async(&mut self) -> Result<(), RuntimeError> {
        let graph = Arc::clone(&self.graph);
        {
            let _guard = graph.lock();
            if self.pipeline.is_none() {
                self.create_pipeline()?;
            } else {
                if self.config.mutable_command_lists {
                    self.update_pipeline_if_memory_changed()?;
                }
                self.update_states_if_memory_changed()?;
            }
        }

        let metadata = graph.metadata();
        for (index, desc) in metadata.inputs().iter().enumerate() {
            if desc.kind == SlotKind::InitInputWeights {
                return Err(RuntimeError::InternalConsistency(format!(
                    "'{}' belongs to a weights initialisation graph",
                    desc.name
                )));
            }

            if desc.is_shape_tensor() {
                let related = desc.related_index.ok_or_else(|| {
                    RuntimeError::InternalConsistency(format!(
                        "shape tensor '{}' is not linked to a data tensor",
                        desc.name
                    ))
                })?;
                let dims = self
                    .user_input(related)
                    .map(|t| t.shape())
                    .ok_or_else(empty_buffer)?;
                let payload = codec::shape_to_reversed_u32(&dims)?;
                self.user_input(index).ok_or_else(empty_buffer)?.write_u32s(&payload)?;
            }

            if self.is_batched_input(index) {
                self.stage_batched_input(index)?;
                continue;
            }

            if desc.kind == SlotKind::MainInputWeights {
                continue;
            }

            let user = self.user_input(index).cloned().ok_or_else(empty_buffer)?;
            if desc.kind == SlotKind::Data {
                self.user_shape(desc)
                    .check(&user.shape())
                    .map_err(|e| RuntimeError::Validation {
                        port: desc.name.clone(),
                        detail: e.to_string(),
                    })?;
            }
            let device = self.device_inputs[index][0].clone().ok_or_else(empty_buffer)?;
            self.stage_input(&user, &device)?;
        }

        tracing::trace!("submitting '{}'", graph.name());
        self.pipeline
            .as_mut()
            .ok_or_else(|| RuntimeError::InternalConsistency("no pipeline to submit".into()))?
            .push()
    }

    fn stage_input(&mut self, user: &Tensor, device: &Tensor) -> Result<(), RuntimeError> {
        if device.kind() == TensorKind::Remote || user.address() == device.address() {
            self.stats.zero_copy_bindings += 1;
            return Ok(());
        }
        if user.address() == 0 || device.address() == 0 {
            return Err(empty_buffer());
        }
        if device.shape() != user.shape() {
            device.set_shape(user.shape())?;
        }
        copy_region(user, 0, device, 0, user.byte_size())?;
        self.stats.host_to_device_copies += 1;
        Ok(())
    }

    fn stage_batched_input(&mut self, index: usize) -> Result<(), RuntimeError> {
        let users: Vec<Tensor> = self.user_inputs[index].iter().flatten().cloned().collect();
        if self.graph.batch_size().is_some() {
            for (item, user) in users.iter().enumerate() {
                let device = self.device_inputs[index]
                    .get(item)
                    .cloned()
                    .flatten()
                    .ok_or_else(empty_buffer)?;
                self.stage_input(user, &device)?;
            }
            return Ok(());
        }

        let device = self.device_inputs[index][0].clone().ok_or_else(empty_buffer)?;
        let mut offset = 0;
        for user in &users {
            let len = user.byte_size();
            copy_region(user, 0, &device, offset, len)?;
            offset += len;
            self.stats.host_to_device_copies += 1;
        }
        Ok(())
    }

    /// Waits for the submission, publishes dynamic output shapes, copies
    /// outputs back and readies the pipeline for the next run.
    pub fn get_result(&mut self) -> Result<(), RuntimeError> {
        let pipeline = self
            .pipeline
            .as_mut()
            .ok_or_else(|| RuntimeError::InternalConsistency("get_result before infer_async".into()))?;
        let pulled = pipeline.pull();
        if let Err(e) = pulled {
            pipeline.reset()?;
            return Err(e);
        }

        let graph = Arc::clone(&self.graph);
        let metadata = graph.metadata();

        for (index, desc) in metadata.outputs().iter().enumerate() {
            if !desc.is_shape_tensor() {
                continue;
            }
            let related = desc.related_index.ok_or_else(|| {
                RuntimeError::InternalConsistency(format!(
                    "shape tensor '{}' is not linked to a data tensor",
                    desc.name
                ))
            })?;
            self.collect_output(index)?;
            let user = self.user_outputs[index].clone().ok_or_else(empty_buffer)?;
            let dims = codec::shape_from_reversed_u32(&user.read_u32s()?);
            let target = self.user_outputs[related].clone().ok_or_else(empty_buffer)?;
            tracing::debug!("output '{}' reshaped to {dims}", metadata.outputs()[related].name);
            target.set_shape(dims)?;
        }

        for (index, desc) in metadata.outputs().iter().enumerate() {
            if !desc.is_shape_tensor() {
                self.collect_output(index)?;
            }
        }

        match self.pipeline.as_mut() {
            Some(pipeline) => pipeline.reset(),
            None => Ok(()),
        }
    }

    fn collect_output(&mut self, index: usize) -> Result<(), RuntimeError> {
        let user = self.user_outputs[index].clone().ok_or_else(empty_buffer)?;
        let device = self.device_outputs[index].clone().ok_or_else(empty_buffer)?;
        if device.kind() == TensorKind::Remote || user.address() == device.address() {
            self.stats.zero_copy_bindings += 1;
            return Ok(());
        }
        if user.address() == 0 || device.address() == 0 {
            return Err(empty_buffer());
        }
        copy_region(&device, 0, &user, 0, user.byte_size())?;
        self.stats.device_to_host_copies += 1;
        Ok(())
    }

    /// Runs one inference to completion on the calling thread.
    pub fn infer(&mut self) -> Result<(), RuntimeError> {
        if self.config.run_inferences_sequentially {
            return Err(RuntimeError::Unsupported(
                "Only start async is supported when inferences run sequentially".into(),
            ));
        }
        self.infer_async()?;
        self.get_result()
    }

    pub fn get_profiling_info(&self) -> Result<Vec<ProfilingInfo>, RuntimeError> {
        self.pipeline
            .as_ref()
            .map(|p| p.profiling_info())
            .ok_or_else(|| RuntimeError::InternalConsistency("the pipeline has not been created".into()))
    }
}

impl std::fmt::Debug for DeviceRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRequest")
            .field("graph", &self.graph.name())
            .field("context", &self.context.id())
            .field("states", &self.states.len())
            .field("pipeline_created", &self.pipeline.is_some())
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{FnKernel, IdentityKernel, Kernel};
    use memory_manager::MemoryBudget;
    use tensor_core::{DType, Shape};

    fn context() -> DeviceContext {
        DeviceContext::new(MemoryBudget::from_mb(16))
    }

    fn request_for(metadata: NetworkMetadata<Validated>, kernel: Arc<dyn Kernel>) -> (DeviceRequest, DeviceContext) {
        let ctx = context();
        let graph = Arc::new(CompiledGraph::new(metadata, kernel));
        let req = DeviceRequest::new(graph, ctx.clone(), &RuntimeConfig::default(), DryRunFlag::default()).unwrap();
        (req, ctx)
    }

    fn echo() -> NetworkMetadata<Validated> {
        NetworkMetadata::new(
            "echo",
            vec![IoDescriptor::data("x", DType::F32, PartialShape::from_static(&[1, 4]))],
            vec![IoDescriptor::data("y", DType::F32, PartialShape::from_static(&[1, 4]))],
        )
        .validate()
        .unwrap()
    }

    #[test]
    fn test_unknown_port() {
        let (mut req, _) = request_for(echo(), Arc::new(IdentityKernel));
        assert!(matches!(req.get_tensor("nope"), Err(RuntimeError::PortNotFound(_))));
    }

    #[test]
    fn test_precision_and_shape_validation() {
        let (mut req, _) = request_for(echo(), Arc::new(IdentityKernel));
        let wrong_type = Tensor::host(DType::I32, Shape::matrix(1, 4));
        assert!(matches!(req.set_tensor("x", wrong_type), Err(RuntimeError::Validation { .. })));
        let wrong_shape = Tensor::host(DType::F32, Shape::matrix(1, 5));
        assert!(matches!(req.set_tensor("x", wrong_shape), Err(RuntimeError::Validation { .. })));
        assert_eq!(req.slot_state("x").unwrap(), SlotState::Unbound);
    }

    #[test]
    fn test_slot_state_progression() {
        let (mut req, _) = request_for(echo(), Arc::new(IdentityKernel));
        let mut no_rebind = RuntimeConfig::default();
        no_rebind.mutable_command_lists = false;
        req.config = no_rebind;

        req.set_tensor("x", Tensor::from_f32(Shape::matrix(1, 4), &[1.0; 4]).unwrap())
            .unwrap();
        assert_eq!(req.slot_state("x").unwrap(), SlotState::UserBound);
        req.infer().unwrap();
        assert_eq!(req.slot_state("x").unwrap(), SlotState::PipelineBuilt);
    }

    #[test]
    fn test_get_tensor_marks_shared_and_is_stable() {
        let (mut req, ctx) = request_for(echo(), Arc::new(IdentityKernel));
        let a = req.get_tensor("x").unwrap();
        assert!(a.is_shared_with_user());
        assert!(ctx.contains_address(a.address()));
        let b = req.get_tensor("x").unwrap();
        assert!(a.same_object(&b));
        assert_eq!(req.slot_state("x").unwrap(), SlotState::DeviceBound);
    }

    #[test]
    fn test_same_tensor_twice_is_noop() {
        let (mut req, _) = request_for(echo(), Arc::new(IdentityKernel));
        let t = Tensor::from_f32(Shape::matrix(1, 4), &[1.0; 4]).unwrap();
        req.set_tensor("x", t.clone()).unwrap();
        req.infer().unwrap();
        let before = req.transfer_stats();
        req.set_tensor("x", t).unwrap();
        assert_eq!(req.transfer_stats(), before);
    }

    #[test]
    fn test_foreign_buffer_is_copied() {
        let (mut req, _) = request_for(echo(), Arc::new(IdentityKernel));
        let x = Tensor::from_f32(Shape::matrix(1, 4), &[1.0, 2.0, 3.0, 4.0]).unwrap();
        req.set_tensor("x", x).unwrap();
        req.infer().unwrap();
        let y = req.get_tensor("y").unwrap();
        assert_eq!(y.to_f32_vec().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(req.transfer_stats().host_to_device_copies, 1);
    }

    #[test]
    fn test_context_buffer_is_aliased() {
        let (mut req, ctx) = request_for(echo(), Arc::new(IdentityKernel));
        let x = Tensor::host_in(&ctx, DType::F32, Shape::matrix(1, 4)).unwrap();
        x.write_f32(&[5.0; 4]).unwrap();
        req.set_tensor("x", x).unwrap();
        req.infer().unwrap();
        let stats = req.transfer_stats();
        assert_eq!(stats.host_to_device_copies, 0);
        assert!(stats.zero_copy_bindings >= 1);
    }

    #[test]
    fn test_foreign_remote_tensor_rejected() {
        let (mut req, _) = request_for(echo(), Arc::new(IdentityKernel));
        let other = context();
        let remote = Tensor::remote(&other, DType::F32, Shape::matrix(1, 4)).unwrap();
        match req.set_tensor("x", remote) {
            Err(RuntimeError::Unsupported(msg)) => assert_eq!(msg, FOREIGN_CONTEXT),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_kernel_failure_surfaces_from_get_result() {
        let failing = FnKernel::new("boom", |_io: &crate::graph::KernelIo<'_>| {
            Err(crate::DeviceError::new("kernel fault"))
        });
        let (mut req, _) = request_for(echo(), Arc::new(failing));
        req.infer_async().unwrap();
        assert!(matches!(req.get_result(), Err(RuntimeError::DeviceExecution(_))));
        // The pipeline is ready for another submission.
        req.infer_async().unwrap();
    }

    #[test]
    fn test_profiling_requires_pipeline() {
        let (mut req, _) = request_for(echo(), Arc::new(IdentityKernel));
        assert!(matches!(req.get_profiling_info(), Err(RuntimeError::InternalConsistency(_))));
        req.infer().unwrap();
        assert_eq!(req.get_profiling_info().unwrap().len(), 1);
    }

    #[test]
    fn test_sequential_mode_rejects_sync_infer() {
        let ctx = context();
        let graph = Arc::new(CompiledGraph::new(echo(), Arc::new(IdentityKernel)));
        let config = RuntimeConfig {
            run_inferences_sequentially: true,
            ..RuntimeConfig::default()
        };
        let mut req = DeviceRequest::new(graph, ctx, &config, DryRunFlag::default()).unwrap();
        assert!(matches!(req.infer(), Err(RuntimeError::Unsupported(_))));
        req.infer_async().unwrap();
        req.get_result().unwrap();
    }

    #[test]
    fn test_argument_mismatch_rejected() {
        let metadata = echo();
        let mut args = vec![model_ir::ArgumentDescriptor::for_slot(&metadata.inputs()[0], 0)];
        args[0].precision = DType::F16;
        let outs = vec![model_ir::ArgumentDescriptor::for_slot(&metadata.outputs()[0], 1)];
        let graph = Arc::new(CompiledGraph::with_arguments(metadata, args, outs, Arc::new(IdentityKernel)).unwrap());
        let err = DeviceRequest::new(graph, context(), &RuntimeConfig::default(), DryRunFlag::default());
        assert!(matches!(err, Err(RuntimeError::ModelError(_))));
    }
}
