// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Compiled graphs and the kernels that execute them.
//!
//! A [`CompiledGraph`] is shared by every request created from one
//! compiled model. It owns the validated metadata, the device argument
//! descriptors and the mutex that serialises pipeline construction and
//! argument updates across those requests.

use crate::config::DryRunFlag;
use crate::pipeline::{ArgumentBinding, HostPipeline, Pipeline};
use crate::tensor::Tensor;
use crate::{DeviceError, RuntimeError};
use model_ir::{ArgumentDescriptor, NetworkMetadata, Validated};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tensor_core::codec;

/// The computation behind a compiled graph.
pub trait Kernel: Send + Sync {
    fn name(&self) -> &str;

    /// Reads the bound inputs and writes the bound outputs.
    fn execute(&self, io: &KernelIo<'_>) -> Result<(), DeviceError>;
}

/// The device tensors bound to each argument, in metadata order.
///
/// Inputs bound per batch item expose several slots; every other argument
/// has exactly one.
pub struct KernelIo<'a> {
    inputs: &'a [Vec<Tensor>],
    outputs: &'a [Vec<Tensor>],
}

impl<'a> KernelIo<'a> {
    pub fn new(inputs: &'a [Vec<Tensor>], outputs: &'a [Vec<Tensor>]) -> Self {
        Self { inputs, outputs }
    }

    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    pub fn input_slots(&self, index: usize) -> Result<&'a [Tensor], DeviceError> {
        self.inputs
            .get(index)
            .map(|v| v.as_slice())
            .ok_or_else(|| DeviceError::new(format!("no input #{index}")))
    }

    pub fn input(&self, index: usize) -> Result<&'a Tensor, DeviceError> {
        self.input_slots(index)?
            .first()
            .ok_or_else(|| DeviceError::new(format!("input #{index} is unbound")))
    }

    pub fn output(&self, index: usize) -> Result<&'a Tensor, DeviceError> {
        self.outputs
            .get(index)
            .and_then(|v| v.first())
            .ok_or_else(|| DeviceError::new(format!("no output #{index}")))
    }

    /// The bytes of input `index`, batch items concatenated.
    pub fn input_bytes(&self, index: usize) -> Result<Vec<u8>, DeviceError> {
        let mut bytes = Vec::new();
        for slot in self.input_slots(index)? {
            slot.read(|b| bytes.extend_from_slice(b));
        }
        Ok(bytes)
    }

    pub fn input_f32(&self, index: usize) -> Result<Vec<f32>, DeviceError> {
        codec::read_f32s(&self.input_bytes(index)?).map_err(|e| DeviceError::new(e.to_string()))
    }

    /// Writes `bytes` to the front of output `index`.
    ///
    /// The whole allocation is writable, so an output reshaped smaller by a
    /// previous run still accepts a result up to its upper bound.
    pub fn write_output(&self, index: usize, bytes: &[u8]) -> Result<(), DeviceError> {
        self.output(index)?.write_storage(|dst| {
            if bytes.len() > dst.len() {
                return Err(DeviceError::new(format!(
                    "output #{index}: {} bytes do not fit in {}",
                    bytes.len(),
                    dst.len()
                )));
            }
            dst[..bytes.len()].copy_from_slice(bytes);
            Ok(())
        })
    }

    pub fn write_output_f32(&self, index: usize, values: &[f32]) -> Result<(), DeviceError> {
        let mut bytes = vec![0u8; values.len() * 4];
        codec::write_f32s(&mut bytes, values).map_err(|e| DeviceError::new(e.to_string()))?;
        self.write_output(index, &bytes)
    }

    pub fn write_output_u32(&self, index: usize, values: &[u32]) -> Result<(), DeviceError> {
        let mut bytes = vec![0u8; values.len() * 4];
        codec::write_u32s(&mut bytes, values).map_err(|e| DeviceError::new(e.to_string()))?;
        self.write_output(index, &bytes)
    }
}

/// Copies input `i` into output `i`, truncated to the output size.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityKernel;

impl Kernel for IdentityKernel {
    fn name(&self) -> &str {
        "identity"
    }

    fn execute(&self, io: &KernelIo<'_>) -> Result<(), DeviceError> {
        for index in 0..io.num_inputs().min(io.num_outputs()) {
            let bytes = io.input_bytes(index)?;
            let capacity = io.output(index)?.capacity();
            io.write_output(index, &bytes[..bytes.len().min(capacity)])?;
        }
        Ok(())
    }
}

type KernelFn = dyn Fn(&KernelIo<'_>) -> Result<(), DeviceError> + Send + Sync;

/// A kernel backed by a closure.
pub struct FnKernel {
    name: String,
    f: Box<KernelFn>,
}

impl FnKernel {
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&KernelIo<'_>) -> Result<(), DeviceError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            f: Box::new(f),
        }
    }
}

impl Kernel for FnKernel {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, io: &KernelIo<'_>) -> Result<(), DeviceError> {
        (self.f)(io)
    }
}

/// A graph compiled for the device.
pub struct CompiledGraph {
    metadata: NetworkMetadata<Validated>,
    input_arguments: Vec<ArgumentDescriptor>,
    output_arguments: Vec<ArgumentDescriptor>,
    mutex: Mutex<()>,
    kernel: Arc<dyn Kernel>,
}

impl CompiledGraph {
    /// Compiles `metadata` with device arguments numbered inputs first,
    /// then outputs.
    pub fn new(metadata: NetworkMetadata<Validated>, kernel: Arc<dyn Kernel>) -> Self {
        let input_arguments: Vec<_> = metadata
            .inputs()
            .iter()
            .enumerate()
            .map(|(i, d)| ArgumentDescriptor::for_slot(d, i as u32))
            .collect();
        let offset = input_arguments.len();
        let output_arguments = metadata
            .outputs()
            .iter()
            .enumerate()
            .map(|(i, d)| ArgumentDescriptor::for_slot(d, (offset + i) as u32))
            .collect();
        Self {
            metadata,
            input_arguments,
            output_arguments,
            mutex: Mutex::new(()),
            kernel,
        }
    }

    /// Uses argument descriptors reported by the device. Their agreement
    /// with the metadata is checked when a request is created.
    pub fn with_arguments(
        metadata: NetworkMetadata<Validated>,
        input_arguments: Vec<ArgumentDescriptor>,
        output_arguments: Vec<ArgumentDescriptor>,
        kernel: Arc<dyn Kernel>,
    ) -> Result<Self, RuntimeError> {
        if input_arguments.len() != metadata.inputs().len()
            || output_arguments.len() != metadata.outputs().len()
        {
            return Err(RuntimeError::InternalConsistency(format!(
                "{} input and {} output arguments for {} inputs and {} outputs",
                input_arguments.len(),
                output_arguments.len(),
                metadata.inputs().len(),
                metadata.outputs().len()
            )));
        }
        Ok(Self {
            metadata,
            input_arguments,
            output_arguments,
            mutex: Mutex::new(()),
            kernel,
        })
    }

    pub fn metadata(&self) -> &NetworkMetadata<Validated> {
        &self.metadata
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn input_arguments(&self) -> &[ArgumentDescriptor] {
        &self.input_arguments
    }

    pub fn output_arguments(&self) -> &[ArgumentDescriptor] {
        &self.output_arguments
    }

    /// Batch size handled outside the graph, if any.
    pub fn batch_size(&self) -> Option<usize> {
        self.metadata.batch_size()
    }

    /// Serialises pipeline construction and argument updates.
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn create_pipeline(
        &self,
        inputs: Vec<Vec<Tensor>>,
        outputs: Vec<Tensor>,
        dry_run: DryRunFlag,
        enable_profiling: bool,
    ) -> Box<dyn Pipeline> {
        let inputs = inputs
            .into_iter()
            .zip(&self.input_arguments)
            .map(|(slots, arg)| ArgumentBinding {
                arg_index: arg.idx,
                slots,
            })
            .collect();
        let outputs = outputs
            .into_iter()
            .zip(&self.output_arguments)
            .map(|(tensor, arg)| ArgumentBinding {
                arg_index: arg.idx,
                slots: vec![tensor],
            })
            .collect();
        Box::new(HostPipeline::new(
            Arc::clone(&self.kernel),
            inputs,
            outputs,
            dry_run,
            enable_profiling,
        ))
    }
}

impl std::fmt::Debug for CompiledGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledGraph")
            .field("name", &self.metadata.name)
            .field("kernel", &self.kernel.name())
            .field("inputs", &self.input_arguments.len())
            .field("outputs", &self.output_arguments.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model_ir::IoDescriptor;
    use tensor_core::{DType, PartialShape, Shape};

    fn metadata() -> NetworkMetadata<Validated> {
        NetworkMetadata::new(
            "echo",
            vec![
                IoDescriptor::data("a", DType::F32, PartialShape::from_static(&[2])),
                IoDescriptor::data("b", DType::F32, PartialShape::from_static(&[2])),
            ],
            vec![IoDescriptor::data("y", DType::F32, PartialShape::from_static(&[2]))],
        )
        .validate()
        .unwrap()
    }

    #[test]
    fn test_argument_numbering() {
        let g = CompiledGraph::new(metadata(), Arc::new(IdentityKernel));
        let idx: Vec<u32> = g
            .input_arguments()
            .iter()
            .chain(g.output_arguments())
            .map(|a| a.idx)
            .collect();
        assert_eq!(idx, vec![0, 1, 2]);
        assert_eq!(g.batch_size(), None);
    }

    #[test]
    fn test_with_arguments_count_mismatch() {
        let m = metadata();
        let args = vec![ArgumentDescriptor::for_slot(&m.inputs()[0], 0)];
        assert!(CompiledGraph::with_arguments(m, args, vec![], Arc::new(IdentityKernel)).is_err());
    }

    #[test]
    fn test_kernel_io_concatenates_batch_items() {
        let items = vec![
            Tensor::from_f32(Shape::matrix(1, 1), &[1.0]).unwrap(),
            Tensor::from_f32(Shape::matrix(1, 1), &[2.0]).unwrap(),
        ];
        let out = Tensor::host(DType::F32, Shape::matrix(2, 1));
        let inputs = vec![items];
        let outputs = vec![vec![out.clone()]];
        let io = KernelIo::new(&inputs, &outputs);
        assert_eq!(io.input_f32(0).unwrap(), vec![1.0, 2.0]);
        assert!(io.write_output(0, &[0u8; 12]).is_err());
        IdentityKernel.execute(&io).unwrap();
        assert_eq!(out.to_f32_vec().unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_kernel_io_missing_slots() {
        let io = KernelIo::new(&[], &[]);
        assert!(io.input(0).is_err());
        assert!(io.output(0).is_err());
    }
}
