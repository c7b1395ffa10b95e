// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Pipelines: recorded device work with rebindable arguments.
//!
//! A pipeline is built once per request from the device tensors bound to
//! every graph argument. Afterwards the request never rebuilds it; when a
//! device buffer changes it pushes the new binding in place:
//!
//! ```text
//!   build(bindings) ──► push ──► pull ──► reset ──► push ──► ...
//!                        ▲
//!                        └── update_graph_arguments(idx, tensor)
//!                            update_graph_arguments_batching(idx, tensor, i)
//! ```

use crate::config::DryRunFlag;
use crate::graph::{Kernel, KernelIo};
use crate::tensor::Tensor;
use crate::{DeviceError, RuntimeError};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Execution status of one profiled node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfilingStatus {
    Executed,
    NotRun,
}

/// Timing of one node of the last execution.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ProfilingInfo {
    pub node_name: String,
    pub node_type: String,
    pub exec_type: String,
    pub status: ProfilingStatus,
    #[serde(with = "duration_micros")]
    pub real_time: Duration,
    #[serde(with = "duration_micros")]
    pub cpu_time: Duration,
}

mod duration_micros {
    use std::time::Duration;

    pub fn serialize<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_micros() as u64)
    }
}

/// The device-side execution object a request drives.
pub trait Pipeline: Send {
    /// Submits the recorded work.
    fn push(&mut self) -> Result<(), RuntimeError>;

    /// Waits for the submitted work and reports its outcome.
    fn pull(&mut self) -> Result<(), RuntimeError>;

    /// Makes the pipeline ready for the next `push`.
    fn reset(&mut self) -> Result<(), RuntimeError>;

    /// Rebinds argument `arg_index` to `tensor`.
    fn update_graph_arguments(
        &mut self,
        arg_index: u32,
        tensor: &Tensor,
        byte_size: usize,
    ) -> Result<(), RuntimeError>;

    /// Rebinds batch item `batch_index` of argument `arg_index`.
    fn update_graph_arguments_batching(
        &mut self,
        arg_index: u32,
        tensor: &Tensor,
        batch_index: usize,
    ) -> Result<(), RuntimeError>;

    /// Per-node timings of the last completed execution.
    fn profiling_info(&self) -> Vec<ProfilingInfo>;
}

// ── Host pipeline ──────────────────────────────────────────────────

/// One graph argument and the device tensors bound to it.
#[derive(Debug)]
pub(crate) struct ArgumentBinding {
    pub arg_index: u32,
    pub slots: Vec<Tensor>,
}

enum Stage {
    Idle,
    Submitted(Result<(), DeviceError>),
    Completed,
}

/// A pipeline that runs its graph's [`Kernel`] on the submitting thread.
pub struct HostPipeline {
    kernel: Arc<dyn Kernel>,
    inputs: Vec<ArgumentBinding>,
    outputs: Vec<ArgumentBinding>,
    dry_run: DryRunFlag,
    enable_profiling: bool,
    stage: Stage,
    profiling: Vec<ProfilingInfo>,
    submissions: u64,
}

impl HostPipeline {
    pub(crate) fn new(
        kernel: Arc<dyn Kernel>,
        inputs: Vec<ArgumentBinding>,
        outputs: Vec<ArgumentBinding>,
        dry_run: DryRunFlag,
        enable_profiling: bool,
    ) -> Self {
        tracing::info!(
            "built host pipeline for kernel '{}' ({} inputs, {} outputs)",
            kernel.name(),
            inputs.len(),
            outputs.len()
        );
        Self {
            kernel,
            inputs,
            outputs,
            dry_run,
            enable_profiling,
            stage: Stage::Idle,
            profiling: Vec::new(),
            submissions: 0,
        }
    }

    /// Number of `push` calls so far.
    pub fn submissions(&self) -> u64 {
        self.submissions
    }

    fn binding_mut(&mut self, arg_index: u32) -> Result<&mut ArgumentBinding, RuntimeError> {
        self.inputs
            .iter_mut()
            .chain(self.outputs.iter_mut())
            .find(|b| b.arg_index == arg_index)
            .ok_or_else(|| {
                RuntimeError::InternalConsistency(format!("pipeline has no argument #{arg_index}"))
            })
    }

    fn profile(&mut self, status: ProfilingStatus, elapsed: Duration) {
        if !self.enable_profiling {
            return;
        }
        self.profiling = vec![ProfilingInfo {
            node_name: self.kernel.name().to_string(),
            node_type: "Kernel".to_string(),
            exec_type: "host".to_string(),
            status,
            real_time: elapsed,
            cpu_time: elapsed,
        }];
    }
}

impl Pipeline for HostPipeline {
    fn push(&mut self) -> Result<(), RuntimeError> {
        if !matches!(self.stage, Stage::Idle) {
            return Err(RuntimeError::InternalConsistency(
                "push while a submission is outstanding".into(),
            ));
        }
        self.submissions += 1;

        if self.dry_run.get() {
            tracing::debug!("dry run: skipping kernel '{}'", self.kernel.name());
            self.profile(ProfilingStatus::NotRun, Duration::ZERO);
            self.stage = Stage::Submitted(Ok(()));
            return Ok(());
        }

        let inputs: Vec<Vec<Tensor>> = self.inputs.iter().map(|b| b.slots.clone()).collect();
        let outputs: Vec<Vec<Tensor>> = self.outputs.iter().map(|b| b.slots.clone()).collect();
        let started = Instant::now();
        let result = self.kernel.execute(&KernelIo::new(&inputs, &outputs));
        self.profile(ProfilingStatus::Executed, started.elapsed());
        if let Err(e) = &result {
            tracing::warn!("kernel '{}' failed: {e}", self.kernel.name());
        }
        self.stage = Stage::Submitted(result);
        Ok(())
    }

    fn pull(&mut self) -> Result<(), RuntimeError> {
        match std::mem::replace(&mut self.stage, Stage::Completed) {
            Stage::Submitted(result) => result.map_err(RuntimeError::from),
            other => {
                self.stage = other;
                Err(RuntimeError::InternalConsistency(
                    "pull without a pending submission".into(),
                ))
            }
        }
    }

    fn reset(&mut self) -> Result<(), RuntimeError> {
        self.stage = Stage::Idle;
        Ok(())
    }

    fn update_graph_arguments(
        &mut self,
        arg_index: u32,
        tensor: &Tensor,
        byte_size: usize,
    ) -> Result<(), RuntimeError> {
        if byte_size > tensor.capacity() {
            return Err(RuntimeError::InternalConsistency(format!(
                "argument #{arg_index}: {byte_size} bytes exceed the buffer capacity {}",
                tensor.capacity()
            )));
        }
        let binding = self.binding_mut(arg_index)?;
        binding.slots = vec![tensor.clone()];
        tracing::debug!("argument #{arg_index} rebound to {:#x}", tensor.address());
        Ok(())
    }

    fn update_graph_arguments_batching(
        &mut self,
        arg_index: u32,
        tensor: &Tensor,
        batch_index: usize,
    ) -> Result<(), RuntimeError> {
        let binding = self.binding_mut(arg_index)?;
        match batch_index.cmp(&binding.slots.len()) {
            std::cmp::Ordering::Less => binding.slots[batch_index] = tensor.clone(),
            std::cmp::Ordering::Equal => binding.slots.push(tensor.clone()),
            std::cmp::Ordering::Greater => {
                return Err(RuntimeError::InternalConsistency(format!(
                    "argument #{arg_index}: batch item {batch_index} bound before item {}",
                    binding.slots.len()
                )))
            }
        }
        tracing::debug!(
            "argument #{arg_index} batch item {batch_index} rebound to {:#x}",
            tensor.address()
        );
        Ok(())
    }

    fn profiling_info(&self) -> Vec<ProfilingInfo> {
        self.profiling.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{FnKernel, IdentityKernel};
    use tensor_core::{DType, Shape};

    fn binding(arg_index: u32, tensor: &Tensor) -> ArgumentBinding {
        ArgumentBinding {
            arg_index,
            slots: vec![tensor.clone()],
        }
    }

    fn identity_pipeline(x: &Tensor, y: &Tensor, dry_run: DryRunFlag) -> HostPipeline {
        HostPipeline::new(
            Arc::new(IdentityKernel),
            vec![binding(0, x)],
            vec![binding(1, y)],
            dry_run,
            true,
        )
    }

    #[test]
    fn test_push_pull_reset_cycle() {
        let x = Tensor::from_f32(Shape::vector(2), &[1.0, 2.0]).unwrap();
        let y = Tensor::host(DType::F32, Shape::vector(2));
        let mut p = identity_pipeline(&x, &y, DryRunFlag::default());

        p.push().unwrap();
        p.pull().unwrap();
        p.reset().unwrap();
        assert_eq!(y.to_f32_vec().unwrap(), vec![1.0, 2.0]);
        assert_eq!(p.submissions(), 1);
        assert_eq!(p.profiling_info()[0].status, ProfilingStatus::Executed);
    }

    #[test]
    fn test_out_of_order_calls_rejected() {
        let x = Tensor::host(DType::F32, Shape::vector(1));
        let mut p = identity_pipeline(&x, &x, DryRunFlag::default());
        assert!(matches!(p.pull(), Err(RuntimeError::InternalConsistency(_))));
        p.push().unwrap();
        assert!(p.push().is_err());
        p.pull().unwrap();
        assert!(p.pull().is_err());
    }

    #[test]
    fn test_dry_run_skips_kernel() {
        let x = Tensor::from_f32(Shape::vector(1), &[7.0]).unwrap();
        let y = Tensor::host(DType::F32, Shape::vector(1));
        let flag = DryRunFlag::new(true);
        let mut p = identity_pipeline(&x, &y, flag.clone());

        p.push().unwrap();
        p.pull().unwrap();
        p.reset().unwrap();
        assert_eq!(y.to_f32_vec().unwrap(), vec![0.0]);
        assert_eq!(p.profiling_info()[0].status, ProfilingStatus::NotRun);

        flag.set(false);
        p.push().unwrap();
        p.pull().unwrap();
        assert_eq!(y.to_f32_vec().unwrap(), vec![7.0]);
    }

    #[test]
    fn test_kernel_failure_surfaces_at_pull() {
        let x = Tensor::host(DType::F32, Shape::vector(1));
        let kernel = FnKernel::new("fail", |_io: &KernelIo<'_>| Err(DeviceError::new("boom")));
        let mut p = HostPipeline::new(
            Arc::new(kernel),
            vec![binding(0, &x)],
            vec![binding(1, &x)],
            DryRunFlag::default(),
            false,
        );
        p.push().unwrap();
        let err = p.pull().unwrap_err();
        assert!(matches!(err, RuntimeError::DeviceExecution(ref e) if e.detail == "boom"));
        assert!(p.profiling_info().is_empty());
    }

    #[test]
    fn test_update_graph_arguments_rebinds() {
        let x = Tensor::from_f32(Shape::vector(1), &[1.0]).unwrap();
        let x2 = Tensor::from_f32(Shape::vector(1), &[9.0]).unwrap();
        let y = Tensor::host(DType::F32, Shape::vector(1));
        let mut p = identity_pipeline(&x, &y, DryRunFlag::default());

        p.update_graph_arguments(0, &x2, 4).unwrap();
        p.push().unwrap();
        p.pull().unwrap();
        assert_eq!(y.to_f32_vec().unwrap(), vec![9.0]);

        assert!(p.update_graph_arguments(5, &x2, 4).is_err());
        assert!(p.update_graph_arguments(0, &x2, 64).is_err());
    }

    #[test]
    fn test_batching_updates_fill_in_order() {
        let items: Vec<Tensor> = (0..3)
            .map(|i| Tensor::from_f32(Shape::matrix(1, 1), &[i as f32]).unwrap())
            .collect();
        let y = Tensor::host(DType::F32, Shape::matrix(3, 1));
        let mut p = identity_pipeline(&items[0], &y, DryRunFlag::default());

        p.update_graph_arguments_batching(0, &items[1], 1).unwrap();
        p.update_graph_arguments_batching(0, &items[2], 2).unwrap();
        assert!(p.update_graph_arguments_batching(0, &items[2], 5).is_err());

        p.push().unwrap();
        p.pull().unwrap();
        assert_eq!(y.to_f32_vec().unwrap(), vec![0.0, 1.0, 2.0]);
    }
}
