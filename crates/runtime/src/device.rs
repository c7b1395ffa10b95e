// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The host-emulated accelerator.
//!
//! A [`Device`] owns the allocation context every request allocates from,
//! the dry-run flag its pipelines observe, and the executor that runs
//! asynchronous submissions. Compiled models and their requests keep the
//! device's shared state alive, so the executor outlives every request.

use crate::compiled_model::CompiledModel;
use crate::config::{DryRunFlag, RuntimeConfig};
use crate::graph::{CompiledGraph, Kernel};
use crate::tensor::Tensor;
use crate::RuntimeError;
use memory_manager::{AllocationStats, DeviceContext};
use model_ir::{ArgumentDescriptor, NetworkMetadata, Validated};
use std::sync::Arc;
use tensor_core::{DType, Shape};
use tokio::runtime::{Handle, Runtime};

pub(crate) struct DeviceShared {
    pub(crate) config: RuntimeConfig,
    pub(crate) context: DeviceContext,
    pub(crate) dry_run: DryRunFlag,
    pub(crate) handle: Handle,
    runtime: Option<Runtime>,
}

impl Drop for DeviceShared {
    fn drop(&mut self) {
        // The last owner may be an executor thread; never block on shutdown.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// A host-emulated device.
pub struct Device {
    shared: Arc<DeviceShared>,
}

impl Device {
    /// Creates a device from a validated configuration.
    pub fn new(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        config.validate()?;
        let budget = config.parse_budget()?;
        let threads = config.resolve_threads();
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(threads)
            .thread_name("infer-rt-worker")
            .enable_time()
            .build()
            .map_err(|e| RuntimeError::ConfigError(format!("cannot start executor: {e}")))?;

        let context = DeviceContext::new(budget);
        tracing::info!(
            "device ready: {} budget {}, {} executor threads, dry run {}",
            context.id(),
            budget,
            threads,
            config.dry_run
        );
        Ok(Self {
            shared: Arc::new(DeviceShared {
                dry_run: DryRunFlag::new(config.dry_run),
                config,
                context,
                handle: runtime.handle().clone(),
                runtime: Some(runtime),
            }),
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.shared.config
    }

    /// The allocation context of this device.
    pub fn context(&self) -> &DeviceContext {
        &self.shared.context
    }

    pub fn dry_run(&self) -> &DryRunFlag {
        &self.shared.dry_run
    }

    /// Switches dry-run mode for every pipeline of this device.
    pub fn set_dry_run(&self, enabled: bool) {
        tracing::info!("dry run {}", if enabled { "enabled" } else { "disabled" });
        self.shared.dry_run.set(enabled);
    }

    pub fn memory_stats(&self) -> AllocationStats {
        self.shared.context.stats()
    }

    /// Compiles `metadata` with device arguments derived from it.
    pub fn compile(&self, metadata: NetworkMetadata<Validated>, kernel: Arc<dyn Kernel>) -> CompiledModel {
        tracing::info!("compiling '{}' with kernel '{}'", metadata.name, kernel.name());
        let graph = CompiledGraph::new(metadata, kernel);
        CompiledModel::new(Arc::new(graph), Arc::clone(&self.shared))
    }

    /// Compiles `metadata` with argument descriptors reported by the device.
    pub fn compile_with_arguments(
        &self,
        metadata: NetworkMetadata<Validated>,
        input_arguments: Vec<ArgumentDescriptor>,
        output_arguments: Vec<ArgumentDescriptor>,
        kernel: Arc<dyn Kernel>,
    ) -> Result<CompiledModel, RuntimeError> {
        let graph = CompiledGraph::with_arguments(metadata, input_arguments, output_arguments, kernel)?;
        Ok(CompiledModel::new(Arc::new(graph), Arc::clone(&self.shared)))
    }

    /// Creates a remote tensor bound to this device's context.
    pub fn create_remote_tensor(&self, dtype: DType, shape: Shape) -> Result<Tensor, RuntimeError> {
        Tensor::remote(&self.shared.context, dtype, shape)
    }

    /// Creates a caller-owned tensor in this device's context, which
    /// requests bind without copying.
    pub fn create_host_tensor(&self, dtype: DType, shape: Shape) -> Result<Tensor, RuntimeError> {
        Tensor::host_in(&self.shared.context, dtype, shape)
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("context", &self.shared.context)
            .field("dry_run", &self.shared.dry_run.get())
            .finish()
    }
}
