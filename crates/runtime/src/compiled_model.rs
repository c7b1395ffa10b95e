// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! A graph compiled for a [`Device`](crate::Device), and the factory for
//! its requests.

use crate::async_request::AsyncInferRequest;
use crate::device::DeviceShared;
use crate::device_request::DeviceRequest;
use crate::graph::CompiledGraph;
use crate::RuntimeError;
use model_ir::IoDescriptor;
use std::sync::Arc;

#[derive(Clone)]
pub struct CompiledModel {
    graph: Arc<CompiledGraph>,
    device: Arc<DeviceShared>,
}

impl CompiledModel {
    pub(crate) fn new(graph: Arc<CompiledGraph>, device: Arc<DeviceShared>) -> Self {
        Self { graph, device }
    }

    pub fn name(&self) -> &str {
        self.graph.name()
    }

    pub fn graph(&self) -> &Arc<CompiledGraph> {
        &self.graph
    }

    pub fn inputs(&self) -> &[IoDescriptor] {
        self.graph.metadata().inputs()
    }

    pub fn outputs(&self) -> &[IoDescriptor] {
        self.graph.metadata().outputs()
    }

    /// Creates a synchronous request with zero-filled states.
    pub fn create_device_request(&self) -> Result<DeviceRequest, RuntimeError> {
        let request = DeviceRequest::new(
            Arc::clone(&self.graph),
            self.device.context.clone(),
            &self.device.config,
            self.device.dry_run.clone(),
        )?;
        request.initialize_states();
        Ok(request)
    }

    /// Creates a request that executes on the device's executor.
    pub fn create_infer_request(&self) -> Result<AsyncInferRequest, RuntimeError> {
        let request = self.create_device_request()?;
        Ok(AsyncInferRequest::new(request, Arc::clone(&self.device)))
    }
}

impl std::fmt::Debug for CompiledModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledModel").field("graph", &self.graph).finish()
    }
}
