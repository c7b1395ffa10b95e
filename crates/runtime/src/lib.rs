// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # runtime
//!
//! Pooled asynchronous inference on a host-emulated accelerator.
//!
//! The runtime takes:
//! - Validated `NetworkMetadata` and device `ArgumentDescriptor`s from `model-ir`.
//! - A `DeviceContext` from `memory-manager` that every device buffer is
//!   allocated from.
//!
//! And provides two layers on top of them:
//!
//! - **Requests.** A [`DeviceRequest`] binds caller tensors to the
//!   compiled graph's ports. Tensors allocated in the device's context are
//!   aliased, anything else is copied through an internal buffer. Once the
//!   [`Pipeline`] exists, buffer changes become argument updates instead of
//!   rebuilds.
//! - **Pooling.** A [`RequestPool`] keeps a fixed set of
//!   [`RequestWrapper`]s, hands them out in FIFO order, times every
//!   submission and latches the first device failure.
//!
//! ```text
//! Device ──compile──► CompiledModel ──► AsyncInferRequest ──► RequestWrapper
//!                                              │                    │
//!                                        DeviceRequest          RequestPool
//!                                              │
//!                                         HostPipeline
//! ```
//!
//! # Async Execution
//! Each [`Device`] owns a `tokio` multi-thread runtime. Submissions run on
//! its blocking pool and report through completion callbacks.

mod async_request;
mod compiled_model;
mod config;
mod device;
mod device_request;
mod error;
mod graph;
mod metrics;
mod pipeline;
mod request_pool;
mod request_wrapper;
mod tensor;
mod variable_state;

pub use async_request::AsyncInferRequest;
pub use compiled_model::CompiledModel;
pub use config::{DryRunFlag, RuntimeConfig};
pub use device::Device;
pub use device_request::{DeviceRequest, Direction, Port, SlotState, TransferStats};
pub use error::{DeviceError, RuntimeError};
pub use graph::{CompiledGraph, FnKernel, IdentityKernel, Kernel, KernelIo};
pub use metrics::{BenchmarkReport, LatencyMetrics};
pub use pipeline::{HostPipeline, Pipeline, ProfilingInfo, ProfilingStatus};
pub use request_pool::RequestPool;
pub use request_wrapper::{AsyncRequest, Completion, CompletionCallback, CompletionHandler, RequestWrapper};
pub use tensor::{Tensor, TensorKind};
pub use variable_state::VariableState;
