// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Asynchronous execution of a [`DeviceRequest`] on the device executor.
//!
//! `start_async` hands `infer_async` + `get_result` to a blocking executor
//! thread and returns. When the work finishes, on that thread, the
//! completion callback runs first and `wait()`ers are woken afterwards.
//! Exactly one submission can be in flight per request.
//!
//! ```text
//!   Idle ──start_async──► Running ──result──► Completing ──callback done──► Idle
//! ```
//!
//! `Running` rejects every other call with [`RuntimeError::Busy`]. During
//! `Completing` the callback may already have handed the request to someone
//! else, so calls from other threads wait for `Idle` instead.

use crate::device::DeviceShared;
use crate::device_request::{DeviceRequest, TransferStats};
use crate::pipeline::ProfilingInfo;
use crate::request_wrapper::{AsyncRequest, CompletionCallback};
use crate::tensor::Tensor;
use crate::variable_state::VariableState;
use crate::{DeviceError, RuntimeError};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Duration;

const TASK_PANICKED: &str = "request task panicked";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Phase {
    #[default]
    Idle,
    Running,
    /// The callback is running on this executor thread.
    Completing(ThreadId),
}

#[derive(Default)]
struct CompletionState {
    phase: Phase,
    last_error: Option<DeviceError>,
}

#[derive(Default)]
struct Completion {
    state: Mutex<CompletionState>,
    done: Condvar,
}

impl Completion {
    /// Locks the state once the request is idle.
    fn acquire_idle(&self) -> Result<MutexGuard<'_, CompletionState>, RuntimeError> {
        let mut state = lock(&self.state);
        loop {
            match state.phase {
                Phase::Idle => return Ok(state),
                Phase::Running => return Err(RuntimeError::Busy),
                Phase::Completing(owner) if owner == thread::current().id() => {
                    return Err(RuntimeError::Busy)
                }
                Phase::Completing(_) => {
                    state = self.done.wait(state).unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }

    fn wait_idle(&self) -> MutexGuard<'_, CompletionState> {
        let state = lock(&self.state);
        self.done
            .wait_while(state, |s| s.phase != Phase::Idle)
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn finish(&self, error: Option<DeviceError>) {
        let mut state = lock(&self.state);
        state.phase = Phase::Idle;
        state.last_error = error;
        drop(state);
        self.done.notify_all();
    }
}

/// Marks the submission finished when dropped, even if the callback
/// panicked.
struct CompletionGuard {
    completion: Arc<Completion>,
    error: Option<DeviceError>,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.completion.finish(self.error.take());
    }
}

pub struct AsyncInferRequest {
    request: Arc<Mutex<DeviceRequest>>,
    callback: Arc<Mutex<Option<CompletionCallback>>>,
    completion: Arc<Completion>,
    device: Arc<DeviceShared>,
}

impl AsyncInferRequest {
    pub(crate) fn new(request: DeviceRequest, device: Arc<DeviceShared>) -> Self {
        Self {
            request: Arc::new(Mutex::new(request)),
            callback: Arc::new(Mutex::new(None)),
            completion: Arc::new(Completion::default()),
            device,
        }
    }

    pub fn is_busy(&self) -> bool {
        lock(&self.completion.state).phase != Phase::Idle
    }

    /// Installs the callback invoked once per asynchronous submission.
    pub fn set_callback(&self, callback: CompletionCallback) -> Result<(), RuntimeError> {
        let state = self.completion.acquire_idle()?;
        *lock(&self.callback) = Some(callback);
        drop(state);
        Ok(())
    }

    /// Submits the request to the executor without waiting for it.
    pub fn start_async(&self) -> Result<(), RuntimeError> {
        {
            let mut state = self.completion.acquire_idle()?;
            state.phase = Phase::Running;
            state.last_error = None;
        }

        let request = Arc::clone(&self.request);
        let callback = Arc::clone(&self.callback);
        let completion = Arc::clone(&self.completion);
        self.device.handle.spawn_blocking(move || {
            let mut guard = CompletionGuard {
                completion: Arc::clone(&completion),
                error: Some(DeviceError::new(TASK_PANICKED)),
            };
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                let mut request = lock(&request);
                request.infer_async().and_then(|()| request.get_result())
            }));
            let error = match result {
                Ok(Ok(())) => None,
                Ok(Err(e)) => {
                    tracing::warn!("asynchronous inference failed: {e}");
                    Some(DeviceError::from(&e))
                }
                Err(_) => {
                    tracing::error!("asynchronous inference panicked");
                    Some(DeviceError::new(TASK_PANICKED))
                }
            };
            lock(&completion.state).phase = Phase::Completing(thread::current().id());
            let callback = lock(&callback).clone();
            if let Some(callback) = callback {
                callback(error.clone());
            }
            guard.error = error;
        });
        Ok(())
    }

    /// Blocks until the in-flight submission, if any, has completed and
    /// returns its outcome.
    pub fn wait(&self) -> Result<(), RuntimeError> {
        let state = self.completion.wait_idle();
        match &state.last_error {
            Some(e) => Err(RuntimeError::DeviceExecution(e.clone())),
            None => Ok(()),
        }
    }

    /// Like [`wait`](Self::wait) with a deadline; `Ok(false)` on timeout.
    pub fn wait_for(&self, timeout: Duration) -> Result<bool, RuntimeError> {
        let state = lock(&self.completion.state);
        let (state, result) = self
            .completion
            .done
            .wait_timeout_while(state, timeout, |s| s.phase != Phase::Idle)
            .unwrap_or_else(PoisonError::into_inner);
        if result.timed_out() {
            return Ok(false);
        }
        match &state.last_error {
            Some(e) => Err(RuntimeError::DeviceExecution(e.clone())),
            None => Ok(true),
        }
    }

    /// Runs one inference on the calling thread. The callback is not
    /// invoked.
    pub fn infer(&self) -> Result<(), RuntimeError> {
        self.completion.acquire_idle()?.phase = Phase::Running;
        let result = panic::catch_unwind(AssertUnwindSafe(|| lock(&self.request).infer()))
            .unwrap_or_else(|_| {
                tracing::error!("inference panicked");
                Err(RuntimeError::DeviceExecution(DeviceError::new(TASK_PANICKED)))
            });
        self.completion
            .finish(result.as_ref().err().map(DeviceError::from));
        result
    }

    /// Runs `f` on the idle request.
    pub fn with_request<T>(
        &self,
        f: impl FnOnce(&mut DeviceRequest) -> Result<T, RuntimeError>,
    ) -> Result<T, RuntimeError> {
        let state = self.completion.acquire_idle()?;
        let mut request = lock(&self.request);
        let result = f(&mut *request);
        drop(request);
        drop(state);
        result
    }

    pub fn set_tensor(&self, name: &str, tensor: Tensor) -> Result<(), RuntimeError> {
        self.with_request(|r| r.set_tensor(name, tensor))
    }

    pub fn set_tensors(&self, name: &str, tensors: Vec<Tensor>) -> Result<(), RuntimeError> {
        self.with_request(|r| r.set_tensors(name, tensors))
    }

    pub fn get_tensor(&self, name: &str) -> Result<Tensor, RuntimeError> {
        self.with_request(|r| r.get_tensor(name))
    }

    pub fn query_state(&self) -> Result<Vec<Arc<VariableState>>, RuntimeError> {
        self.with_request(|r| Ok(r.query_state()))
    }

    pub fn get_profiling_info(&self) -> Result<Vec<ProfilingInfo>, RuntimeError> {
        self.with_request(|r| r.get_profiling_info())
    }

    pub fn transfer_stats(&self) -> Result<TransferStats, RuntimeError> {
        self.with_request(|r| Ok(r.transfer_stats()))
    }
}

impl AsyncRequest for AsyncInferRequest {
    fn start_async(&self) -> Result<(), RuntimeError> {
        AsyncInferRequest::start_async(self)
    }

    fn wait(&self) -> Result<(), RuntimeError> {
        AsyncInferRequest::wait(self)
    }

    fn infer(&self) -> Result<(), RuntimeError> {
        AsyncInferRequest::infer(self)
    }

    fn set_callback(&self, callback: CompletionCallback) -> Result<(), RuntimeError> {
        AsyncInferRequest::set_callback(self, callback)
    }

    fn profiling_info(&self) -> Result<Vec<ProfilingInfo>, RuntimeError> {
        self.get_profiling_info()
    }

    fn tensor(&self, name: &str) -> Result<Tensor, RuntimeError> {
        self.get_tensor(name)
    }

    fn set_tensor(&self, name: &str, tensor: Tensor) -> Result<(), RuntimeError> {
        AsyncInferRequest::set_tensor(self, name, tensor)
    }
}

impl Drop for AsyncInferRequest {
    fn drop(&mut self) {
        if let Err(e) = self.wait() {
            tracing::debug!("request dropped after a failed submission: {e}");
        }
    }
}

impl std::fmt::Debug for AsyncInferRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncInferRequest")
            .field("busy", &self.is_busy())
            .finish()
    }
}
