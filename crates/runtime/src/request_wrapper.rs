// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! One reusable unit of pooled execution.
//!
//! A [`RequestWrapper`] times each submission of its request and reports
//! `(id, latency group, latency, error)` through the completion handler it
//! was built with. The pool installs a handler that returns the wrapper to
//! its idle queue.

use crate::async_request::AsyncInferRequest;
use crate::pipeline::ProfilingInfo;
use crate::tensor::Tensor;
use crate::{DeviceError, RuntimeError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tensor_core::Shape;

/// Invoked once per asynchronous submission with its outcome.
pub type CompletionCallback = Arc<dyn Fn(Option<DeviceError>) + Send + Sync>;

/// The execution interface a pool drives.
pub trait AsyncRequest: Send + Sync + 'static {
    fn start_async(&self) -> Result<(), RuntimeError>;

    fn wait(&self) -> Result<(), RuntimeError>;

    /// Runs to completion on the calling thread without invoking the
    /// callback.
    fn infer(&self) -> Result<(), RuntimeError>;

    fn set_callback(&self, callback: CompletionCallback) -> Result<(), RuntimeError>;

    fn profiling_info(&self) -> Result<Vec<ProfilingInfo>, RuntimeError>;

    fn tensor(&self, name: &str) -> Result<Tensor, RuntimeError>;

    fn set_tensor(&self, name: &str, tensor: Tensor) -> Result<(), RuntimeError>;
}

/// What a wrapper reports when a submission finishes.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub id: usize,
    pub latency_group_id: usize,
    pub latency_ms: f64,
    pub error: Option<DeviceError>,
}

pub type CompletionHandler = Arc<dyn Fn(Completion) + Send + Sync>;

#[derive(Debug, Default)]
struct Timing {
    start: Option<Instant>,
    end: Option<Instant>,
}

impl Timing {
    fn latency_ms(&self) -> Option<f64> {
        match (self.start, self.end) {
            (Some(start), Some(end)) => Some(end.saturating_duration_since(start).as_nanos() as f64 * 1e-6),
            _ => None,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Records the end time and reports the completion.
fn complete(
    id: usize,
    timing: &Mutex<Timing>,
    group: &AtomicUsize,
    on_complete: &CompletionHandler,
    error: Option<DeviceError>,
) {
    let latency_ms = {
        let mut timing = lock(timing);
        timing.end = Some(Instant::now());
        timing.latency_ms().unwrap_or(0.0)
    };
    on_complete(Completion {
        id,
        latency_group_id: group.load(Ordering::Acquire),
        latency_ms,
        error,
    });
}

pub struct RequestWrapper<R: AsyncRequest = AsyncInferRequest> {
    id: usize,
    request: R,
    latency_group_id: Arc<AtomicUsize>,
    timing: Arc<Mutex<Timing>>,
    on_complete: CompletionHandler,
    output_buffers: Mutex<HashMap<String, Tensor>>,
}

impl<R: AsyncRequest> RequestWrapper<R> {
    /// Wraps `request` and routes its completions to `on_complete`.
    pub fn new(id: usize, request: R, on_complete: CompletionHandler) -> Result<Self, RuntimeError> {
        let timing = Arc::new(Mutex::new(Timing::default()));
        let latency_group_id = Arc::new(AtomicUsize::new(0));

        let callback: CompletionCallback = {
            let timing = Arc::clone(&timing);
            let group = Arc::clone(&latency_group_id);
            let on_complete = Arc::clone(&on_complete);
            Arc::new(move |error| complete(id, &timing, &group, &on_complete, error))
        };
        request.set_callback(callback)?;

        Ok(Self {
            id,
            request,
            latency_group_id,
            timing,
            on_complete,
            output_buffers: Mutex::new(HashMap::new()),
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn request(&self) -> &R {
        &self.request
    }

    /// Records the start time and submits. A submission rejected
    /// synchronously is reported as a failed completion too, so nothing
    /// waits for it. `Busy` is not: the running submission still reports.
    pub fn start_async(&self) -> Result<(), RuntimeError> {
        let previous = self.mark_start();
        match self.request.start_async() {
            Ok(()) => Ok(()),
            Err(RuntimeError::Busy) => {
                self.restore_timing(previous);
                Err(RuntimeError::Busy)
            }
            Err(e) => {
                complete(
                    self.id,
                    &self.timing,
                    &self.latency_group_id,
                    &self.on_complete,
                    Some(DeviceError::from(&e)),
                );
                Err(e)
            }
        }
    }

    pub fn wait(&self) -> Result<(), RuntimeError> {
        self.request.wait()
    }

    /// Runs one submission on the calling thread, then reports the
    /// completion exactly as an asynchronous one would.
    pub fn infer(&self) -> Result<(), RuntimeError> {
        let previous = self.mark_start();
        let result = self.request.infer();
        if matches!(result, Err(RuntimeError::Busy)) {
            self.restore_timing(previous);
            return result;
        }
        let error = result.as_ref().err().map(DeviceError::from);
        complete(self.id, &self.timing, &self.latency_group_id, &self.on_complete, error);
        result
    }

    fn mark_start(&self) -> Timing {
        let started = Timing {
            start: Some(Instant::now()),
            end: None,
        };
        std::mem::replace(&mut *lock(&self.timing), started)
    }

    /// Puts back the timing of a submission that is still running.
    fn restore_timing(&self, previous: Timing) {
        let mut timing = lock(&self.timing);
        if timing.end.is_none() {
            *timing = previous;
        }
    }

    /// Latency of the last finished submission in milliseconds.
    pub fn latency_ms(&self) -> Option<f64> {
        lock(&self.timing).latency_ms()
    }

    pub fn latency_group_id(&self) -> usize {
        self.latency_group_id.load(Ordering::Acquire)
    }

    pub fn set_latency_group_id(&self, id: usize) {
        self.latency_group_id.store(id, Ordering::Release);
    }

    pub fn profiling_info(&self) -> Result<Vec<ProfilingInfo>, RuntimeError> {
        self.request.profiling_info()
    }

    pub fn tensor(&self, name: &str) -> Result<Tensor, RuntimeError> {
        self.request.tensor(name)
    }

    pub fn set_tensor(&self, name: &str, tensor: Tensor) -> Result<(), RuntimeError> {
        self.request.set_tensor(name, tensor)
    }

    /// Changes the live shape of the tensor bound to `name`.
    pub fn set_shape(&self, name: &str, shape: Shape) -> Result<(), RuntimeError> {
        self.request.tensor(name)?.set_shape(shape)
    }

    /// Binds device-local staging buffers for outputs and keeps them for
    /// later retrieval.
    pub fn set_output_buffers(&self, buffers: HashMap<String, Tensor>) -> Result<(), RuntimeError> {
        for (name, tensor) in &buffers {
            self.request.set_tensor(name, tensor.clone())?;
        }
        lock(&self.output_buffers).extend(buffers);
        Ok(())
    }

    pub fn output_buffer(&self, name: &str) -> Option<Tensor> {
        lock(&self.output_buffers).get(name).cloned()
    }
}

impl<R: AsyncRequest> std::fmt::Debug for RequestWrapper<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestWrapper")
            .field("id", &self.id)
            .field("latency_group_id", &self.latency_group_id())
            .field("latency_ms", &self.latency_ms())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Completes synchronously inside `start_async` with a preset outcome.
    #[derive(Default)]
    struct ImmediateRequest {
        callback: Mutex<Option<CompletionCallback>>,
        fail: bool,
        busy: bool,
    }

    impl AsyncRequest for ImmediateRequest {
        fn start_async(&self) -> Result<(), RuntimeError> {
            if self.busy {
                return Err(RuntimeError::Busy);
            }
            let error = self.fail.then(|| DeviceError::new("injected"));
            if let Some(cb) = lock(&self.callback).clone() {
                cb(error);
            }
            Ok(())
        }

        fn wait(&self) -> Result<(), RuntimeError> {
            Ok(())
        }

        fn infer(&self) -> Result<(), RuntimeError> {
            if self.busy {
                return Err(RuntimeError::Busy);
            }
            if self.fail {
                return Err(DeviceError::new("injected").into());
            }
            Ok(())
        }

        fn set_callback(&self, callback: CompletionCallback) -> Result<(), RuntimeError> {
            *lock(&self.callback) = Some(callback);
            Ok(())
        }

        fn profiling_info(&self) -> Result<Vec<ProfilingInfo>, RuntimeError> {
            Ok(Vec::new())
        }

        fn tensor(&self, name: &str) -> Result<Tensor, RuntimeError> {
            Err(RuntimeError::PortNotFound(name.into()))
        }

        fn set_tensor(&self, _name: &str, _tensor: Tensor) -> Result<(), RuntimeError> {
            Ok(())
        }
    }

    fn recorder() -> (CompletionHandler, Arc<Mutex<Vec<Completion>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (Arc::new(move |c| lock(&sink).push(c)), seen)
    }

    #[test]
    fn test_async_completion_reports_group_and_latency() {
        let (handler, seen) = recorder();
        let w = RequestWrapper::new(3, ImmediateRequest::default(), handler).unwrap();
        w.set_latency_group_id(2);
        w.start_async().unwrap();

        let seen = lock(&seen);
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].id, 3);
        assert_eq!(seen[0].latency_group_id, 2);
        assert!(seen[0].latency_ms >= 0.0);
        assert!(seen[0].error.is_none());
        assert!(w.latency_ms().is_some());
    }

    #[test]
    fn test_sync_infer_reports_completion() {
        let (handler, seen) = recorder();
        let w = RequestWrapper::new(0, ImmediateRequest::default(), handler).unwrap();
        w.infer().unwrap();
        assert_eq!(lock(&seen).len(), 1);
    }

    #[test]
    fn test_failed_infer_still_reports() {
        let (handler, seen) = recorder();
        let req = ImmediateRequest {
            fail: true,
            ..ImmediateRequest::default()
        };
        let w = RequestWrapper::new(1, req, handler).unwrap();
        assert!(w.infer().is_err());
        let seen = lock(&seen);
        assert_eq!(seen[0].error, Some(DeviceError::new("injected")));
    }

    #[test]
    fn test_busy_request_reports_nothing() {
        let (handler, seen) = recorder();
        let req = ImmediateRequest {
            busy: true,
            ..ImmediateRequest::default()
        };
        let w = RequestWrapper::new(4, req, handler).unwrap();
        assert!(matches!(w.start_async(), Err(RuntimeError::Busy)));
        assert!(matches!(w.infer(), Err(RuntimeError::Busy)));
        assert!(lock(&seen).is_empty());
        assert_eq!(w.latency_ms(), None);
    }

    #[test]
    fn test_failed_async_run_reports_error() {
        let (handler, seen) = recorder();
        let req = ImmediateRequest {
            fail: true,
            ..ImmediateRequest::default()
        };
        let w = RequestWrapper::new(5, req, handler).unwrap();
        w.start_async().unwrap();
        assert_eq!(lock(&seen)[0].error, Some(DeviceError::new("injected")));
    }

    #[test]
    fn test_latency_unset_before_first_run() {
        let (handler, _) = recorder();
        let w = RequestWrapper::new(0, ImmediateRequest::default(), handler).unwrap();
        assert_eq!(w.latency_ms(), None);
    }
}
