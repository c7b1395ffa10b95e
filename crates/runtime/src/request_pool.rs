// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! A fixed-size pool of reusable requests.
//!
//! The pool hands out idle wrappers in FIFO order and takes them back from
//! their completion handlers, recording latencies as it goes:
//!
//! ```text
//!   get_idle_request ──► wrapper.start_async ──► device executor
//!          ▲                                          │
//!          └──── idle queue ◄── put_idle_request ◄────┘
//! ```
//!
//! A failed completion latches a sticky [`DeviceError`]. From then on every
//! `get_idle_request` and `wait_all` returns that error until
//! [`RequestPool::clear_error`].

use crate::async_request::AsyncInferRequest;
use crate::compiled_model::CompiledModel;
use crate::config::RuntimeConfig;
use crate::request_wrapper::{AsyncRequest, Completion, CompletionHandler, RequestWrapper};
use crate::{DeviceError, RuntimeError};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

#[derive(Debug, Default)]
struct PoolState {
    idle: VecDeque<usize>,
    start_time: Option<Instant>,
    end_time: Option<Instant>,
    latencies: Vec<f64>,
    latency_groups: Vec<Vec<f64>>,
    error: Option<DeviceError>,
    /// Wrappers whose last completion failed; neither idle nor executing.
    failed: Vec<usize>,
}

struct PoolShared {
    state: Mutex<PoolState>,
    idle_cv: Condvar,
    enable_latency_groups: bool,
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, PoolState>) -> MutexGuard<'a, PoolState> {
        self.idle_cv.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }

    fn put_idle_request(&self, completion: Completion) {
        let mut state = self.lock();
        match completion.error {
            Some(error) => {
                if state.error.is_none() {
                    tracing::warn!("request #{} failed: {error}", completion.id);
                    state.error = Some(error);
                } else {
                    tracing::debug!("request #{} failed after the pool error was set: {error}", completion.id);
                }
                state.failed.push(completion.id);
            }
            None => {
                state.latencies.push(completion.latency_ms);
                if self.enable_latency_groups {
                    match state.latency_groups.get_mut(completion.latency_group_id) {
                        Some(group) => group.push(completion.latency_ms),
                        None => tracing::warn!(
                            "request #{} reported unknown latency group {}",
                            completion.id,
                            completion.latency_group_id
                        ),
                    }
                }
                if state.idle.contains(&completion.id) {
                    tracing::warn!("request #{} completed while already idle", completion.id);
                } else {
                    state.idle.push_back(completion.id);
                }
                let now = Instant::now();
                state.end_time = Some(state.end_time.map_or(now, |end| end.max(now)));
            }
        }
        drop(state);
        self.idle_cv.notify_all();
    }
}

pub struct RequestPool<R: AsyncRequest = AsyncInferRequest> {
    requests: Vec<RequestWrapper<R>>,
    shared: Arc<PoolShared>,
}

impl<R: AsyncRequest> RequestPool<R> {
    /// Builds `nireq` wrappers around requests made by `factory`.
    ///
    /// `latency_group_count` buckets are kept when `enable_latency_groups`
    /// is set.
    pub fn new(
        nireq: usize,
        latency_group_count: usize,
        enable_latency_groups: bool,
        mut factory: impl FnMut(usize) -> Result<R, RuntimeError>,
    ) -> Result<Self, RuntimeError> {
        if nireq == 0 {
            return Err(RuntimeError::ConfigError(
                "a request pool needs at least one request".into(),
            ));
        }
        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState {
                idle: (0..nireq).collect(),
                latency_groups: if enable_latency_groups {
                    vec![Vec::new(); latency_group_count]
                } else {
                    Vec::new()
                },
                ..PoolState::default()
            }),
            idle_cv: Condvar::new(),
            enable_latency_groups,
        });

        let mut requests = Vec::with_capacity(nireq);
        for id in 0..nireq {
            let pool = Arc::clone(&shared);
            let handler: CompletionHandler = Arc::new(move |c| pool.put_idle_request(c));
            requests.push(RequestWrapper::new(id, factory(id)?, handler)?);
        }
        tracing::info!(
            "request pool ready: {} requests, {} latency groups",
            nireq,
            if enable_latency_groups { latency_group_count } else { 0 }
        );
        Ok(Self { requests, shared })
    }

    /// Takes the next idle wrapper, blocking until one is free.
    pub fn get_idle_request(&self) -> Result<&RequestWrapper<R>, RuntimeError> {
        let mut state = self.shared.lock();
        loop {
            if let Some(error) = &state.error {
                return Err(RuntimeError::DeviceExecution(error.clone()));
            }
            if let Some(id) = state.idle.pop_front() {
                let now = Instant::now();
                state.start_time = Some(state.start_time.map_or(now, |start| start.min(now)));
                return Ok(&self.requests[id]);
            }
            state = self.shared.wait(state);
        }
    }

    /// Returns a wrapper to the pool. Normally invoked by the wrapper's
    /// completion handler.
    pub fn put_idle_request(&self, completion: Completion) {
        self.shared.put_idle_request(completion);
    }

    /// Blocks until every wrapper is idle.
    pub fn wait_all(&self) -> Result<(), RuntimeError> {
        let mut state = self.shared.lock();
        loop {
            if let Some(error) = &state.error {
                return Err(RuntimeError::DeviceExecution(error.clone()));
            }
            if state.idle.len() == self.requests.len() {
                return Ok(());
            }
            state = self.shared.wait(state);
        }
    }

    /// Clears timing extrema and latency samples. Idle wrappers and the
    /// sticky error are left alone.
    pub fn reset_times(&self) {
        let mut state = self.shared.lock();
        state.start_time = None;
        state.end_time = None;
        state.latencies.clear();
        for group in &mut state.latency_groups {
            group.clear();
        }
    }

    /// Clears the sticky error and returns failed wrappers to the idle
    /// queue.
    pub fn clear_error(&self) -> Option<DeviceError> {
        let mut state = self.shared.lock();
        let error = state.error.take();
        let failed: Vec<usize> = state.failed.drain(..).collect();
        for id in failed {
            if !state.idle.contains(&id) {
                state.idle.push_back(id);
            }
        }
        drop(state);
        self.shared.idle_cv.notify_all();
        error
    }

    pub fn latencies(&self) -> Vec<f64> {
        self.shared.lock().latencies.clone()
    }

    pub fn latency_groups(&self) -> Vec<Vec<f64>> {
        self.shared.lock().latency_groups.clone()
    }

    /// Milliseconds between the first hand-out and the last successful
    /// completion, or 0 when either is unset.
    pub fn duration_ms(&self) -> f64 {
        let state = self.shared.lock();
        match (state.start_time, state.end_time) {
            (Some(start), Some(end)) => end.saturating_duration_since(start).as_nanos() as f64 * 1e-6,
            _ => 0.0,
        }
    }

    pub fn error(&self) -> Option<DeviceError> {
        self.shared.lock().error.clone()
    }

    pub fn idle_count(&self) -> usize {
        self.shared.lock().idle.len()
    }

    pub fn failed_count(&self) -> usize {
        self.shared.lock().failed.len()
    }

    /// Wrappers handed out and not yet completed.
    pub fn in_flight_count(&self) -> usize {
        let state = self.shared.lock();
        self.requests
            .len()
            .saturating_sub(state.idle.len() + state.failed.len())
    }

    pub fn size(&self) -> usize {
        self.requests.len()
    }

    pub fn requests(&self) -> &[RequestWrapper<R>] {
        &self.requests
    }
}

impl RequestPool<AsyncInferRequest> {
    /// Builds a pool of `config.resolve_requests()` requests on `model`.
    pub fn from_compiled_model(model: &CompiledModel, config: &RuntimeConfig) -> Result<Self, RuntimeError> {
        Self::new(
            config.resolve_requests(),
            config.latency_group_count,
            config.enable_latency_groups,
            |_| model.create_infer_request(),
        )
    }
}

impl<R: AsyncRequest> Drop for RequestPool<R> {
    fn drop(&mut self) {
        // In-flight completions still reach the shared state until every
        // wrapper is gone.
        self.requests.clear();
    }
}

impl<R: AsyncRequest> std::fmt::Debug for RequestPool<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestPool")
            .field("size", &self.requests.len())
            .field("idle", &self.idle_count())
            .field("error", &self.error())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ProfilingInfo;
    use crate::request_wrapper::CompletionCallback;
    use crate::tensor::Tensor;
    use proptest::prelude::*;

    /// Holds its completion until the test fires it.
    #[derive(Default)]
    struct ManualRequest {
        callback: Mutex<Option<CompletionCallback>>,
        pending: Mutex<bool>,
    }

    impl ManualRequest {
        fn fire(&self, error: Option<DeviceError>) {
            let was_pending = std::mem::replace(&mut *self.pending.lock().unwrap(), false);
            assert!(was_pending, "no submission to complete");
            let callback = self.callback.lock().unwrap().clone();
            if let Some(cb) = callback {
                cb(error);
            }
        }
    }

    impl AsyncRequest for ManualRequest {
        fn start_async(&self) -> Result<(), RuntimeError> {
            let mut pending = self.pending.lock().unwrap();
            if *pending {
                return Err(RuntimeError::Busy);
            }
            *pending = true;
            Ok(())
        }

        fn wait(&self) -> Result<(), RuntimeError> {
            Ok(())
        }

        fn infer(&self) -> Result<(), RuntimeError> {
            Ok(())
        }

        fn set_callback(&self, callback: CompletionCallback) -> Result<(), RuntimeError> {
            *self.callback.lock().unwrap() = Some(callback);
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

    fn pool(n: usize, groups: usize) -> RequestPool<ManualRequest> {
        RequestPool::new(n, groups, groups > 0, |_| Ok(ManualRequest::default())).unwrap()
    }

    /// Hands out one wrapper and starts it, returning its id.
    fn issue(pool: &RequestPool<ManualRequest>) -> usize {
        let w = pool.get_idle_request().unwrap();
        w.start_async().unwrap();
        w.id()
    }

    #[test]
    fn test_zero_requests_rejected() {
        let err = RequestPool::new(0, 0, false, |_| Ok(ManualRequest::default()));
        assert!(matches!(err, Err(RuntimeError::ConfigError(_))));
    }

    #[test]
    fn test_latencies_in_completion_order() {
        let p = pool(3, 0);
        let ids: Vec<usize> = (0..3).map(|_| issue(&p)).collect();
        assert_eq!(p.in_flight_count(), 3);
        for id in ids.iter().rev() {
            p.requests()[*id].request().fire(None);
        }
        p.wait_all().unwrap();
        assert_eq!(p.latencies().len(), 3);
        // Completion order decides reuse order.
        assert_eq!(issue(&p), 2);
    }

    #[test]
    fn test_error_is_sticky_until_cleared() {
        let p = pool(2, 0);
        let a = issue(&p);
        let b = issue(&p);
        p.requests()[b].request().fire(Some(DeviceError::new("lost device")));
        p.requests()[a].request().fire(None);

        for _ in 0..2 {
            match p.get_idle_request() {
                Err(RuntimeError::DeviceExecution(e)) => assert_eq!(e.detail, "lost device"),
                other => panic!("unexpected: {other:?}"),
            }
        }
        assert!(p.wait_all().is_err());
        assert_eq!(p.failed_count(), 1);
        assert_eq!(p.latencies().len(), 1);

        assert_eq!(p.clear_error(), Some(DeviceError::new("lost device")));
        assert_eq!(p.idle_count(), 2);
        p.wait_all().unwrap();
    }

    #[test]
    fn test_duration_spans_the_round() {
        let p = pool(2, 0);
        let before = Instant::now();
        let a = issue(&p);
        let b = issue(&p);
        std::thread::sleep(std::time::Duration::from_millis(5));
        p.requests()[a].request().fire(None);
        std::thread::sleep(std::time::Duration::from_millis(5));
        p.requests()[b].request().fire(None);
        p.wait_all().unwrap();
        let wall_ms = before.elapsed().as_nanos() as f64 * 1e-6;

        let longest = p.latencies().into_iter().fold(0.0, f64::max);
        let duration = p.duration_ms();
        assert!(longest >= 10.0, "latency {longest}");
        assert!(duration >= longest, "duration {duration} < latency {longest}");
        assert!(duration <= wall_ms, "duration {duration} > wall clock {wall_ms}");
    }

    #[test]
    fn test_busy_restart_is_not_a_failure() {
        let p = pool(2, 0);
        let w = p.get_idle_request().unwrap();
        w.start_async().unwrap();
        assert!(matches!(w.start_async(), Err(RuntimeError::Busy)));

        assert_eq!(p.error(), None);
        assert_eq!(p.failed_count(), 0);
        assert_eq!(p.idle_count(), 1);
        assert_eq!(p.in_flight_count(), 1);

        w.request().fire(None);
        p.wait_all().unwrap();
        assert_eq!(p.idle_count(), 2);
        assert_eq!(p.in_flight_count(), 0);
        assert_eq!(p.latencies().len(), 1);
        assert_eq!(p.clear_error(), None);
        assert_eq!(p.idle_count(), 2);
    }

    #[test]
    fn test_first_error_wins() {
        let p = pool(2, 0);
        let a = issue(&p);
        let b = issue(&p);
        p.requests()[a].request().fire(Some(DeviceError::new("first")));
        p.requests()[b].request().fire(Some(DeviceError::new("second")));
        assert_eq!(p.error(), Some(DeviceError::new("first")));
        assert_eq!(p.failed_count(), 2);
    }

    #[test]
    fn test_latency_groups() {
        let p = pool(2, 2);
        for group in [0, 1, 1, 5] {
            let w = p.get_idle_request().unwrap();
            w.set_latency_group_id(group);
            w.start_async().unwrap();
            w.request().fire(None);
        }
        let groups = p.latency_groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 1);
        assert_eq!(groups[1].len(), 2);
        // The out-of-range group still counts in the aggregate.
        assert_eq!(p.latencies().len(), 4);
    }

    #[test]
    fn test_reset_times_keeps_idle_queue() {
        let p = pool(4, 2);
        for _ in 0..3 {
            let id = issue(&p);
            p.requests()[id].request().fire(None);
        }
        let idle_before = p.idle_count();
        p.reset_times();
        assert!(p.latencies().is_empty());
        assert!(p.latency_groups().iter().all(Vec::is_empty));
        assert_eq!(p.duration_ms(), 0.0);
        assert_eq!(p.idle_count(), idle_before);
    }

    #[test]
    fn test_waiter_unblocked_by_completion() {
        let p = Arc::new(pool(1, 0));
        let id = issue(&p);
        let waiter = {
            let p = Arc::clone(&p);
            std::thread::spawn(move || p.get_idle_request().map(|w| w.id()))
        };
        std::thread::sleep(std::time::Duration::from_millis(20));
        p.requests()[id].request().fire(None);
        assert_eq!(waiter.join().unwrap().unwrap(), 0);
    }

    #[test]
    fn test_waiter_unblocked_by_error() {
        let p = Arc::new(pool(1, 0));
        let id = issue(&p);
        let waiter = {
            let p = Arc::clone(&p);
            std::thread::spawn(move || p.wait_all())
        };
        std::thread::sleep(std::time::Duration::from_millis(20));
        p.requests()[id].request().fire(Some(DeviceError::new("fault")));
        assert!(waiter.join().unwrap().is_err());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Issue,
        Complete(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![Just(Op::Issue), (0usize..16).prop_map(Op::Complete)]
    }

    proptest! {
        #[test]
        fn prop_idle_plus_in_flight_is_constant(n in 1usize..6, ops in prop::collection::vec(op(), 0..64)) {
            let p = pool(n, 0);
            let mut outstanding: Vec<usize> = Vec::new();
            for op in ops {
                match op {
                    Op::Issue if p.idle_count() > 0 => outstanding.push(issue(&p)),
                    Op::Complete(k) if !outstanding.is_empty() => {
                        let id = outstanding.remove(k % outstanding.len());
                        p.requests()[id].request().fire(None);
                    }
                    _ => {}
                }
                prop_assert_eq!(p.idle_count() + p.in_flight_count(), n);
                prop_assert_eq!(p.in_flight_count(), outstanding.len());
            }
        }

        #[test]
        fn prop_sequential_reuse_is_round_robin(n in 1usize..6, rounds in 1usize..4) {
            let p = pool(n, 0);
            let order: Vec<usize> = (0..n * rounds)
                .map(|_| {
                    let id = issue(&p);
                    p.requests()[id].request().fire(None);
                    id
                })
                .collect();
            let expected: Vec<usize> = (0..n * rounds).map(|i| i % n).collect();
            prop_assert_eq!(order, expected);
        }
    }
}
