// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Allocation contexts.
//!
//! A [`DeviceContext`] plays the role of a device driver context: every
//! buffer a request hands to the device is allocated from one, and a
//! caller buffer may only be bound to a graph argument directly (without a
//! copy) if it lies inside a live allocation of the same context.
//!
//! # Thread Safety
//! `DeviceContext` is a cheap `Clone` over `Arc<ContextInner>` and is
//! `Send + Sync`. Requests running on different executor threads share it.
//!
//! # Size Classes
//! Released buffers are binned by size class (next power of two, minimum
//! 4 KB) and reused by later allocations of the same class.

use crate::{AllocationStats, DeviceBuffer, MemoryBudget, MemoryError};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Minimum size class: 4 KB. Anything smaller is rounded up.
const MIN_SIZE_CLASS: usize = 4096;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of an allocation context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    fn next() -> Self {
        ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

/// State shared between a context and the buffers it has handed out.
pub(crate) struct ContextInner {
    id: ContextId,
    budget: MemoryBudget,
    /// Bytes currently held by live buffers.
    allocated_bytes: AtomicUsize,
    /// Released buffers: size_class → buffers.
    free_buffers: Mutex<HashMap<usize, Vec<Vec<u8>>>>,
    free_list_bytes: AtomicUsize,
    /// Live allocations: base address → length in bytes.
    live: Mutex<BTreeMap<usize, usize>>,
    stats: Mutex<AllocationStats>,
}

impl ContextInner {
    pub(crate) fn id(&self) -> ContextId {
        self.id
    }

    /// Called by `DeviceBuffer::drop`.
    pub(crate) fn release(&self, buffer: Vec<u8>, address: usize, size_bytes: usize) {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&address);
        self.allocated_bytes.fetch_sub(size_bytes, Ordering::AcqRel);

        if let Ok(mut stats) = self.stats.lock() {
            stats.record_release();
        }

        let size_class = size_class_for(size_bytes);
        self.free_list_bytes.fetch_add(buffer.len(), Ordering::AcqRel);
        if let Ok(mut free) = self.free_buffers.lock() {
            free.entry(size_class).or_default().push(buffer);
        }
    }
}

/// A budgeted allocation context.
#[derive(Clone)]
pub struct DeviceContext {
    inner: Arc<ContextInner>,
}

impl DeviceContext {
    /// Creates a new context with its own identity and budget.
    pub fn new(budget: MemoryBudget) -> Self {
        let id = ContextId::next();
        tracing::debug!("created allocation context {id} with budget {budget}");
        Self {
            inner: Arc::new(ContextInner {
                id,
                budget,
                allocated_bytes: AtomicUsize::new(0),
                free_buffers: Mutex::new(HashMap::new()),
                free_list_bytes: AtomicUsize::new(0),
                live: Mutex::new(BTreeMap::new()),
                stats: Mutex::new(AllocationStats::default()),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<ContextInner>) -> Self {
        Self { inner }
    }

    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    /// Allocates a zero-filled buffer of `size_bytes`.
    ///
    /// Returns `Err(OutOfMemory)` if the allocation would exceed the
    /// budget. A released buffer of the same size class is reused when
    /// available.
    pub fn allocate(&self, size_bytes: usize) -> Result<DeviceBuffer, MemoryError> {
        if size_bytes == 0 {
            return Err(MemoryError::ZeroSizedAllocation);
        }

        let budget = self.inner.budget.as_bytes();
        let reserved = self.inner.allocated_bytes.fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |current| {
                current
                    .checked_add(size_bytes)
                    .filter(|&total| total <= budget)
            },
        );
        let previous = match reserved {
            Ok(previous) => previous,
            Err(current) => {
                if let Ok(mut stats) = self.inner.stats.lock() {
                    stats.record_oom();
                }
                return Err(MemoryError::OutOfMemory {
                    context: self.inner.id,
                    requested_bytes: size_bytes,
                    available_bytes: budget.saturating_sub(current),
                    budget_bytes: budget,
                });
            }
        };

        let size_class = size_class_for(size_bytes);
        let mut recycled = None;
        if let Ok(mut free) = self.inner.free_buffers.lock() {
            if let Some(mut buf) = free.get_mut(&size_class).and_then(|bin| bin.pop()) {
                self.inner
                    .free_list_bytes
                    .fetch_sub(buf.len(), Ordering::AcqRel);
                if buf.len() < size_bytes {
                    buf.resize(size_bytes, 0);
                }
                buf[..size_bytes].fill(0);
                recycled = Some(buf);
            }
        }

        let reused = recycled.is_some();
        let data = recycled.unwrap_or_else(|| vec![0u8; size_bytes]);
        let address = data.as_ptr() as usize;

        self.inner
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(address, size_bytes);

        if let Ok(mut stats) = self.inner.stats.lock() {
            if reused {
                stats.record_reuse(size_bytes);
            } else {
                stats.record_fresh(size_bytes);
            }
            stats.update_peak(previous + size_bytes);
        }

        Ok(DeviceBuffer::new(
            data,
            address,
            size_bytes,
            Arc::clone(&self.inner),
        ))
    }

    /// Returns `true` if `address` lies inside a live allocation of this
    /// context.
    pub fn contains_address(&self, address: usize) -> bool {
        if address == 0 {
            return false;
        }
        let live = self.inner.live.lock().unwrap_or_else(PoisonError::into_inner);
        live.range(..=address)
            .next_back()
            .is_some_and(|(&base, &len)| address < base + len)
    }

    /// Returns `true` if `buffer` was allocated by this context.
    pub fn owns(&self, buffer: &DeviceBuffer) -> bool {
        buffer.context_id() == self.id()
    }

    /// Returns the number of bytes currently held by live buffers.
    pub fn allocated_bytes(&self) -> usize {
        self.inner.allocated_bytes.load(Ordering::Acquire)
    }

    /// Returns the number of bytes still available within the budget.
    pub fn available_bytes(&self) -> usize {
        self.inner
            .budget
            .as_bytes()
            .saturating_sub(self.allocated_bytes())
    }

    pub fn budget(&self) -> MemoryBudget {
        self.inner.budget
    }

    /// Returns the number of live allocations.
    pub fn live_buffers(&self) -> usize {
        self.inner
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns a snapshot of the allocation statistics.
    pub fn stats(&self) -> AllocationStats {
        self.inner
            .stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Returns the bytes currently cached in the free list.
    pub fn free_list_bytes(&self) -> usize {
        self.inner.free_list_bytes.load(Ordering::Acquire)
    }

    /// Releases all cached buffers back to the system allocator.
    pub fn shrink(&self) {
        if let Ok(mut free) = self.inner.free_buffers.lock() {
            free.clear();
        }
        self.inner.free_list_bytes.store(0, Ordering::Release);
    }
}

impl fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceContext")
            .field("id", &self.inner.id)
            .field("budget", &self.inner.budget)
            .field("allocated_bytes", &self.allocated_bytes())
            .finish()
    }
}

/// Computes the size class for a given allocation size.
fn size_class_for(size: usize) -> usize {
    if size <= MIN_SIZE_CLASS {
        MIN_SIZE_CLASS
    } else {
        size.next_power_of_two()
    }
}
