// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! RAII device buffers.
//!
//! A [`DeviceBuffer`] owns one allocation from a
//! [`DeviceContext`](crate::DeviceContext). The bytes sit behind a mutex so
//! a buffer can be shared between a request and the pipeline that reads it
//! on another thread. The address never changes while the buffer lives.

use crate::context::ContextInner;
use crate::{ContextId, DeviceContext};
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// An RAII handle to a device allocation.
pub struct DeviceBuffer {
    data: Mutex<Vec<u8>>,
    address: usize,
    size_bytes: usize,
    context: Arc<ContextInner>,
}

impl DeviceBuffer {
    pub(crate) fn new(
        data: Vec<u8>,
        address: usize,
        size_bytes: usize,
        context: Arc<ContextInner>,
    ) -> Self {
        Self {
            data: Mutex::new(data),
            address,
            size_bytes,
            context,
        }
    }

    /// The base address of the allocation.
    pub fn address(&self) -> usize {
        self.address
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    pub fn context_id(&self) -> ContextId {
        self.context.id()
    }

    /// Returns a handle to the context this buffer was allocated from.
    pub fn context(&self) -> DeviceContext {
        DeviceContext::from_inner(Arc::clone(&self.context))
    }

    /// Locks the buffer for reading or writing.
    pub fn lock(&self) -> BufferView<'_> {
        BufferView {
            guard: self.data.lock().unwrap_or_else(PoisonError::into_inner),
            len: self.size_bytes,
        }
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        let data = std::mem::take(self.data.get_mut().unwrap_or_else(PoisonError::into_inner));
        self.context.release(data, self.address, self.size_bytes);
    }
}

impl std::fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("address", &format_args!("{:#x}", self.address))
            .field("size_bytes", &self.size_bytes)
            .field("context", &self.context.id())
            .finish()
    }
}

/// Locked view of a [`DeviceBuffer`], limited to the requested size.
pub struct BufferView<'a> {
    guard: MutexGuard<'a, Vec<u8>>,
    len: usize,
}

impl Deref for BufferView<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.guard[..self.len]
    }
}

impl DerefMut for BufferView<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.guard[..self.len]
    }
}

#[cfg(test)]
mod tests {
    use crate::{DeviceContext, MemoryBudget};

    #[test]
    fn test_view_is_limited_to_requested_size() {
        let ctx = DeviceContext::new(MemoryBudget::from_mb(1));
        drop(ctx.allocate(4096).unwrap());
        // Recycled from the 4 KB class but only 10 bytes are visible.
        let buf = ctx.allocate(10).unwrap();
        assert_eq!(buf.lock().len(), 10);
    }

    #[test]
    fn test_write_then_read() {
        let ctx = DeviceContext::new(MemoryBudget::from_mb(1));
        let buf = ctx.allocate(4).unwrap();
        buf.lock().copy_from_slice(&[1, 2, 3, 4]);
        assert_eq!(&*buf.lock(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_context_handle_round_trip() {
        let ctx = DeviceContext::new(MemoryBudget::from_mb(1));
        let buf = ctx.allocate(8).unwrap();
        let back = buf.context();
        assert_eq!(back.id(), ctx.id());
        assert!(back.contains_address(buf.address()));
    }

    #[test]
    fn test_debug_format() {
        let ctx = DeviceContext::new(MemoryBudget::from_mb(1));
        let buf = ctx.allocate(8).unwrap();
        let s = format!("{buf:?}");
        assert!(s.contains("size_bytes: 8"));
    }
}
