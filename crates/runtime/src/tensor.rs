// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Tensors exchanged between callers, requests and pipelines.
//!
//! A [`Tensor`] is a shared handle: cloning it aliases the same memory, and
//! [`Tensor::same_object`] compares handle identity. Three kinds exist:
//!
//! ```text
//!   Local   allocated by a request from its device context
//!   Remote  created through the device by the caller, context-bound
//!   Host    caller-owned; heap memory, or context memory when created
//!           with Device::create_host_tensor
//! ```
//!
//! Whether a tensor can be bound to a graph argument without copying is
//! decided from its storage, never from its kind: the device context is
//! asked whether [`Tensor::address`] lies inside one of its allocations.

use crate::RuntimeError;
use memory_manager::{BufferView, ContextId, DeviceBuffer, DeviceContext};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard};
use tensor_core::{codec, DType, Shape, TensorError};

/// The closed set of tensor variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TensorKind {
    Local,
    Remote,
    Host,
}

enum Storage {
    Device(DeviceBuffer),
    Heap { data: Mutex<Vec<u8>>, address: usize },
}

impl Storage {
    fn heap(bytes: Vec<u8>) -> Self {
        let address = bytes.as_ptr() as usize;
        Storage::Heap {
            data: Mutex::new(bytes),
            address,
        }
    }

    fn device(context: &DeviceContext, size_bytes: usize) -> Result<Self, RuntimeError> {
        // Zero-element tensors still get a distinct, registered address.
        Ok(Storage::Device(context.allocate(size_bytes.max(1))?))
    }

    fn address(&self) -> usize {
        match self {
            Storage::Device(buf) => buf.address(),
            Storage::Heap { address, .. } => *address,
        }
    }

    fn capacity(&self) -> usize {
        match self {
            Storage::Device(buf) => buf.size_bytes(),
            Storage::Heap { data, .. } => data.lock().unwrap_or_else(PoisonError::into_inner).len(),
        }
    }

    fn lock(&self) -> StorageGuard<'_> {
        match self {
            Storage::Device(buf) => StorageGuard::Device(buf.lock()),
            Storage::Heap { data, .. } => {
                StorageGuard::Heap(data.lock().unwrap_or_else(PoisonError::into_inner))
            }
        }
    }
}

enum StorageGuard<'a> {
    Device(BufferView<'a>),
    Heap(MutexGuard<'a, Vec<u8>>),
}

impl Deref for StorageGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            StorageGuard::Device(view) => &view[..],
            StorageGuard::Heap(guard) => &guard[..],
        }
    }
}

impl DerefMut for StorageGuard<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        match self {
            StorageGuard::Device(view) => &mut view[..],
            StorageGuard::Heap(guard) => &mut guard[..],
        }
    }
}

struct Layout {
    shape: Shape,
    storage: Storage,
}

struct TensorInner {
    kind: TensorKind,
    dtype: DType,
    layout: RwLock<Layout>,
    shared_with_user: AtomicBool,
    address_changed: AtomicBool,
}

/// A shared tensor handle.
#[derive(Clone)]
pub struct Tensor {
    inner: Arc<TensorInner>,
}

impl Tensor {
    fn with_storage(kind: TensorKind, dtype: DType, shape: Shape, storage: Storage) -> Self {
        Self {
            inner: Arc::new(TensorInner {
                kind,
                dtype,
                layout: RwLock::new(Layout { shape, storage }),
                shared_with_user: AtomicBool::new(false),
                address_changed: AtomicBool::new(false),
            }),
        }
    }

    /// Allocates a request-owned tensor from `context`.
    pub fn local(context: &DeviceContext, dtype: DType, shape: Shape) -> Result<Self, RuntimeError> {
        let storage = Storage::device(context, shape.size_bytes(dtype))?;
        Ok(Self::with_storage(TensorKind::Local, dtype, shape, storage))
    }

    /// Allocates a context-bound remote tensor.
    pub fn remote(context: &DeviceContext, dtype: DType, shape: Shape) -> Result<Self, RuntimeError> {
        let storage = Storage::device(context, shape.size_bytes(dtype))?;
        Ok(Self::with_storage(TensorKind::Remote, dtype, shape, storage))
    }

    /// Allocates a caller-owned tensor whose memory lives in `context`.
    pub fn host_in(context: &DeviceContext, dtype: DType, shape: Shape) -> Result<Self, RuntimeError> {
        let storage = Storage::device(context, shape.size_bytes(dtype))?;
        Ok(Self::with_storage(TensorKind::Host, dtype, shape, storage))
    }

    /// A zero-filled caller tensor on the heap.
    pub fn host(dtype: DType, shape: Shape) -> Self {
        let bytes = vec![0u8; shape.size_bytes(dtype)];
        Self::with_storage(TensorKind::Host, dtype, shape, Storage::heap(bytes))
    }

    /// A caller tensor wrapping `bytes`.
    pub fn from_bytes(dtype: DType, shape: Shape, bytes: Vec<u8>) -> Result<Self, TensorError> {
        let expected = shape.size_bytes(dtype);
        if bytes.len() != expected {
            return Err(TensorError::BufferSizeMismatch {
                expected,
                actual: bytes.len(),
            });
        }
        Ok(Self::with_storage(TensorKind::Host, dtype, shape, Storage::heap(bytes)))
    }

    /// A caller `f32` tensor holding `values`.
    pub fn from_f32(shape: Shape, values: &[f32]) -> Result<Self, TensorError> {
        let mut bytes = vec![0u8; values.len() * 4];
        codec::write_f32s(&mut bytes, values)?;
        Self::from_bytes(DType::F32, shape, bytes)
    }

    fn layout(&self) -> RwLockReadGuard<'_, Layout> {
        self.inner.layout.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn kind(&self) -> TensorKind {
        self.inner.kind
    }

    pub fn dtype(&self) -> DType {
        self.inner.dtype
    }

    pub fn shape(&self) -> Shape {
        self.layout().shape.clone()
    }

    /// Bytes covered by the current shape.
    pub fn byte_size(&self) -> usize {
        self.layout().shape.size_bytes(self.inner.dtype)
    }

    /// Bytes available without reallocation.
    pub fn capacity(&self) -> usize {
        self.layout().storage.capacity()
    }

    /// Base address of the current storage.
    pub fn address(&self) -> usize {
        self.layout().storage.address()
    }

    /// The device context owning the storage, if any.
    pub fn allocation_context(&self) -> Option<ContextId> {
        match &self.layout().storage {
            Storage::Device(buf) => Some(buf.context_id()),
            Storage::Heap { .. } => None,
        }
    }

    /// Returns `true` if both handles refer to the same tensor.
    pub fn same_object(&self, other: &Tensor) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Changes the logical shape, reallocating when it no longer fits.
    ///
    /// Reallocated memory is zero-filled. A reallocated local tensor
    /// reports [`memory_address_changed`](Self::memory_address_changed)
    /// until the flag is reset.
    pub fn set_shape(&self, shape: Shape) -> Result<(), RuntimeError> {
        let needed = shape.size_bytes(self.inner.dtype);
        let mut layout = self.inner.layout.write().unwrap_or_else(PoisonError::into_inner);
        if needed > layout.storage.capacity() {
            let storage = match (&layout.storage, self.inner.kind) {
                (_, TensorKind::Remote) => {
                    return Err(RuntimeError::Unsupported(format!(
                        "remote tensors cannot grow from {} to {shape}",
                        layout.shape
                    )))
                }
                (Storage::Device(buf), _) => Storage::device(&buf.context(), needed)?,
                (Storage::Heap { .. }, _) => Storage::heap(vec![0u8; needed]),
            };
            tracing::debug!(
                "reallocated {:?} tensor {} -> {shape} ({} bytes)",
                self.inner.kind,
                layout.shape,
                needed
            );
            layout.storage = storage;
            if self.inner.kind == TensorKind::Local {
                self.inner.address_changed.store(true, Ordering::Release);
            }
        }
        layout.shape = shape;
        Ok(())
    }

    pub fn is_shared_with_user(&self) -> bool {
        self.inner.shared_with_user.load(Ordering::Acquire)
    }

    pub fn mark_shared_with_user(&self) {
        self.inner.shared_with_user.store(true, Ordering::Release);
    }

    pub fn memory_address_changed(&self) -> bool {
        self.inner.address_changed.load(Ordering::Acquire)
    }

    pub fn reset_memory_flag(&self) {
        self.inner.address_changed.store(false, Ordering::Release);
    }

    /// Runs `f` over the bytes covered by the current shape.
    pub fn read<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let layout = self.layout();
        let len = layout.shape.size_bytes(self.inner.dtype);
        let guard = layout.storage.lock();
        f(&guard[..len.min(guard.len())])
    }

    /// Runs `f` over the mutable bytes covered by the current shape.
    pub fn write<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let layout = self.layout();
        let len = layout.shape.size_bytes(self.inner.dtype);
        let mut guard = layout.storage.lock();
        let end = len.min(guard.len());
        f(&mut guard[..end])
    }

    /// Runs `f` over the whole storage, ignoring the current shape.
    pub(crate) fn write_storage<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let layout = self.layout();
        let mut guard = layout.storage.lock();
        f(&mut guard[..])
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.read(|b| b.to_vec())
    }

    pub fn to_f32_vec(&self) -> Result<Vec<f32>, TensorError> {
        self.read(codec::read_f32s)
    }

    pub fn write_f32(&self, values: &[f32]) -> Result<(), TensorError> {
        self.write(|b| codec::write_f32s(b, values))
    }

    pub fn read_u32s(&self) -> Result<Vec<u32>, TensorError> {
        self.read(codec::read_u32s)
    }

    pub fn write_u32s(&self, values: &[u32]) -> Result<(), TensorError> {
        self.write(|b| codec::write_u32s(b, values))
    }

    /// Zero-fills the whole storage.
    pub fn fill_zero(&self) {
        let layout = self.layout();
        layout.storage.lock().fill(0);
    }

    fn lock_order_key(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }
}

/// Copies `len` bytes from `src[src_offset..]` to `dst[dst_offset..]`.
///
/// Both tensors are locked in a fixed global order, so concurrent copies
/// in opposite directions cannot deadlock. Copying a tensor onto itself is
/// a no-op.
pub(crate) fn copy_region(
    src: &Tensor,
    src_offset: usize,
    dst: &Tensor,
    dst_offset: usize,
    len: usize,
) -> Result<(), RuntimeError> {
    if src.same_object(dst) {
        return Ok(());
    }
    let src_first = src.lock_order_key() < dst.lock_order_key();
    let (a, b) = if src_first { (src, dst) } else { (dst, src) };
    let layout_a = a.layout();
    let layout_b = b.layout();
    let mut guard_a = layout_a.storage.lock();
    let mut guard_b = layout_b.storage.lock();
    let (from, to): (&[u8], &mut [u8]) = if src_first {
        (&guard_a[..], &mut guard_b[..])
    } else {
        (&guard_b[..], &mut guard_a[..])
    };

    if src_offset + len > from.len() || dst_offset + len > to.len() {
        return Err(RuntimeError::InternalConsistency(format!(
            "copy of {len} bytes out of bounds (source {} at {src_offset}, destination {} at {dst_offset})",
            from.len(),
            to.len()
        )));
    }
    to[dst_offset..dst_offset + len].copy_from_slice(&from[src_offset..src_offset + len]);
    Ok(())
}

impl std::fmt::Debug for Tensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let layout = self.layout();
        f.debug_struct("Tensor")
            .field("kind", &self.inner.kind)
            .field("dtype", &self.inner.dtype)
            .field("shape", &layout.shape)
            .field("address", &format_args!("{:#x}", layout.storage.address()))
            .finish()
    }
}
