// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # memory-manager
//!
//! The device-buffer allocator used by inference requests, and the
//! allocation-context checker that decides whether a caller buffer can be
//! bound to a graph argument without copying.
//!
//! # Key Components
//!
//! - [`DeviceContext`]: one allocation context. Enforces a
//!   [`MemoryBudget`], recycles released buffers by size class, and keeps a
//!   registry of live address ranges so that
//!   [`DeviceContext::contains_address`] can answer "was this memory
//!   allocated here?".
//! - [`DeviceBuffer`]: an RAII handle to one allocation. Its address is
//!   stable for its whole lifetime; dropping it unregisters the range and
//!   returns the memory to the free list.
//! - [`AllocationStats`]: cumulative allocator metrics.
//!
//! # Ownership Model
//!
//! ```text
//! DeviceContext::allocate(size)
//!       │
//!       ▼
//!   DeviceBuffer  ◄─── owns Vec<u8>, holds Arc<ContextInner>
//!       │               (address registered in the live map)
//!       │  drop()
//!       ▼
//!   ContextInner::release()  ──► live map − range, free list + buffer
//! ```
//!
//! # Example
//! ```
//! use memory_manager::{DeviceContext, MemoryBudget};
//!
//! let ctx = DeviceContext::new(MemoryBudget::from_mb(64));
//! let other = DeviceContext::new(MemoryBudget::from_mb(64));
//!
//! let buf = ctx.allocate(4096).unwrap();
//! assert!(ctx.contains_address(buf.address()));
//! assert!(ctx.contains_address(buf.address() + 4095));
//! assert!(!other.contains_address(buf.address()));
//!
//! let addr = buf.address();
//! drop(buf);
//! assert!(!ctx.contains_address(addr));
//! assert_eq!(ctx.allocated_bytes(), 0);
//! ```

mod budget;
mod buffer;
pub mod context;
mod error;
mod stats;

pub use budget::MemoryBudget;
pub use buffer::{BufferView, DeviceBuffer};
pub use context::{ContextId, DeviceContext};
pub use error::MemoryError;
pub use stats::AllocationStats;
