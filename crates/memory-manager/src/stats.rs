// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Allocation statistics for a device context.

/// Cumulative statistics about one allocation context.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct AllocationStats {
    /// Total number of allocation requests, including failed ones.
    pub total_allocations: u64,
    /// Allocations served from the free list.
    pub reused_allocations: u64,
    /// Allocations that required fresh memory.
    pub fresh_allocations: u64,
    /// Allocation requests rejected by the budget.
    pub oom_count: u64,
    /// Peak live bytes.
    pub peak_allocated_bytes: usize,
    /// Total bytes ever handed out.
    pub cumulative_allocated_bytes: u64,
    /// Buffers returned to the context.
    pub total_releases: u64,
}

impl AllocationStats {
    /// Fraction of successful allocations served from the free list.
    pub fn reuse_ratio(&self) -> f64 {
        let total = self.reused_allocations + self.fresh_allocations;
        if total == 0 {
            return 0.0;
        }
        self.reused_allocations as f64 / total as f64
    }

    /// Buffers handed out and not yet released.
    pub fn outstanding(&self) -> u64 {
        (self.reused_allocations + self.fresh_allocations).saturating_sub(self.total_releases)
    }

    pub(crate) fn record_reuse(&mut self, size: usize) {
        self.total_allocations += 1;
        self.reused_allocations += 1;
        self.cumulative_allocated_bytes += size as u64;
    }

    pub(crate) fn record_fresh(&mut self, size: usize) {
        self.total_allocations += 1;
        self.fresh_allocations += 1;
        self.cumulative_allocated_bytes += size as u64;
    }

    pub(crate) fn record_oom(&mut self) {
        self.total_allocations += 1;
        self.oom_count += 1;
    }

    pub(crate) fn record_release(&mut self) {
        self.total_releases += 1;
    }

    pub(crate) fn update_peak(&mut self, current_bytes: usize) {
        self.peak_allocated_bytes = self.peak_allocated_bytes.max(current_bytes);
    }

    /// Returns a human-readable summary.
    pub fn summary(&self) -> String {
        let peak_kb = self.peak_allocated_bytes as f64 / 1024.0;
        format!(
            "Device allocations: {} requested ({} fresh, {} reused, {:.0}% reuse), \
             {} rejected, {} released, peak {:.1} KB",
            self.total_allocations,
            self.fresh_allocations,
            self.reused_allocations,
            self.reuse_ratio() * 100.0,
            self.oom_count,
            self.total_releases,
            peak_kb,
        )
    }
}
