// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Latency statistics and benchmark reports.
//!
//! [`LatencyMetrics`] summarises a sequence of per-request latencies taken
//! from a [`RequestPool`](crate::RequestPool). [`BenchmarkReport`] combines
//! the aggregate with per-group statistics and throughput.

/// Statistics over one latency sequence, in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct LatencyMetrics {
    pub count: usize,
    pub min_ms: f64,
    pub max_ms: f64,
    pub avg_ms: f64,
    pub median_ms: f64,
    /// Which percentile `percentile_ms` holds.
    pub percentile: u8,
    pub percentile_ms: f64,
}

impl LatencyMetrics {
    /// Computes statistics over `latencies` with the median and the
    /// requested percentile. An empty sequence yields all zeros.
    pub fn new(latencies: &[f64], percentile: u8) -> Self {
        let percentile = percentile.min(100);
        if latencies.is_empty() {
            return Self {
                percentile,
                ..Self::default()
            };
        }
        let mut sorted = latencies.to_vec();
        sorted.sort_by(f64::total_cmp);

        Self {
            count: sorted.len(),
            min_ms: sorted[0],
            max_ms: sorted[sorted.len() - 1],
            avg_ms: sorted.iter().sum::<f64>() / sorted.len() as f64,
            median_ms: Self::at_percentile(&sorted, 50),
            percentile,
            percentile_ms: Self::at_percentile(&sorted, percentile),
        }
    }

    /// Nearest-rank lookup on an already sorted, non-empty sequence.
    fn at_percentile(sorted: &[f64], percentile: u8) -> f64 {
        let index = (sorted.len() * percentile as usize / 100).min(sorted.len() - 1);
        sorted[index]
    }

    pub fn summary(&self) -> String {
        format!(
            "{} samples: median {:.2}ms, avg {:.2}ms, min {:.2}ms, max {:.2}ms, p{} {:.2}ms",
            self.count,
            self.median_ms,
            self.avg_ms,
            self.min_ms,
            self.max_ms,
            self.percentile,
            self.percentile_ms,
        )
    }
}

/// The outcome of one benchmark run over a request pool.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BenchmarkReport {
    pub model: String,
    pub num_requests: usize,
    pub iterations: usize,
    pub duration_ms: f64,
    pub latency: LatencyMetrics,
    /// Per latency group, in group order. Empty when grouping is off.
    pub groups: Vec<LatencyMetrics>,
    pub dry_run: bool,
}

impl BenchmarkReport {
    pub fn new(
        model: impl Into<String>,
        num_requests: usize,
        duration_ms: f64,
        latencies: &[f64],
        latency_groups: &[Vec<f64>],
        percentile: u8,
    ) -> Self {
        Self {
            model: model.into(),
            num_requests,
            iterations: latencies.len(),
            duration_ms,
            latency: LatencyMetrics::new(latencies, percentile),
            groups: latency_groups
                .iter()
                .map(|g| LatencyMetrics::new(g, percentile))
                .collect(),
            dry_run: false,
        }
    }

    /// Completed iterations per second of wall-clock time.
    pub fn throughput_fps(&self) -> f64 {
        if self.duration_ms <= 0.0 || self.iterations == 0 {
            return 0.0;
        }
        self.iterations as f64 * 1000.0 / self.duration_ms
    }

    pub fn summary(&self) -> String {
        let mut out = format!(
            "Benchmark '{}': {} iterations on {} requests in {:.2}ms ({:.2} FPS){}\n  latency: {}",
            self.model,
            self.iterations,
            self.num_requests,
            self.duration_ms,
            self.throughput_fps(),
            if self.dry_run { " [dry run]" } else { "" },
            self.latency.summary(),
        );
        for (i, group) in self.groups.iter().enumerate() {
            out.push_str(&format!("\n  group {i}: {}", group.summary()));
        }
        out
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
