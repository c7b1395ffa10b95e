// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `infer-rt benchmark` command: keep a request pool busy and report
//! per-request latency and overall throughput.

use model_ir::{IoDescriptor, MetadataLoader, NetworkMetadata, Validated};
use runtime::{BenchmarkReport, Device, IdentityKernel, RequestPool, RuntimeConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tensor_core::{DType, PartialShape};

/// Iterations run when neither a count nor a duration is given.
const DEFAULT_ITERATIONS: usize = 100;

/// Width of the synthetic model's single input and output.
const SYNTHETIC_WIDTH: usize = 1024;

/// When the submission loop stops.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub niter: Option<usize>,
    pub time: Option<u64>,
}

pub fn execute(
    config: RuntimeConfig,
    model: Option<PathBuf>,
    limits: Limits,
    percentile: u8,
    report_path: Option<PathBuf>,
) -> anyhow::Result<()> {
    println!("╔══════════════════════════════════════════════════════╗");
    println!("║           infer-rt · Benchmark                       ║");
    println!("╚══════════════════════════════════════════════════════╝");
    println!();

    let metadata = match &model {
        Some(path) => MetadataLoader::load(path)
            .map_err(|e| anyhow::anyhow!("failed to load metadata from '{}': {e}", path.display()))?,
        None => {
            println!("  No model given, using a synthetic identity model.");
            synthetic_metadata()?
        }
    };
    println!("  Model:    {}", metadata.summary());

    let device = Device::new(config.clone())?;
    let compiled = device.compile(metadata, Arc::new(IdentityKernel));
    let pool = RequestPool::from_compiled_model(&compiled, &config)?;
    let groups = if config.enable_latency_groups {
        config.latency_group_count
    } else {
        0
    };
    println!(
        "  Requests: {} in flight, {} latency groups{}",
        pool.size(),
        groups,
        if device.dry_run().get() { ", dry run" } else { "" }
    );

    fill_inputs(&pool, compiled.inputs())?;

    // Warm up: build every pipeline before timing starts.
    for _ in 0..pool.size() {
        pool.get_idle_request()?.start_async()?;
    }
    pool.wait_all()?;
    pool.reset_times();

    let niter = match (limits.niter, limits.time) {
        (Some(n), _) => Some(round_up(n, pool.size())),
        (None, Some(_)) => None,
        (None, None) => Some(round_up(DEFAULT_ITERATIONS, pool.size())),
    };
    if let (Some(requested), Some(n)) = (limits.niter, niter) {
        if requested != n {
            tracing::warn!("iterations rounded up from {requested} to {n} to fill every request");
        }
    }
    let deadline = limits.time.map(|s| Instant::now() + Duration::from_secs(s));
    match (niter, limits.time) {
        (Some(n), Some(s)) => println!("  Limit:    {n} iterations or {s}s"),
        (Some(n), None) => println!("  Limit:    {n} iterations"),
        (None, Some(s)) => println!("  Limit:    {s}s"),
        (None, None) => {}
    }
    println!();

    let mut iteration = 0usize;
    loop {
        if niter.is_some_and(|n| iteration >= n) || deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        let wrapper = pool.get_idle_request()?;
        if groups > 0 {
            wrapper.set_latency_group_id(iteration % groups);
        }
        wrapper.start_async()?;
        iteration += 1;
    }
    pool.wait_all()?;

    let mut report = BenchmarkReport::new(
        compiled.name(),
        pool.size(),
        pool.duration_ms(),
        &pool.latencies(),
        &pool.latency_groups(),
        percentile,
    );
    report.dry_run = device.dry_run().get();

    println!("  {}", report.summary().replace('\n', "\n  "));
    println!("  Memory:   {}", device.memory_stats().summary());
    println!();

    if let Some(path) = report_path {
        std::fs::write(&path, report.to_json()?)
            .map_err(|e| anyhow::anyhow!("failed to write report '{}': {e}", path.display()))?;
        println!("  Report written to {}", path.display());
    }
    Ok(())
}

/// Writes a deterministic byte pattern into every caller-visible input of
/// every request.
fn fill_inputs<R: runtime::AsyncRequest>(pool: &RequestPool<R>, inputs: &[IoDescriptor]) -> anyhow::Result<()> {
    for wrapper in pool.requests() {
        for desc in inputs.iter().filter(|d| d.is_user_visible()) {
            let tensor = wrapper.tensor(&desc.name)?;
            tensor.write(|bytes| {
                for (i, b) in bytes.iter_mut().enumerate() {
                    *b = (i % 251) as u8;
                }
            });
        }
    }
    Ok(())
}

fn round_up(n: usize, multiple: usize) -> usize {
    n.max(1).div_ceil(multiple) * multiple
}

fn synthetic_metadata() -> anyhow::Result<NetworkMetadata<Validated>> {
    let shape = PartialShape::from_static(&[1, SYNTHETIC_WIDTH]);
    Ok(NetworkMetadata::new(
        "identity-synthetic",
        vec![IoDescriptor::data("input", DType::F32, shape.clone())],
        vec![IoDescriptor::data("output", DType::F32, shape)],
    )
    .validate()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_up() {
        assert_eq!(round_up(10, 4), 12);
        assert_eq!(round_up(8, 4), 8);
        assert_eq!(round_up(0, 3), 3);
    }

    #[test]
    fn test_synthetic_metadata_is_valid() {
        let m = synthetic_metadata().unwrap();
        assert_eq!(m.inputs().len(), 1);
        assert_eq!(m.outputs().len(), 1);
    }

    #[test]
    fn test_short_run_writes_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let config = RuntimeConfig {
            memory_budget: "32M".into(),
            num_requests: Some(2),
            num_threads: Some(2),
            enable_latency_groups: true,
            latency_group_count: 2,
            ..RuntimeConfig::default()
        };
        let limits = Limits {
            niter: Some(6),
            time: None,
        };
        execute(config, None, limits, 90, Some(path.clone())).unwrap();

        let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(json["iterations"], 6);
        assert_eq!(json["groups"].as_array().unwrap().len(), 2);
    }
}
