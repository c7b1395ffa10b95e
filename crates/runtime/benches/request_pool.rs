// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Benchmarks for request binding and pool round trips.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use model_ir::{IoDescriptor, NetworkMetadata, Validated};
use runtime::{Device, IdentityKernel, RequestPool, RuntimeConfig, Tensor};
use std::sync::Arc;
use tensor_core::{DType, PartialShape, Shape};

const WIDTH: usize = 1024;

fn metadata() -> NetworkMetadata<Validated> {
    NetworkMetadata::new(
        "bench",
        vec![IoDescriptor::data("x", DType::F32, PartialShape::from_static(&[1, WIDTH]))],
        vec![IoDescriptor::data("y", DType::F32, PartialShape::from_static(&[1, WIDTH]))],
    )
    .validate()
    .unwrap()
}

fn device(dry_run: bool) -> Device {
    Device::new(RuntimeConfig {
        memory_budget: "64M".into(),
        num_threads: Some(4),
        dry_run,
        ..RuntimeConfig::default()
    })
    .unwrap()
}

fn bench_sync_infer(c: &mut Criterion) {
    let device = device(false);
    let model = device.compile(metadata(), Arc::new(IdentityKernel));
    let mut group = c.benchmark_group("sync_infer");

    let mut copied = model.create_device_request().unwrap();
    copied
        .set_tensor("x", Tensor::from_f32(Shape::matrix(1, WIDTH), &[1.0; WIDTH]).unwrap())
        .unwrap();
    group.bench_function("foreign_input", |b| b.iter(|| copied.infer().unwrap()));

    let mut aliased = model.create_device_request().unwrap();
    let x = device.create_host_tensor(DType::F32, Shape::matrix(1, WIDTH)).unwrap();
    aliased.set_tensor("x", x).unwrap();
    group.bench_function("context_input", |b| b.iter(|| aliased.infer().unwrap()));
    group.finish();
}

fn bench_pool_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool_round_trip");
    for dry_run in [false, true] {
        let device = device(dry_run);
        let model = device.compile(metadata(), Arc::new(IdentityKernel));
        for nireq in [1usize, 4] {
            let pool = RequestPool::new(nireq, 0, false, |_| model.create_infer_request()).unwrap();
            let id = BenchmarkId::new(if dry_run { "dry_run" } else { "identity" }, nireq);
            group.bench_with_input(id, &nireq, |b, &n| {
                b.iter(|| {
                    for _ in 0..n * 4 {
                        pool.get_idle_request().unwrap().start_async().unwrap();
                    }
                    pool.wait_all().unwrap();
                    pool.reset_times();
                })
            });
        }
    }
    group.finish();
}

criterion_group!(benches, bench_sync_infer, bench_pool_round_trip);
criterion_main!(benches);
