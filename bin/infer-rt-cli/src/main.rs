// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # infer-rt
//!
//! Command-line interface for the inference request runtime.
//!
//! ## Usage
//! ```bash
//! # Benchmark a synthetic identity model with 4 requests in flight
//! infer-rt benchmark --nireq 4 --niter 1000
//!
//! # Benchmark compiled metadata for 10 seconds, two latency groups
//! infer-rt benchmark --model ./models/resnet --time 10 --latency-groups 2 --report out.json
//!
//! # Inspect graph metadata
//! infer-rt inspect --model ./models/resnet
//! ```

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "infer-rt",
    about = "Pooled asynchronous inference on a host-emulated device",
    version,
    author
)]
struct Cli {
    /// Path to a TOML runtime configuration (CLI arguments override it).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (repeat for more: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive a request pool and report latency and throughput.
    Benchmark {
        /// Model directory or metadata.json. A synthetic identity model is
        /// used when omitted.
        #[arg(short, long)]
        model: Option<PathBuf>,

        /// Number of requests kept in flight.
        #[arg(long)]
        nireq: Option<usize>,

        /// Number of iterations (rounded up to a multiple of --nireq).
        #[arg(long)]
        niter: Option<usize>,

        /// Run for this many seconds instead of a fixed iteration count.
        #[arg(short, long)]
        time: Option<u64>,

        /// Spread iterations round-robin over this many latency groups.
        #[arg(long, default_value_t = 0)]
        latency_groups: usize,

        /// Latency percentile to report next to the median.
        #[arg(long, default_value_t = 90)]
        percentile: u8,

        /// Device memory budget (e.g., "512M", "1G").
        #[arg(short = 'b', long)]
        budget: Option<String>,

        /// Submit without running kernels.
        #[arg(long)]
        dry_run: bool,

        /// Write the report as JSON to this path.
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Print the slots of graph metadata and their device arguments.
    Inspect {
        /// Model directory or metadata.json.
        #[arg(short, long)]
        model: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    commands::init_tracing(cli.verbose);

    match cli.command {
        Commands::Benchmark {
            model,
            nireq,
            niter,
            time,
            latency_groups,
            percentile,
            budget,
            dry_run,
            report,
        } => {
            let mut config = commands::load_config(cli.config.as_deref())?;
            if nireq.is_some() {
                config.num_requests = nireq;
            }
            if let Some(budget) = budget {
                config.memory_budget = budget;
            }
            if latency_groups > 0 {
                config.enable_latency_groups = true;
                config.latency_group_count = latency_groups;
            }
            config.dry_run |= dry_run;
            commands::benchmark::execute(
                config,
                model,
                commands::benchmark::Limits { niter, time },
                percentile,
                report,
            )
        }
        Commands::Inspect { model } => commands::inspect::execute(model),
    }
}
