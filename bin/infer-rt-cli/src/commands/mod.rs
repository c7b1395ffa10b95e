// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

pub mod benchmark;
pub mod inspect;

use runtime::RuntimeConfig;
use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Installs the log subscriber. `RUST_LOG` wins over `-v` flags.
pub fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbosity > 1)
        .init();
}

/// Reads the runtime configuration, or the defaults without a file.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<RuntimeConfig> {
    match path {
        Some(path) => RuntimeConfig::from_file(path)
            .map_err(|e| anyhow::anyhow!("failed to load config '{}': {e}", path.display())),
        None => Ok(RuntimeConfig::default()),
    }
}
