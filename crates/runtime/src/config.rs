// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Runtime configuration loaded from TOML files or constructed programmatically.
//!
//! # TOML Format
//! ```toml
//! memory_budget = "512M"
//! num_requests = 4
//! num_threads = 4
//! enable_latency_groups = true
//! latency_group_count = 2
//! enable_profiling = true
//! run_inferences_sequentially = false
//! mutable_command_lists = true
//! dry_run = false
//! ```

use crate::RuntimeError;
use memory_manager::MemoryBudget;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Configuration for the request runtime.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Device memory budget (human-readable, e.g., `"512M"`).
    pub memory_budget: String,
    /// Number of requests kept in flight by a pool.
    pub num_requests: Option<usize>,
    /// Executor worker threads (defaults to the number of online cores).
    pub num_threads: Option<usize>,
    /// Record per-group latencies in the request pool.
    pub enable_latency_groups: bool,
    pub latency_group_count: usize,
    /// Record per-kernel timings in the pipeline.
    pub enable_profiling: bool,
    /// The device only supports asynchronous submission.
    pub run_inferences_sequentially: bool,
    /// The driver can rebind pipeline arguments in place.
    pub mutable_command_lists: bool,
    /// Initial value of the device's [`DryRunFlag`].
    pub dry_run: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            memory_budget: "512M".to_string(),
            num_requests: None,
            num_threads: None,
            enable_latency_groups: false,
            latency_group_count: 0,
            enable_profiling: true,
            run_inferences_sequentially: false,
            mutable_command_lists: true,
            dry_run: false,
        }
    }
}

/// Default number of in-flight requests when none is configured.
const DEFAULT_NUM_REQUESTS: usize = 4;

impl RuntimeConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, RuntimeError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RuntimeError::ConfigError(format!("cannot read config '{}': {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, RuntimeError> {
        let config: Self = toml::from_str(toml_str)
            .map_err(|e| RuntimeError::ConfigError(format!("TOML parse error: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialises configuration to TOML.
    pub fn to_toml(&self) -> Result<String, RuntimeError> {
        toml::to_string_pretty(self)
            .map_err(|e| RuntimeError::ConfigError(format!("TOML serialise error: {e}")))
    }

    /// Rejects settings that can never work.
    pub fn validate(&self) -> Result<(), RuntimeError> {
        if self.num_requests == Some(0) {
            return Err(RuntimeError::ConfigError("num_requests must be positive".into()));
        }
        if self.num_threads == Some(0) {
            return Err(RuntimeError::ConfigError("num_threads must be positive".into()));
        }
        if self.enable_latency_groups && self.latency_group_count == 0 {
            return Err(RuntimeError::ConfigError(
                "latency groups are enabled but latency_group_count is 0".into(),
            ));
        }
        self.parse_budget().map(|_| ())
    }

    /// Parses the memory budget string into a [`MemoryBudget`].
    pub fn parse_budget(&self) -> Result<MemoryBudget, RuntimeError> {
        MemoryBudget::parse(&self.memory_budget)
            .map_err(|e| RuntimeError::ConfigError(format!("invalid budget: {e}")))
    }

    /// Resolves the number of executor worker threads.
    pub fn resolve_threads(&self) -> usize {
        self.num_threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        })
    }

    /// Resolves the number of in-flight requests.
    pub fn resolve_requests(&self) -> usize {
        self.num_requests.unwrap_or(DEFAULT_NUM_REQUESTS)
    }
}

/// Shared switch that makes pipelines skip kernel execution.
///
/// Every clone observes the same value. [`DryRunFlag::get`] always returns
/// exactly the last value passed to [`DryRunFlag::set`].
#[derive(Debug, Clone, Default)]
pub struct DryRunFlag(Arc<AtomicBool>);

impl DryRunFlag {
    pub fn new(enabled: bool) -> Self {
        Self(Arc::new(AtomicBool::new(enabled)))
    }

    pub fn set(&self, enabled: bool) {
        self.0.store(enabled, Ordering::SeqCst);
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default() {
        let c = RuntimeConfig::default();
        assert_eq!(c.memory_budget, "512M");
        assert_eq!(c.resolve_requests(), 4);
        assert!(c.mutable_command_lists);
        assert!(!c.dry_run);
        c.validate().unwrap();
    }

    #[test]
    fn test_from_toml() {
        let toml = r#"
memory_budget = "1G"
num_requests = 8
num_threads = 2
enable_latency_groups = true
latency_group_count = 3
run_inferences_sequentially = true
dry_run = true
"#;
        let c = RuntimeConfig::from_toml(toml).unwrap();
        assert_eq!(c.parse_budget().unwrap().as_mb(), 1024);
        assert_eq!(c.resolve_requests(), 8);
        assert_eq!(c.resolve_threads(), 2);
        assert_eq!(c.latency_group_count, 3);
        assert!(c.run_inferences_sequentially);
        assert!(c.dry_run);
        // Unspecified keys keep their defaults.
        assert!(c.enable_profiling);
        assert!(c.mutable_command_lists);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(RuntimeConfig::from_toml("num_requests = 0").is_err());
        assert!(RuntimeConfig::from_toml("memory_budget = \"lots\"").is_err());
        assert!(RuntimeConfig::from_toml("enable_latency_groups = true").is_err());
    }

    #[test]
    fn test_to_toml_roundtrip() {
        let c = RuntimeConfig {
            num_requests: Some(2),
            dry_run: true,
            ..Default::default()
        };
        let back = RuntimeConfig::from_toml(&c.to_toml().unwrap()).unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runtime.toml");
        std::fs::write(&path, "num_threads = 3\n").unwrap();
        let c = RuntimeConfig::from_file(&path).unwrap();
        assert_eq!(c.num_threads, Some(3));
        assert!(RuntimeConfig::from_file(&dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_dry_run_flag_stores_exact_value() {
        let flag = DryRunFlag::new(false);
        let shared = flag.clone();
        flag.set(true);
        assert!(shared.get());
        flag.set(false);
        assert!(!shared.get());
        shared.set(false);
        assert!(!flag.get());
    }
}
