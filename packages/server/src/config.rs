use std::time::Duration;

use common::config::{ENV_PREFIX, config_path};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use worker::WorkerConfig;

pub use common::config::{DatabaseConfig, MqAppConfig, ProblemsConfig};

/// Substrings rejected at intake when the denylist is enabled.
pub const DEFAULT_DENYLIST: &[&str] = &[
    "import os",
    "import subprocess",
    "import sys",
    "import socket",
    "import requests",
    "import urllib",
    "import shutil",
    "import glob",
    "eval(",
    "exec(",
    "__import__",
    "open(",
    "file(",
    "rmdir",
    "remove",
    "delete",
    "kill",
];

/// Submission intake limits.
///
/// The denylist is a coarse pattern filter on the source text. It is not
/// isolation and is trivially bypassed.
#[derive(Debug, Deserialize, Clone)]
pub struct IntakeConfig {
    /// Default: 50000.
    #[serde(default = "default_max_code_bytes")]
    pub max_code_bytes: usize,
    /// Default: true.
    #[serde(default = "default_denylist_enabled")]
    pub denylist_enabled: bool,
    /// Matched case-insensitively as substrings.
    #[serde(default = "default_denylist")]
    pub denylist: Vec<String>,
}

fn default_max_code_bytes() -> usize {
    50_000
}
fn default_denylist_enabled() -> bool {
    true
}
fn default_denylist() -> Vec<String> {
    DEFAULT_DENYLIST.iter().map(|p| p.to_string()).collect()
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            max_code_bytes: default_max_code_bytes(),
            denylist_enabled: default_denylist_enabled(),
            denylist: default_denylist(),
        }
    }
}

/// Lease sweeper settings.
#[derive(Debug, Deserialize, Clone)]
pub struct SweeperConfig {
    /// Default: 30.
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
    /// Pending submissions older than this are republished. Default: 300.
    #[serde(default = "default_pending_timeout_secs")]
    pub pending_timeout_secs: u64,
    /// Claims after which a stale submission is abandoned. Default: 3.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_scan_interval_secs() -> u64 {
    30
}
fn default_pending_timeout_secs() -> u64 {
    300
}
fn default_max_attempts() -> u32 {
    3
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: default_scan_interval_secs(),
            pending_timeout_secs: default_pending_timeout_secs(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl SweeperConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs.max(1))
    }

    pub fn pending_timeout(&self) -> Duration {
        Duration::from_secs(self.pending_timeout_secs)
    }
}

/// Configuration of the `judgeline` binary.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ServerAppConfig {
    #[serde(default)]
    pub mq: MqAppConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub problems: ProblemsConfig,
    #[serde(default)]
    pub intake: IntakeConfig,
    #[serde(default)]
    pub sweeper: SweeperConfig,
    /// Used by local grading.
    #[serde(default)]
    pub worker: WorkerConfig,
}

impl ServerAppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let s = Config::builder()
            .set_default("mq.url", "redis://localhost:6379")?
            .set_default("mq.queue_name", "grade_jobs")?
            .set_default("mq.dlq_queue_name", "grade_jobs_dlq")?
            .set_default("problems.dir", "problems")?
            .set_default("intake.max_code_bytes", 50_000_i64)?
            .set_default("sweeper.scan_interval_secs", 30_i64)?
            .add_source(File::with_name(&config_path()).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ServerAppConfig::default();
        assert_eq!(config.intake.max_code_bytes, 50_000);
        assert!(config.intake.denylist_enabled);
        assert!(config.intake.denylist.iter().any(|p| p == "import os"));
        assert_eq!(config.sweeper.pending_timeout(), Duration::from_secs(300));
        assert_eq!(config.sweeper.max_attempts, 3);
    }

    #[test]
    fn file_overrides_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");
        std::fs::write(
            &path,
            "[intake]\ndenylist_enabled = false\nmax_code_bytes = 10\n\n[sweeper]\nmax_attempts = 5\n",
        )
        .unwrap();

        let config: ServerAppConfig = Config::builder()
            .add_source(File::from(path))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert!(!config.intake.denylist_enabled);
        assert_eq!(config.intake.max_code_bytes, 10);
        assert_eq!(config.intake.denylist.len(), DEFAULT_DENYLIST.len());
        assert_eq!(config.sweeper.max_attempts, 5);
        assert_eq!(config.sweeper.scan_interval_secs, 30);
        assert_eq!(config.worker.interpreter, "python3");
    }
}
