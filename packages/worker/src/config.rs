use std::time::Duration;

use common::config::{ENV_PREFIX, config_path};
use common::retry::BackoffPolicy;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

pub use common::config::{DatabaseConfig, MqAppConfig, ProblemsConfig};

/// Worker-specific configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    /// Identifies this worker in leases. Default: `worker-<pid>-<random>`,
    /// unique per process.
    #[serde(default = "default_worker_id")]
    pub id: String,
    /// Jobs graded concurrently. Default: 4.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Wall-clock limit per test case. Default: 2000.
    #[serde(default = "default_case_timeout_ms")]
    pub case_timeout_ms: u64,
    /// Default: "python3".
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    #[serde(default)]
    pub interpreter_args: Vec<String>,
    /// Where code artifacts are written. Default: the system temp dir.
    #[serde(default)]
    pub scratch_dir: Option<String>,
    /// Default: 30.
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,
    /// Default: 10.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// Retries of a failed verdict write. Default: 3.
    #[serde(default = "default_write_retries")]
    pub write_retries: u8,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

fn default_worker_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("worker-{}-{}", std::process::id(), &suffix[..8])
}
fn default_concurrency() -> usize {
    4
}
fn default_case_timeout_ms() -> u64 {
    2000
}
fn default_interpreter() -> String {
    "python3".into()
}
fn default_lease_ttl_secs() -> u64 {
    30
}
fn default_heartbeat_interval_secs() -> u64 {
    10
}
fn default_write_retries() -> u8 {
    3
}
fn default_retry_base_delay_ms() -> u64 {
    200
}
fn default_retry_max_delay_ms() -> u64 {
    5000
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            id: default_worker_id(),
            concurrency: default_concurrency(),
            case_timeout_ms: default_case_timeout_ms(),
            interpreter: default_interpreter(),
            interpreter_args: Vec::new(),
            scratch_dir: None,
            lease_ttl_secs: default_lease_ttl_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            write_retries: default_write_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

impl WorkerConfig {
    pub fn case_timeout(&self) -> Duration {
        Duration::from_millis(self.case_timeout_ms)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn write_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_retries: self.write_retries,
            base_delay_ms: self.retry_base_delay_ms,
            max_delay_ms: self.retry_max_delay_ms,
        }
    }
}

/// Worker application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct WorkerAppConfig {
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub mq: MqAppConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub problems: ProblemsConfig,
}

impl WorkerAppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let s = Config::builder()
            .set_default("worker.concurrency", 4_i64)?
            .set_default("worker.case_timeout_ms", 2000_i64)?
            .set_default("worker.interpreter", "python3")?
            .set_default("mq.url", "redis://localhost:6379")?
            .set_default("mq.pool_size", 5_i64)?
            .set_default("mq.queue_name", "grade_jobs")?
            .set_default("mq.dlq_queue_name", "grade_jobs_dlq")?
            .add_source(File::with_name(&config_path()).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
