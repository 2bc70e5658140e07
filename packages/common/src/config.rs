use serde::Deserialize;

/// Which broker carries grade jobs.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MqBackend {
    /// Redis via broccoli_queue. Required when intake and workers are separate processes.
    #[default]
    Redis,
    /// In-process channel broker.
    Memory,
}

/// App-level MQ configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct MqAppConfig {
    #[serde(default)]
    pub backend: MqBackend,
    /// Redis connection URL. Default: "redis://localhost:6379".
    #[serde(default = "default_mq_url")]
    pub url: String,
    /// Connection pool size. Default: 5.
    #[serde(default = "default_mq_pool_size")]
    pub pool_size: u8,
    /// Queue name for grade jobs (intake publishes, worker consumes). Default: "grade_jobs".
    #[serde(default = "default_mq_queue_name")]
    pub queue_name: String,
    /// Queue name for dead-lettered jobs. Default: "grade_jobs_dlq".
    #[serde(default = "default_mq_dlq_queue_name")]
    pub dlq_queue_name: String,
    /// Redeliveries of a job whose worker crashed mid-job before it is dead-lettered. Default: 3.
    #[serde(default = "default_max_redeliveries")]
    pub max_redeliveries: u8,
}

fn default_mq_url() -> String {
    "redis://localhost:6379".into()
}
fn default_mq_pool_size() -> u8 {
    5
}
fn default_mq_queue_name() -> String {
    "grade_jobs".into()
}
fn default_mq_dlq_queue_name() -> String {
    "grade_jobs_dlq".into()
}
fn default_max_redeliveries() -> u8 {
    3
}

impl Default for MqAppConfig {
    fn default() -> Self {
        Self {
            backend: MqBackend::default(),
            url: default_mq_url(),
            pool_size: default_mq_pool_size(),
            queue_name: default_mq_queue_name(),
            dlq_queue_name: default_mq_dlq_queue_name(),
            max_redeliveries: default_max_redeliveries(),
        }
    }
}

/// Submission state store connection.
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// Default: "sqlite://judgeline.db?mode=rwc".
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

fn default_database_url() -> String {
    "sqlite://judgeline.db?mode=rwc".into()
}
fn default_max_connections() -> u32 {
    20
}
fn default_min_connections() -> u32 {
    1
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
        }
    }
}

/// Location of the static test case catalogue.
#[derive(Debug, Deserialize, Clone)]
pub struct ProblemsConfig {
    /// Directory holding one `{problem_id}/testcases.txt` per problem. Default: "problems".
    #[serde(default = "default_problems_dir")]
    pub dir: String,
}

fn default_problems_dir() -> String {
    "problems".into()
}

impl Default for ProblemsConfig {
    fn default() -> Self {
        Self {
            dir: default_problems_dir(),
        }
    }
}

/// Config file path, overridable with `JUDGELINE_CONFIG`.
pub fn config_path() -> String {
    std::env::var("JUDGELINE_CONFIG").unwrap_or_else(|_| "config/config".to_string())
}

/// Environment variable prefix for overrides (`JUDGELINE__WORKER__CONCURRENCY=8`).
pub const ENV_PREFIX: &str = "JUDGELINE";
