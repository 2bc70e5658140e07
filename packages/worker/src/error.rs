use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("MQ error: {0}")]
    Mq(#[from] mq::MqError),

    #[error("Store error: {0}")]
    Store(#[from] store::StoreError),

    #[error("Unsupported setup: {0}")]
    Unsupported(String),
}

pub type Result<T> = std::result::Result<T, WorkerError>;
