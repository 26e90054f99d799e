use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("db error: {0}")]
    Db(#[from] usage_db::DbError),
    #[error("ingest error: {0}")]
    Ingest(#[from] ingest::IngestError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config error: {0}")]
    Config(String),
    #[error("invalid sync strategy: {0}")]
    InvalidStrategy(String),
    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),
    #[error("all {0} tool adapters failed")]
    AllAdaptersFailed(usize),
}

pub type Result<T> = std::result::Result<T, AppError>;
