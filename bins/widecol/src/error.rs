use widecol_api::error::QueryError;
use widecol_engine::EngineError;

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    Engine(#[from] EngineError),

    #[error("invalid query: {0}")]
    Query(#[from] QueryError),

    #[error("invalid argument: {0}")]
    Args(String),

    #[error("worker: {0}")]
    Worker(#[from] tokio::task::JoinError),

    #[error("signal: {0}")]
    Signal(#[from] std::io::Error),
}
