use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Probe error: {0}")]
    Probe(#[from] latencer_engine::ProbeError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}
