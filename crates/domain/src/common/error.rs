use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("set not found: {0}")]
    SetNotFound(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("engine error: {0}")]
    EngineError(String),
}
