use shared::error::{ConfigError, InitializationError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MainError {
    #[error(transparent)]
    Initialization(#[from] InitializationError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
}
