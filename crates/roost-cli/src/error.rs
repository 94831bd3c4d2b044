use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] roost_core::Error),
    #[error(transparent)]
    Config(#[from] roost_core::config::ConfigError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Sync finished with status {0}")]
    RunFailed(String),
    #[error("No {0} checkpoint to resume. Start one with `roost {0} start`.")]
    NothingToResume(String),
}
