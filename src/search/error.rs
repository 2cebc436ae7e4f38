use crate::kernel::ConfigError;
use std::io;
use thiserror::Error;

/// Why [`SearchInstance::start`](super::SearchInstance::start) refused a job.
#[derive(Error, Debug)]
pub enum StartError {
    #[error("a search is already running on this instance")]
    AlreadyRunning,

    #[error(transparent)]
    ConfigInvalid(#[from] ConfigError),

    #[error("failed to spawn search worker: {0}")]
    Spawn(#[from] io::Error),

    #[error("search was removed from the registry")]
    Removed,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("search {0} is still running")]
    StillRunning(u64),
}
