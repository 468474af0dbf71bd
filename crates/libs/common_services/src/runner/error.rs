use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunnerError {
    /// The upload tool could not be started at all. Never retried.
    #[error("Cannot launch {program}: {source}")]
    Launch {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot reset log file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed waiting for the upload tool: {0}")]
    Wait(#[source] std::io::Error),
}
