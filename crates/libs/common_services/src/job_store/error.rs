use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid job record {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Cannot move job record into place: {0}")]
    Persist(#[from] tempfile::PersistError),
}
