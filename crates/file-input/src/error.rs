use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FileInputError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no sync byte found in {path}")]
    NoSyncByte { path: PathBuf },

    #[error("no PCR found in {path}")]
    NoPcr { path: PathBuf },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
