use nix::errno::Errno;
use thiserror::Error;

/// Errors surfaced by the DVB input.
///
/// Configuration errors are fatal at open; device-open errors halt the
/// input instance; ioctl errors during operation are reported through
/// the frontend message channel and feed the retune cycle instead of
/// being returned.
#[derive(Debug, Error)]
pub enum DvbError {
    #[error("config: {0}")]
    Config(String),

    #[error("failed to open {device}: {source}")]
    DeviceOpen {
        device: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{step} failed [{errno}]")]
    Ioctl { step: &'static str, errno: Errno },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DvbError {
    pub fn config(message: impl Into<String>) -> Self {
        DvbError::Config(message.into())
    }
}
