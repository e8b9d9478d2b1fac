use thiserror::Error;

/// Per-packet decode failures. These are never fatal: the writer logs (subject
/// to suppression) and recycles the buffer.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("packet len ({len}) smaller than header len ({header_len})")]
    ShortHeader { len: usize, header_len: usize },

    #[error("unsupported netflow version {version}")]
    UnsupportedVersion { version: u16 },

    #[error("packet length of {len} doesn't make sense with cnt={cnt}")]
    LengthMismatch { len: usize, cnt: u16 },
}

/// Fatal failures on the current/archive file path. Any `Err` here terminates
/// the process per the error handling design.
#[derive(Error, Debug)]
pub enum WriterError {
    #[error("failed to create current file: {0}")]
    CreateCurrent(#[source] std::io::Error),

    #[error("failed to write {len} bytes to current file: {source}")]
    Write {
        len: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to close current file: {0}")]
    Close(#[source] std::io::Error),

    #[error("failed to link current file to archive path {archive}: {source}")]
    Link {
        archive: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to unlink current file: {0}")]
    Unlink(#[source] std::io::Error),

    #[error("failed to chmod archive file {archive}: {source}")]
    Chmod {
        archive: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid port {0}: must be in 1..65536")]
    InvalidPort(i64),

    #[error("no ports configured")]
    NoPorts,

    #[error("invalid save interval: {0}")]
    InvalidInterval(i64),

    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}
