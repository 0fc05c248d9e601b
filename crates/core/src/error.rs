use thiserror::Error;

/// Startup configuration problems. These are the only errors that end the process.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Device kind token that this worker does not know how to back up.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown device field {0}")]
pub struct UnknownDevice(pub String);
