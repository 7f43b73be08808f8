//! Error types for the stream bridge

use std::time::Duration;
use thiserror::Error;

/// Main error type for the bridge
#[derive(Error, Debug)]
pub enum Error {
    #[error("Hardware error: {0}")]
    Hardware(#[from] HardwareError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Component has been released")]
    Released,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors reported by the hardware capability
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HardwareError {
    #[error("Block not found: {0}")]
    BlockNotFound(String),

    #[error("Stream request rejected: {0}")]
    StreamRejected(String),

    #[error("Stream command failed: {0}")]
    CommandFailed(String),

    #[error("Argument {id} could not be set: {reason}")]
    ArgumentRejected { id: String, reason: String },

    #[error("Device unavailable")]
    DeviceUnavailable,
}

/// Worker thread errors
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker {name}: {reason}")]
    Spawn { name: String, reason: String },

    #[error("Worker {name} did not stop within {grace:?} and was killed")]
    Unresponsive { name: String, grace: Duration },

    #[error("Worker {0} has no work state left to run")]
    Abandoned(String),

    #[error("Worker {0} panicked")]
    Panicked(String),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("No configuration directory available")]
    NoConfigDir,
}

/// Result type alias for the bridge
pub type Result<T> = std::result::Result<T, Error>;
