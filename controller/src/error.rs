//! Controller-specific error types

use shared::SharedError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Broker could not be started: {message}")]
    BrokerStartFailed { message: String },

    #[error("Broker refused connection with code {code}")]
    ConnectionRefused { code: String },

    #[error("Transport error: {message}")]
    TransportError { message: String },

    #[error("Capture archive failed for {path}: {message}")]
    ArchiveError { path: String, message: String },

    #[error("Interrupted by operator")]
    Interrupted,

    #[error("Shared component error")]
    SharedError(#[from] SharedError),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ControllerError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigurationError { message: message.into() }
    }

    pub fn broker(message: impl Into<String>) -> Self {
        Self::BrokerStartFailed { message: message.into() }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::TransportError { message: message.into() }
    }
}

pub type ControllerResult<T> = Result<T, ControllerError>;
