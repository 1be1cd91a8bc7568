//! Shared error types for the benchmark system

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SharedError {
    #[error("Serialization failed: {message}")]
    SerializationError { message: String },

    #[error("Invalid process identifier: {input}")]
    InvalidProcessId { input: String },

    #[error("Invalid quality-of-service level: {level}")]
    InvalidQos { level: u8 },
}

pub type SharedResult<T> = Result<T, SharedError>;
