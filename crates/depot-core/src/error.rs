//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid repository path: {path} - {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Invalid metadata document: {message}")]
    InvalidMetadata { message: String },

    #[error("Failed to serialize metadata: {message}")]
    MetadataSerialization { message: String },

    #[error("Conflicting metadata descriptors for {coordinates}: {message}")]
    ConflictingMetadata { coordinates: String, message: String },

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
