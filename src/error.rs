//! Error handling and custom error types
//!
//! Provides unified error handling across the crate using thiserror.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Environment variable error: {0}")]
    EnvVar(#[from] dotenvy::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unsupported emote type: {0}")]
    UnsupportedType(String),

    #[error("Provider transport error: {0}")]
    Transport(String),

    #[error("Encode error: {0}")]
    Encode(#[from] image::ImageError),

    #[error("Invalid dimensions: {0}")]
    InvalidDimensions(String),

    #[error("Content store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invariant violated: {0}")]
    Invariant(String),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
