//! Core error type shared by every subsystem.
//!
//! Mirrors the teacher's one-error-enum-per-module convention (see
//! `BaselineError` / `StorageError` in the reference pipeline) but collapsed
//! to a single enum since the core is one cohesive engine.

use thiserror::Error;

/// Errors surfaced by the observability engine's public operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("transient I/O error: {0}")]
    Transient(String),

    #[error("illegal state transition: {0}")]
    IllegalTransition(String),

    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;
