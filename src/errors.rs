// src/errors.rs

//! Crate-wide error types.
//!
//! Failures come in two deliberate kinds: `Config` for expected misuse that a
//! caller can correct (bad field names, unknown statuses, unsupported
//! host/user, a task with both or neither payload), and `Consistency` for
//! invariant violations that indicate corrupted internal state (pid changes
//! without passing through null, a pid index entry disagreeing with its row,
//! deleting a non-last row).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum QrunError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("consistency error: {0}")]
    Consistency(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, QrunError>;
