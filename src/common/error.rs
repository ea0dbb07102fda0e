//! Error types for credsync

use crate::credential::{Credential, ErrorKind};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === Credential Service Errors ===
    #[error("credential service error {code}: {kind}")]
    Service { kind: ErrorKind, code: i32 },

    #[error("credential {credential} not redeemed after {attempts} attempts (last: {last})")]
    RetryExhausted {
        credential: Credential,
        attempts: u32,
        last: ErrorKind,
    },

    // === Group Errors ===
    #[error("group aborted with code {code}: {reason}")]
    Aborted { code: i32, reason: String },

    #[error("collective mismatch at step {step}: rank {rank} issued {issued}, group is in {expected}")]
    CollectiveMismatch {
        step: u64,
        rank: usize,
        issued: String,
        expected: String,
    },

    #[error("broadcast buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    #[error("invalid rank {rank} for group of size {size}")]
    InvalidRank { rank: usize, size: usize },

    // === Aggregation Errors ===
    #[error("attempt count {attempts} outside histogram range 0..{cap}")]
    AttemptOutOfRange { attempts: u32, cap: u32 },

    #[error("gathered {actual} attempt records, group size is {expected}")]
    RecordCountMismatch { expected: usize, actual: usize },

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a service error from a raw (negative) service return code.
    pub fn service(code: i32) -> Self {
        Error::Service {
            kind: ErrorKind::from_code(code),
            code,
        }
    }

    /// Is this a retryable error?
    ///
    /// Only a credential that has not yet propagated to this rank is worth
    /// polling for again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Service {
                kind: ErrorKind::CredentialNotFound,
                ..
            }
        )
    }

    /// Taxonomy entry for service errors
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Error::Service { kind, .. } => Some(*kind),
            Error::RetryExhausted { last, .. } => Some(*last),
            _ => None,
        }
    }

    /// Was this raised by a group abort?
    pub fn is_abort(&self) -> bool {
        matches!(self, Error::Aborted { .. })
    }
}
