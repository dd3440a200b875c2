//! Error types for sign-batch
//!
//! This module defines the error hierarchy that covers:
//! - Signing failures reported by the signer collaborator
//! - Per-file transfer failures (read, write, remove)
//! - Configuration and CLI errors
//! - Credential prompting errors
//! - Worker thread errors
//!
//! Design philosophy:
//! - Use thiserror for structured error types in library code
//! - Authentication rejections are a distinct variant, never a string match
//! - Preserve error chains for debugging

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the sign-batch application
#[derive(Error, Debug)]
pub enum BatchError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Credential prompting errors
    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    /// Worker/concurrency errors
    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    /// I/O errors (directory listing, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Category of a non-authentication signing failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The request was malformed or refused by the signer
    IllegalRequest,

    /// The signing key is not available on the server
    CryptoTokenOffline,

    /// Internal server-side failure
    Server,

    /// Any other unexpected status
    Unknown,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FailureKind::IllegalRequest => "illegal request",
            FailureKind::CryptoTokenOffline => "crypto token offline",
            FailureKind::Server => "server error",
            FailureKind::Unknown => "unknown failure",
        };
        f.write_str(name)
    }
}

/// Errors returned by a [`Signer`](crate::signer::Signer)
#[derive(Error, Debug)]
pub enum SignError {
    /// Credentials were rejected by the remote service
    #[error("Authentication rejected: {detail}")]
    AuthenticationRequired { detail: String },

    /// The request reached the signer but was refused
    #[error("Signing failed ({kind}): {detail}")]
    Rejected { kind: FailureKind, detail: String },

    /// The signer could not be reached or did not answer
    #[error("Transport failure: {0}")]
    Transport(String),

    /// Local I/O while talking to the signer
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SignError {
    /// Check if this error means the credentials are bad
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, SignError::AuthenticationRequired { .. })
    }
}

/// Failure of a single file transfer attempt
#[derive(Error, Debug)]
pub enum TransferError {
    /// Failed to read the input file
    #[error("Failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to write the signed output
    #[error("Failed to write '{path}': {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Signed successfully but the source could not be removed
    #[error("Could not remove '{path}': {source}")]
    RemoveSource {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The signer refused or failed
    #[error(transparent)]
    Sign(#[from] SignError),
}

impl TransferError {
    /// Check if this failure should go through the re-authentication path
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, TransferError::Sign(e) if e.is_auth_failure())
    }
}

/// Configuration and CLI errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid thread count
    #[error("Invalid thread count {count}: must be between 1 and {max}")]
    InvalidThreadCount { count: usize, max: usize },

    /// Input directory missing or not a directory
    #[error("Invalid input directory '{path}': {reason}")]
    InvalidInputDir { path: PathBuf, reason: String },

    /// Output directory missing or not a directory
    #[error("Invalid output directory '{path}': {reason}")]
    InvalidOutputDir { path: PathBuf, reason: String },

    /// Input and output point at the same directory
    #[error("Can not use the same directory '{path}' for input and output")]
    SameDirectory { path: PathBuf },

    /// Malformed metadata parameter
    #[error("Invalid metadata '{entry}': expected KEY=VALUE")]
    InvalidMetadata { entry: String },

    /// Invalid exclude pattern
    #[error("Invalid exclude pattern '{pattern}': {reason}")]
    InvalidExcludePattern { pattern: String, reason: String },

    /// Nothing to sign
    #[error("No input files in '{path}'")]
    NoInputFiles { path: PathBuf },
}

/// Errors from the interactive password prompt
#[derive(Error, Debug)]
pub enum CredentialError {
    /// The prompt could not read a password
    #[error("Failed to read password for user '{username}': {reason}")]
    PromptFailed { username: String, reason: String },
}

/// Worker thread errors
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Worker panicked
    #[error("Worker {id} panicked: {message}")]
    Panicked { id: usize, message: String },

    /// Worker thread could not be started
    #[error("Failed to start worker {id}: {reason}")]
    SpawnFailed { id: usize, reason: String },
}

/// Result type alias for BatchError
pub type Result<T> = std::result::Result<T, BatchError>;
