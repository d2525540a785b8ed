//! Error types for artifact-dl
//!
//! This module provides the error taxonomy for artifact retrieval and job polling:
//! - Domain-specific error types (download, key material, decryption)
//! - Stage context so callers know which part of a retrieval failed
//! - Stable machine-readable error codes and actionable user messages

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for artifact-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Stage of an artifact retrieval
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Allocating scratch storage
    Allocate,
    /// Streaming the ciphertext from the temporary URL
    Download,
    /// Normalizing the job-supplied key and IV
    DecodeKey,
    /// Decrypting the ciphertext
    Decrypt,
    /// Writing plaintext to the caller's destination
    Deliver,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Allocate => "allocate",
            Stage::Download => "download",
            Stage::DecodeKey => "decode key",
            Stage::Decrypt => "decrypt",
            Stage::Deliver => "deliver",
        };
        f.write_str(name)
    }
}

/// Main error type for artifact-dl
///
/// Each variant includes contextual information to help diagnose issues.
#[derive(Debug, Error)]
pub enum Error {
    /// A retrieval stage failed; wraps the originating error
    #[error("{stage} stage failed: {source}")]
    Stage {
        /// The stage that failed
        stage: Stage,
        /// The originating error
        #[source]
        source: Box<Error>,
    },

    /// Scratch storage could not be created
    #[error("failed to allocate scratch storage in {path}: {source}")]
    Allocation {
        /// Directory in which allocation was attempted
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Streaming download failed
    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    /// Key or IV could not be normalized
    #[error("key material error: {0}")]
    KeyMaterial(#[from] KeyMaterialError),

    /// Decryption failed
    #[error("decryption error: {0}")]
    Decryption(#[from] DecryptionError),

    /// Plaintext could not be written to the caller's destination
    #[error("failed to deliver artifact to {path}: {source}")]
    Delivery {
        /// The requested destination
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Too many consecutive status fetches failed while polling
    #[error("status fetch failed {attempts} time(s) in a row: {message}")]
    PollFetch {
        /// Number of consecutive failed fetches
        attempts: u32,
        /// Message of the most recent failure
        message: String,
    },

    /// The attempt ceiling was reached before the job reached a terminal status
    #[error("job did not finish within {attempts} poll attempts (last status: {last_status:?})")]
    PollExhausted {
        /// Number of status fetches performed
        attempts: u32,
        /// Last observed status, if any fetch succeeded
        last_status: Option<String>,
    },

    /// The poll deadline passed before the job reached a terminal status
    #[error("job did not finish within {elapsed:?} (last status: {last_status:?})")]
    PollDeadline {
        /// Time spent polling
        elapsed: Duration,
        /// Last observed status, if any fetch succeeded
        last_status: Option<String>,
    },

    /// Polling was interrupted by the caller
    #[error("cancelled")]
    Cancelled,

    /// The job cannot be downloaded in its current type/state
    #[error("job {job_id} is a '{job_type}' job in status '{status}'; only finished backup jobs can be downloaded")]
    NotDownloadable {
        /// The job ID
        job_id: String,
        /// The job's type
        job_type: String,
        /// The job's status
        status: String,
    },

    /// The job carries no key material
    #[error("job {job_id} has no key material")]
    MissingKeyMaterial {
        /// The job ID
        job_id: String,
    },

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "poll.interval")
        key: Option<String>,
    },

    /// A job or service directory lookup failed
    #[error("directory lookup failed: {0}")]
    Directory(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Streaming download errors
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The URL could not be parsed
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl {
        /// The URL as given
        url: String,
        /// The reason it was rejected
        reason: String,
    },

    /// The server answered with a non-success status
    #[error("HTTP {status} fetching {url}")]
    Status {
        /// The HTTP status code
        status: u16,
        /// The URL that was fetched
        url: String,
    },

    /// Connection or mid-stream read failure
    #[error("transport failure fetching {url}: {cause}")]
    Transport {
        /// The URL that was fetched
        url: String,
        /// Underlying error, if it was a reqwest error
        #[source]
        cause: reqwest::Error,
    },

    /// No response headers or body bytes arrived within the idle timeout
    #[error("no data from {url} for {idle:?}")]
    Stalled {
        /// The URL that was fetched
        url: String,
        /// The configured idle timeout
        idle: Duration,
    },

    /// Writing a chunk to scratch storage failed
    #[error("failed to write to {path}: {source}")]
    Write {
        /// Scratch path being written
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The response exceeded the configured byte ceiling
    #[error("response from {url} exceeded {limit} bytes")]
    TooLarge {
        /// The URL that was fetched
        url: String,
        /// The configured ceiling
        limit: u64,
    },
}

impl DownloadError {
    /// The HTTP status that caused the failure, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            DownloadError::Status { status, .. } => Some(*status),
            DownloadError::Transport { cause, .. } => cause.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Key/IV normalization errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyMaterialError {
    /// The base64 stage failed
    #[error("{field} is not valid base64: {reason}")]
    Base64 {
        /// "key" or "iv"
        field: &'static str,
        /// Decoder message
        reason: String,
    },

    /// The hex stage failed (odd length or non-hex characters)
    #[error("{field} is not valid hex: {reason}")]
    Hex {
        /// "key" or "iv"
        field: &'static str,
        /// Decoder message
        reason: String,
    },

    /// The decoded value has a length the cipher cannot use
    #[error("{field} decoded to {actual} bytes, expected {expected}")]
    Length {
        /// "key" or "iv"
        field: &'static str,
        /// Decoded length
        actual: usize,
        /// Accepted lengths, human readable
        expected: &'static str,
    },
}

/// Reason a decryption failed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecryptionFailure {
    /// Final-block padding did not validate
    BadPadding,
    /// Ciphertext length is not a positive multiple of the block size
    Truncated,
    /// I/O failure on the source or the staging file
    Io,
}

impl std::fmt::Display for DecryptionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecryptionFailure::BadPadding => f.write_str("bad padding"),
            DecryptionFailure::Truncated => f.write_str("truncated ciphertext"),
            DecryptionFailure::Io => f.write_str("io"),
        }
    }
}

/// Decryption errors
#[derive(Debug, Error)]
#[error("{reason}{}", .detail.as_ref().map(|d| format!(": {d}")).unwrap_or_default())]
pub struct DecryptionError {
    /// Why decryption failed
    pub reason: DecryptionFailure,
    /// Extra context (file path, I/O message)
    pub detail: Option<String>,
}

impl DecryptionError {
    pub(crate) fn bad_padding() -> Self {
        Self {
            reason: DecryptionFailure::BadPadding,
            detail: None,
        }
    }

    pub(crate) fn truncated(len: u64) -> Self {
        Self {
            reason: DecryptionFailure::Truncated,
            detail: Some(format!("{len} bytes is not a whole number of blocks")),
        }
    }

    pub(crate) fn io(path: &std::path::Path, e: &std::io::Error) -> Self {
        Self {
            reason: DecryptionFailure::Io,
            detail: Some(format!("{}: {}", path.display(), e)),
        }
    }
}

impl Error {
    pub(crate) fn at(stage: Stage, error: impl Into<Error>) -> Self {
        Error::Stage {
            stage,
            source: Box::new(error.into()),
        }
    }

    /// The retrieval stage this error occurred in, if it was stage-wrapped
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// The innermost error, skipping stage wrappers
    pub fn root(&self) -> &Error {
        match self {
            Error::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether the error is worth retrying on a later attempt
    pub fn is_transient(&self) -> bool {
        match self.root() {
            Error::Network(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().is_some_and(|s| s.is_server_error())
            }
            Error::Directory(_) | Error::PollFetch { .. } => true,
            _ => false,
        }
    }

    /// Get the machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self.root() {
            Error::Stage { .. } => "internal_error",
            Error::Allocation { .. } => "allocation_failed",
            Error::Download(e) => match e {
                DownloadError::InvalidUrl { .. } => "invalid_url",
                DownloadError::Status { .. } => "download_status",
                DownloadError::Transport { .. } => "download_failed",
                DownloadError::Stalled { .. } => "download_stalled",
                DownloadError::Write { .. } => "scratch_write_failed",
                DownloadError::TooLarge { .. } => "download_too_large",
            },
            Error::KeyMaterial(_) => "invalid_key_material",
            Error::Decryption(e) => match e.reason {
                DecryptionFailure::BadPadding => "bad_padding",
                DecryptionFailure::Truncated => "truncated_ciphertext",
                DecryptionFailure::Io => "decryption_io",
            },
            Error::Delivery { .. } => "delivery_failed",
            Error::PollFetch { .. } => "poll_fetch_failed",
            Error::PollExhausted { .. } => "poll_exhausted",
            Error::PollDeadline { .. } => "poll_deadline",
            Error::Cancelled => "cancelled",
            Error::NotDownloadable { .. } => "not_downloadable",
            Error::MissingKeyMaterial { .. } => "missing_key_material",
            Error::Config { .. } => "config_error",
            Error::Directory(_) => "directory_error",
            Error::Io(_) => "io_error",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
        }
    }

    /// A short, actionable message suitable for showing to an end user
    pub fn user_message(&self) -> String {
        match self.root() {
            Error::Allocation { source, .. } if is_out_of_space(source) => {
                "ran out of disk space".to_string()
            }
            Error::Allocation { path, .. } => {
                format!("could not create temporary files in {}", path.display())
            }
            Error::Download(DownloadError::Write { source, .. }) if is_out_of_space(source) => {
                "ran out of disk space".to_string()
            }
            Error::Download(DownloadError::Write { path, .. }) => {
                format!("could not write temporary file {}", path.display())
            }
            Error::Download(DownloadError::Status { status, .. }) => {
                format!("the download link was rejected (HTTP {status}); it may have expired")
            }
            Error::Download(DownloadError::TooLarge { limit, .. }) => {
                format!("the artifact is larger than the configured limit of {limit} bytes")
            }
            Error::Download(_) => "network failure downloading backup".to_string(),
            Error::KeyMaterial(_) | Error::MissingKeyMaterial { .. } => {
                "the job's key material is malformed".to_string()
            }
            Error::Decryption(e) => match e.reason {
                DecryptionFailure::BadPadding | DecryptionFailure::Truncated => {
                    "wrong key/IV or corrupted backup".to_string()
                }
                DecryptionFailure::Io => "could not read or write files while decrypting".to_string(),
            },
            Error::Delivery { source, .. } if is_out_of_space(source) => {
                "ran out of disk space".to_string()
            }
            Error::Delivery { path, .. } => format!("could not write to {}", path.display()),
            Error::PollFetch { .. } => "could not check the job's status".to_string(),
            Error::PollExhausted { .. } | Error::PollDeadline { .. } => {
                "gave up waiting for the job to finish".to_string()
            }
            Error::Cancelled => "interrupted".to_string(),
            Error::NotDownloadable { .. } => {
                "only 'finished' 'backup' jobs may be downloaded".to_string()
            }
            other => other.to_string(),
        }
    }
}

fn is_out_of_space(e: &std::io::Error) -> bool {
    e.kind() == std::io::ErrorKind::StorageFull
}
