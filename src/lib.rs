//! # artifact-dl
//!
//! Retrieval of encrypted backup and log artifacts from a remote job service.
//!
//! An artifact is fetched from a short-lived URL into scratch storage,
//! decrypted with AES-CBC using the key material attached to its job, and
//! delivered either to a file or line by line to an output sink. A companion
//! poller waits for asynchronous jobs to reach a terminal status.
//!
//! ## Quick Start
//!
//! ```no_run
//! use artifact_dl::{
//!     ArtifactKind, ArtifactRetrievalPipeline, Config, Destination, EncodedKeyMaterial,
//!     EncryptedArtifactReference, HttpSession, KeySource,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     config.validate()?;
//!
//!     let session = HttpSession::new(&config.session)?;
//!     let pipeline = ArtifactRetrievalPipeline::new(&config);
//!
//!     let reference = EncryptedArtifactReference {
//!         url: "https://storage.example.com/backup?sig=...".to_string(),
//!         keys: KeySource::Encoded(EncodedKeyMaterial {
//!             key: "...".to_string(),
//!             iv: "...".to_string(),
//!         }),
//!         kind: ArtifactKind::Backup,
//!     };
//!
//!     pipeline
//!         .retrieve(&session, &reference, Destination::File("backup.sql".into()))
//!         .await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// AES-CBC file decryption
pub mod decrypt;
/// Streaming HTTP download
pub mod download;
/// Error types
pub mod error;
/// Key and IV normalization
pub mod key_material;
/// Download, decrypt and deliver orchestration
pub mod pipeline;
/// Job status polling
pub mod poll;
/// Collaborator traits
pub mod ports;
/// Scratch file management
pub mod scratch;
/// HTTP session providers
pub mod session;
/// Core types
pub mod types;
/// Backup and log workflows
pub mod workflows;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod test_helpers;

// Re-export commonly used types
pub use config::{
    Config, DownloadConfig, KeyConfig, KeyEncoding, PollConfig, ScratchConfig, SessionConfig,
};
pub use decrypt::BlockCipherDecryptor;
pub use download::StreamingDownloader;
pub use error::{
    DecryptionError, DecryptionFailure, DownloadError, Error, KeyMaterialError, Result, Stage,
};
pub use key_material::{KeyMaterial, KeyMaterialDecoder};
pub use pipeline::ArtifactRetrievalPipeline;
pub use poll::{PollState, TaskStatusPoller};
pub use ports::{JobDirectory, OutputSink, ServiceDirectory, SessionProvider, StdoutSink};
pub use scratch::{ScratchHandle, ScratchKind, ScratchSpace};
pub use session::{AnonymousSession, HttpSession};
pub use types::{
    ArtifactKind, BackupSummary, Destination, EncodedKeyMaterial, EncryptedArtifactReference, JobRecord, JobType,
    KeySource, RetrievalReport,
};
pub use workflows::{LogTaskType, TaskOutcome, Workflows};

/// Cancel `token` when the process receives a termination signal.
///
/// Spawns a background task. A poll driven by `token` then ends with
/// [`Error::Cancelled`] on Ctrl+C.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use artifact_dl::cancel_on_signal;
/// use tokio_util::sync::CancellationToken;
///
/// #[tokio::main]
/// async fn main() {
///     let cancel = CancellationToken::new();
///     cancel_on_signal(cancel.clone());
///     // hand `cancel` to Workflows::with_cancellation
/// }
/// ```
pub fn cancel_on_signal(token: tokio_util::sync::CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            _ = wait_for_signal() => token.cancel(),
            _ = token.cancelled() => {}
        }
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM, cancelling"),
                _ = sigint.recv() => tracing::info!("Received SIGINT (Ctrl+C), cancelling"),
            }
        }
        // Registration may fail in restricted environments (containers, tests)
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register signal handlers, using ctrl_c fallback");
            wait_for_ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C, cancelling"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C; signals will not cancel");
            std::future::pending::<()>().await;
        }
    }
}
