//! Collaborator interfaces consumed by the retrieval core
//!
//! The core never manages credentials, resolves names, or talks to a terminal
//! itself. Those concerns are reached through the traits below, passed in
//! explicitly by the caller.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{BackupSummary, JobRecord};

/// Supplies HTTP request capability for the URLs the core is handed
pub trait SessionProvider: Send + Sync {
    /// Build a GET request for `url`, with whatever authentication the session carries
    fn get(&self, url: &str) -> reqwest::RequestBuilder;
}

/// Looks up job metadata
#[async_trait]
pub trait JobDirectory: Send + Sync {
    /// Fetch the current snapshot of a job
    async fn retrieve_job(
        &self,
        environment_id: &str,
        service_id: &str,
        task_id: &str,
    ) -> Result<JobRecord>;
}

/// Resolves services and issues temporary download URLs
#[async_trait]
pub trait ServiceDirectory: Send + Sync {
    /// Resolve a human-readable service label to its identifier
    async fn service_id(&self, environment_id: &str, label: &str) -> Result<String>;

    /// Temporary URL for a backup's encrypted payload
    async fn temporary_backup_url(
        &self,
        environment_id: &str,
        service_id: &str,
        backup_id: &str,
    ) -> Result<String>;

    /// Temporary URL for a job's encrypted logs
    ///
    /// `task_type` is `backup` for backup/export logs and `restore` for
    /// restore/import logs.
    async fn temporary_logs_url(
        &self,
        environment_id: &str,
        service_id: &str,
        task_type: &str,
        task_id: &str,
    ) -> Result<String>;

    /// One page of a service's backups, in whatever order the remote returns
    ///
    /// `page` counts from 1.
    async fn list_backups(
        &self,
        environment_id: &str,
        service_id: &str,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<BackupSummary>>;

    /// Start a backup, returning the new task's id
    async fn start_backup(&self, environment_id: &str, service_id: &str) -> Result<String>;

    /// Start a restore from `backup_id`, returning the new task's id
    async fn start_restore(
        &self,
        environment_id: &str,
        service_id: &str,
        backup_id: &str,
    ) -> Result<String>;
}

/// Accepts line-oriented, user-facing text
pub trait OutputSink: Send + Sync {
    /// Emit one line (without its trailing newline)
    fn write_line(&self, line: &str);
}

/// Sink that prints each line to standard output
#[derive(Clone, Copy, Debug, Default)]
pub struct StdoutSink;

impl OutputSink for StdoutSink {
    fn write_line(&self, line: &str) {
        println!("{line}");
    }
}
