//! Backup and log commands built on the retrieval pipeline and the poller
//!
//! Each workflow resolves names through the service directory, looks up job
//! metadata, and reports progress to the output sink. All collaborators are
//! injected at construction.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::pipeline::ArtifactRetrievalPipeline;
use crate::poll::TaskStatusPoller;
use crate::ports::{JobDirectory, OutputSink, ServiceDirectory, SessionProvider};
use crate::types::{
    ArtifactKind, BackupSummary, Destination, EncryptedArtifactReference, JobRecord, JobType,
    RetrievalReport,
};

/// Which log family a task belongs to
///
/// Backup and export logs live under `backup`, restore and import logs
/// under `restore`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LogTaskType {
    /// Backup or export logs
    Backup,
    /// Restore or import logs
    Restore,
}

impl LogTaskType {
    /// Wire representation used by the service directory
    pub fn as_str(&self) -> &'static str {
        match self {
            LogTaskType::Backup => "backup",
            LogTaskType::Restore => "restore",
        }
    }

    /// The log family for a job type, if it has logs
    pub fn for_job(job_type: &JobType) -> Option<Self> {
        match job_type {
            JobType::Backup | JobType::Export => Some(LogTaskType::Backup),
            JobType::Restore | JobType::Import => Some(LogTaskType::Restore),
            JobType::Other(_) => None,
        }
    }
}

impl fmt::Display for LogTaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogTaskType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "backup" => Ok(LogTaskType::Backup),
            "restore" => Ok(LogTaskType::Restore),
            other => Err(Error::Config {
                message: format!("task type must be 'backup' or 'restore', got '{other}'"),
                key: Some("task_type".to_string()),
            }),
        }
    }
}

/// Result of starting a remote job
#[derive(Clone, Debug)]
pub struct TaskOutcome {
    /// ID of the started task
    pub task_id: String,
    /// Final snapshot, unless polling was skipped
    pub last: Option<JobRecord>,
}

/// User-facing backup and log operations for one environment
pub struct Workflows {
    environment_id: String,
    jobs: Arc<dyn JobDirectory>,
    services: Arc<dyn ServiceDirectory>,
    session: Arc<dyn SessionProvider>,
    sink: Arc<dyn OutputSink>,
    pipeline: ArtifactRetrievalPipeline,
    poller: TaskStatusPoller,
    cancel: CancellationToken,
}

impl Workflows {
    /// Create workflows for `environment_id`
    pub fn new(
        config: &Config,
        environment_id: impl Into<String>,
        jobs: Arc<dyn JobDirectory>,
        services: Arc<dyn ServiceDirectory>,
        session: Arc<dyn SessionProvider>,
        sink: Arc<dyn OutputSink>,
    ) -> Self {
        Self {
            environment_id: environment_id.into(),
            jobs,
            services,
            session,
            sink,
            pipeline: ArtifactRetrievalPipeline::new(config),
            poller: TaskStatusPoller::new(config.poll.clone()),
            cancel: CancellationToken::new(),
        }
    }

    /// Use `cancel` to interrupt polling
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that interrupts any poll in progress
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Download and decrypt a finished backup to `path`
    pub async fn download_backup(
        &self,
        label: &str,
        backup_id: &str,
        path: &Path,
    ) -> Result<RetrievalReport> {
        let env = self.environment_id.as_str();
        let service_id = self.services.service_id(env, label).await?;

        let job = self.jobs.retrieve_job(env, &service_id, backup_id).await?;
        if job.job_type != JobType::Backup || !job.succeeded(self.poller.config()) {
            return Err(Error::NotDownloadable {
                job_id: backup_id.to_string(),
                job_type: job.job_type.to_string(),
                status: job.status,
            });
        }

        self.sink.write_line(&format!("Downloading backup {backup_id}"));
        let url = self
            .services
            .temporary_backup_url(env, &service_id, backup_id)
            .await?;
        let reference = EncryptedArtifactReference::from_job(&job, url, ArtifactKind::Backup)?;

        let report = self
            .pipeline
            .retrieve(
                self.session.as_ref(),
                &reference,
                Destination::File(path.to_path_buf()),
            )
            .await?;

        self.sink.write_line(&format!(
            "{label} downloaded successfully to {}",
            path.display()
        ));
        Ok(report)
    }

    /// Download and decrypt a task's logs
    ///
    /// With a `file` the logs are written there, otherwise they go to the
    /// output sink line by line.
    pub async fn dump_logs(
        &self,
        label: &str,
        task_type: LogTaskType,
        task_id: &str,
        file: Option<PathBuf>,
    ) -> Result<RetrievalReport> {
        let env = self.environment_id.as_str();
        let service_id = self.services.service_id(env, label).await?;

        self.sink
            .write_line(&format!("Retrieving {label} logs for task {task_id} ..."));
        let job = self.jobs.retrieve_job(env, &service_id, task_id).await?;
        let url = self
            .services
            .temporary_logs_url(env, &service_id, task_type.as_str(), task_id)
            .await?;
        let reference = EncryptedArtifactReference::from_job(&job, url, ArtifactKind::Log)?;

        match file {
            Some(file) => {
                let report = self
                    .pipeline
                    .retrieve(
                        self.session.as_ref(),
                        &reference,
                        Destination::File(file.clone()),
                    )
                    .await?;
                self.sink
                    .write_line(&format!("Logs written to {}", file.display()));
                Ok(report)
            }
            None => {
                self.pipeline
                    .retrieve(
                        self.session.as_ref(),
                        &reference,
                        Destination::Lines(self.sink.as_ref()),
                    )
                    .await
            }
        }
    }

    /// Write one page of the service's backups, oldest first
    ///
    /// Each backup is one line. A full first page ends with a hint about
    /// older backups. An empty first page says no backups exist yet.
    pub async fn list_backups(
        &self,
        label: &str,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<BackupSummary>> {
        for (key, value) in [("page", page), ("page_size", page_size)] {
            if value == 0 {
                return Err(Error::Config {
                    message: format!("{key} must be at least 1"),
                    key: Some(key.to_string()),
                });
            }
        }

        let env = self.environment_id.as_str();
        let service_id = self.services.service_id(env, label).await?;
        let mut backups = self
            .services
            .list_backups(env, &service_id, page, page_size)
            .await?;
        debug!(service = %label, page, count = backups.len(), "listed backups");

        backups.sort_by_cached_key(|b| (b.created(), b.created_at.clone()));

        if backups.is_empty() {
            if page == 1 {
                self.sink
                    .write_line("No backups created yet for this service.");
            }
            return Ok(backups);
        }
        for backup in &backups {
            self.sink.write_line(&format!(
                "{} {} (status = {})",
                backup.id, backup.created_at, backup.status
            ));
        }
        if backups.len() == page_size as usize && page == 1 {
            self.sink
                .write_line("(for older backups, try with --page=2 or adjust --page-size)");
        }
        Ok(backups)
    }

    /// Start a backup, polling until it ends unless `skip_poll`
    pub async fn create_backup(&self, label: &str, skip_poll: bool) -> Result<TaskOutcome> {
        let env = self.environment_id.as_str();
        let service_id = self.services.service_id(env, label).await?;
        let task_id = self.services.start_backup(env, &service_id).await?;
        info!(service = %label, task_id = %task_id, "backup started");
        self.sink
            .write_line(&format!("Backup started (task ID = {task_id})"));

        if skip_poll {
            return Ok(TaskOutcome {
                task_id,
                last: None,
            });
        }
        self.sink.write_line("Polling until backup finishes.");
        self.wait_for_task(&service_id, task_id).await
    }

    /// Start a restore from `backup_id`, polling until it ends unless `skip_poll`
    pub async fn restore_backup(
        &self,
        label: &str,
        backup_id: &str,
        skip_poll: bool,
    ) -> Result<TaskOutcome> {
        let env = self.environment_id.as_str();
        let service_id = self.services.service_id(env, label).await?;
        let task_id = self
            .services
            .start_restore(env, &service_id, backup_id)
            .await?;
        info!(service = %label, backup_id = %backup_id, task_id = %task_id, "restore started");
        self.sink.write_line(&format!("Restoring (task = {task_id})"));

        if skip_poll {
            return Ok(TaskOutcome {
                task_id,
                last: None,
            });
        }
        self.sink.write_line("Polling until restore is complete.");
        self.wait_for_task(&service_id, task_id).await
    }

    async fn wait_for_task(&self, service_id: &str, task_id: String) -> Result<TaskOutcome> {
        let env = self.environment_id.as_str();
        let jobs = &self.jobs;
        let fetch = || jobs.retrieve_job(env, service_id, &task_id);

        let record = self
            .poller
            .poll_with(fetch, &self.cancel, |state| {
                debug!(
                    task_id = %task_id,
                    attempt = state.attempts,
                    elapsed_ms = state.elapsed().as_millis() as u64,
                    status = ?state.last_status(),
                    "task status"
                );
            })
            .await?;

        self.sink
            .write_line(&format!("Ended in status '{}'", record.status));
        Ok(TaskOutcome {
            task_id,
            last: Some(record),
        })
    }
}
