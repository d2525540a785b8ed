//! Core types for artifact-dl

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::config::PollConfig;
use crate::error::{Error, Result};
use crate::key_material::KeyMaterial;
use crate::ports::OutputSink;

/// Type of a remote asynchronous job
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobType {
    /// Service backup
    Backup,
    /// Restore from a backup
    Restore,
    /// Data import
    Import,
    /// Data export
    Export,
    /// Any type string this crate does not know about
    Other(String),
}

impl JobType {
    /// Wire representation
    pub fn as_str(&self) -> &str {
        match self {
            JobType::Backup => "backup",
            JobType::Restore => "restore",
            JobType::Import => "import",
            JobType::Export => "export",
            JobType::Other(s) => s,
        }
    }

    /// Whether jobs of this type carry key material
    pub fn carries_key_material(&self) -> bool {
        matches!(self, JobType::Backup | JobType::Export)
    }
}

impl From<String> for JobType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "backup" => JobType::Backup,
            "restore" => JobType::Restore,
            "import" => JobType::Import,
            "export" => JobType::Export,
            _ => JobType::Other(s),
        }
    }
}

impl From<JobType> for String {
    fn from(t: JobType) -> Self {
        match t {
            JobType::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key and IV exactly as they appear in a job record
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedKeyMaterial {
    /// Encoded key
    pub key: String,
    /// Encoded initialization vector
    pub iv: String,
}

impl std::fmt::Debug for EncodedKeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodedKeyMaterial")
            .field("key", &"<redacted>")
            .field("iv", &"<redacted>")
            .finish()
    }
}

/// Snapshot of a remote job
///
/// Owned by the remote system. Only ever read locally.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Job identifier
    #[serde(default)]
    pub id: String,

    /// Job type
    #[serde(rename = "type")]
    pub job_type: JobType,

    /// Remote status string
    pub status: String,

    /// Key material (backup and export jobs only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<EncodedKeyMaterial>,

    /// Creation timestamp as reported by the remote system
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl JobRecord {
    /// Whether the job will not change any further
    pub fn is_terminal(&self, config: &PollConfig) -> bool {
        config.is_terminal(&self.status)
    }

    /// Whether the job finished successfully
    pub fn succeeded(&self, config: &PollConfig) -> bool {
        config.is_success(&self.status)
    }

    /// The job's key material, or an error naming the job
    pub fn key_material(&self) -> Result<&EncodedKeyMaterial> {
        self.backup.as_ref().ok_or_else(|| Error::MissingKeyMaterial {
            job_id: self.id.clone(),
        })
    }
}

/// Logical kind of an encrypted artifact
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// A service backup
    Backup,
    /// Job logs
    Log,
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactKind::Backup => f.write_str("backup"),
            ArtifactKind::Log => f.write_str("log"),
        }
    }
}

/// Key material for an artifact, either still encoded or already normalized
#[derive(Clone, Debug)]
pub enum KeySource {
    /// Fields as received from the job directory
    Encoded(EncodedKeyMaterial),
    /// Raw key and IV bytes
    Decoded(KeyMaterial),
}

/// One downloadable encrypted object
#[derive(Clone, Debug)]
pub struct EncryptedArtifactReference {
    /// Temporary fetch URL
    pub url: String,
    /// Decryption key material
    pub keys: KeySource,
    /// Backup or log
    pub kind: ArtifactKind,
}

impl EncryptedArtifactReference {
    /// Build a reference from a job record and a temporary URL
    pub fn from_job(job: &JobRecord, url: impl Into<String>, kind: ArtifactKind) -> Result<Self> {
        Ok(Self {
            url: url.into(),
            keys: KeySource::Encoded(job.key_material()?.clone()),
            kind,
        })
    }
}

/// Where a retrieved artifact ends up
pub enum Destination<'a> {
    /// A final file path, written atomically
    File(PathBuf),
    /// Line-by-line delivery to an output sink
    Lines(&'a dyn OutputSink),
}

impl std::fmt::Debug for Destination<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Destination::File(path) => f.debug_tuple("File").field(path).finish(),
            Destination::Lines(_) => f.write_str("Lines"),
        }
    }
}

/// One entry of a service's backup listing
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSummary {
    /// Backup identifier
    #[serde(default)]
    pub id: String,

    /// Remote status string
    pub status: String,

    /// Creation timestamp as reported by the remote system
    pub created_at: String,
}

impl BackupSummary {
    /// The creation timestamp, if it parses as ISO 8601
    ///
    /// Offsets are normalized to UTC. Values without an offset are taken as is.
    pub fn created(&self) -> Option<chrono::NaiveDateTime> {
        let raw = self.created_at.trim();
        chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .or_else(|_| chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
            .ok()
            .or_else(|| {
                chrono::DateTime::parse_from_rfc3339(raw)
                    .ok()
                    .map(|t| t.naive_utc())
            })
    }
}

/// Summary of a completed retrieval
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RetrievalReport {
    /// Ciphertext bytes downloaded
    pub bytes_downloaded: u64,
    /// Plaintext bytes produced
    pub bytes_delivered: u64,
    /// Lines written to the sink (line delivery only)
    pub lines_delivered: u64,
}
