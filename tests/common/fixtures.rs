//! Fake collaborators and ciphertext generators

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use artifact_dl::{
    BackupSummary, Config, EncodedKeyMaterial, Error, JobDirectory, JobRecord, JobType, KeyMaterial,
    OutputSink, PollConfig, Result, ScratchConfig, ServiceDirectory,
};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use cbc::cipher::block_padding::{NoPadding, Pkcs7};
use cbc::cipher::{BlockEncryptMut, KeyIvInit};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Environment used by every fake
pub const ENVIRONMENT: &str = "env-1";

/// Deterministic key material with a 32-byte key
pub fn sample_keys() -> KeyMaterial {
    let key: Vec<u8> = (0..32u8).map(|i| i.wrapping_mul(13).wrapping_add(5)).collect();
    let iv: Vec<u8> = (0..16u8).map(|i| 0x5A ^ i).collect();
    KeyMaterial::new(key, &iv).unwrap()
}

/// Key material as a job record carries it (base64 of hex)
pub fn encoded(keys: &KeyMaterial) -> EncodedKeyMaterial {
    EncodedKeyMaterial {
        key: STANDARD.encode(hex::encode(keys.key())),
        iv: STANDARD.encode(hex::encode(keys.iv())),
    }
}

/// AES-256-CBC/PKCS#7 encrypt `plaintext`
pub fn encrypt(keys: &KeyMaterial, plaintext: &[u8]) -> Vec<u8> {
    cbc::Encryptor::<aes::Aes256>::new_from_slices(keys.key(), keys.iv())
        .unwrap()
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

/// AES-256-CBC encrypt block-aligned `plaintext` without padding
///
/// Decrypting the result with the same keys always fails padding validation
/// when the plaintext ends in a zero byte.
pub fn encrypt_unpadded(keys: &KeyMaterial, plaintext: &[u8]) -> Vec<u8> {
    assert_eq!(plaintext.len() % 16, 0);
    cbc::Encryptor::<aes::Aes256>::new_from_slices(keys.key(), keys.iv())
        .unwrap()
        .encrypt_padded_vec_mut::<NoPadding>(plaintext)
}

/// A job record with optional key material
pub fn job(id: &str, job_type: JobType, status: &str, keys: Option<&KeyMaterial>) -> JobRecord {
    JobRecord {
        id: id.to_string(),
        job_type,
        status: status.to_string(),
        backup: keys.map(encoded),
        created_at: Some("2024-03-01T12:00:00".to_string()),
    }
}

/// Configuration with scratch under `scratch_root` and a fast poll interval
pub fn test_config(scratch_root: &Path) -> Config {
    Config {
        scratch: ScratchConfig {
            temp_dir: Some(scratch_root.to_path_buf()),
            ..Default::default()
        },
        poll: PollConfig {
            interval: Duration::from_millis(5),
            max_attempts: Some(50),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// One-shot HTTP server that promises `declared` body bytes, sends `sent`
/// and then closes the connection
///
/// Returns the URL to fetch.
pub async fn partial_body_server(declared: usize, sent: Vec<u8>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/objects/partial", listener.local_addr().unwrap());
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            request.extend_from_slice(&buf[..n]);
        }
        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {declared}\r\nConnection: close\r\n\r\n"
        );
        socket.write_all(head.as_bytes()).await.unwrap();
        socket.write_all(&sent).await.unwrap();
        socket.flush().await.unwrap();
    });
    url
}

/// Output sink that records every line
#[derive(Default)]
pub struct RecordingSink {
    lines: Mutex<Vec<String>>,
}

impl RecordingSink {
    /// Lines written so far
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

impl OutputSink for RecordingSink {
    fn write_line(&self, line: &str) {
        self.lines.lock().unwrap().push(line.to_string());
    }
}

/// Job directory replaying scripted snapshots per task
///
/// Each task returns its snapshots in order and then repeats the last one.
#[derive(Default)]
pub struct FakeJobs {
    scripts: Mutex<HashMap<String, VecDeque<JobRecord>>>,
    fetches: AtomicU32,
}

impl FakeJobs {
    /// Script the snapshots returned for `task_id`
    pub fn script(&self, task_id: &str, snapshots: Vec<JobRecord>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(task_id.to_string(), snapshots.into());
    }

    /// Number of `retrieve_job` calls so far
    pub fn fetches(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobDirectory for FakeJobs {
    async fn retrieve_job(
        &self,
        environment_id: &str,
        _service_id: &str,
        task_id: &str,
    ) -> Result<JobRecord> {
        assert_eq!(environment_id, ENVIRONMENT);
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let mut scripts = self.scripts.lock().unwrap();
        let queue = scripts
            .get_mut(task_id)
            .ok_or_else(|| Error::Directory(format!("no such task {task_id}")))?;
        match queue.len() {
            0 => Err(Error::Directory(format!("no snapshots for {task_id}"))),
            1 => Ok(queue[0].clone()),
            _ => Ok(queue.pop_front().unwrap()),
        }
    }
}

/// Service directory pointing temporary URLs at a mock server
pub struct FakeServices {
    base_url: String,
    started: Mutex<Vec<String>>,
    backups: Mutex<Vec<BackupSummary>>,
}

impl FakeServices {
    /// Issue URLs under `base_url`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            started: Mutex::new(Vec::new()),
            backups: Mutex::new(Vec::new()),
        }
    }

    /// Backups returned by `list_backups`, paged in the given order
    pub fn set_backups(&self, backups: &[(&str, &str, &str)]) {
        *self.backups.lock().unwrap() = backups
            .iter()
            .map(|(id, status, created_at)| BackupSummary {
                id: id.to_string(),
                status: status.to_string(),
                created_at: created_at.to_string(),
            })
            .collect();
    }

    /// Jobs started so far, as `backup:<svc>` or `restore:<svc>:<backup>`
    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }
}

#[async_trait]
impl ServiceDirectory for FakeServices {
    async fn service_id(&self, _environment_id: &str, label: &str) -> Result<String> {
        match label {
            "db01" => Ok("svc-db01".to_string()),
            other => Err(Error::Directory(format!("unknown service {other}"))),
        }
    }

    async fn temporary_backup_url(
        &self,
        _environment_id: &str,
        service_id: &str,
        backup_id: &str,
    ) -> Result<String> {
        Ok(format!(
            "{}/{service_id}/backups/{backup_id}?sig=secret",
            self.base_url
        ))
    }

    async fn temporary_logs_url(
        &self,
        _environment_id: &str,
        service_id: &str,
        task_type: &str,
        task_id: &str,
    ) -> Result<String> {
        Ok(format!(
            "{}/{service_id}/logs/{task_type}/{task_id}?sig=secret",
            self.base_url
        ))
    }

    async fn list_backups(
        &self,
        environment_id: &str,
        service_id: &str,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<BackupSummary>> {
        assert_eq!(environment_id, ENVIRONMENT);
        assert_eq!(service_id, "svc-db01");
        let skip = ((page - 1) * page_size) as usize;
        Ok(self
            .backups
            .lock()
            .unwrap()
            .iter()
            .skip(skip)
            .take(page_size as usize)
            .cloned()
            .collect())
    }

    async fn start_backup(&self, _environment_id: &str, service_id: &str) -> Result<String> {
        self.started
            .lock()
            .unwrap()
            .push(format!("backup:{service_id}"));
        Ok("task-backup-1".to_string())
    }

    async fn start_restore(
        &self,
        _environment_id: &str,
        service_id: &str,
        backup_id: &str,
    ) -> Result<String> {
        self.started
            .lock()
            .unwrap()
            .push(format!("restore:{service_id}:{backup_id}"));
        Ok("task-restore-1".to_string())
    }
}

/// Shared handles for a workflow test
pub struct Collaborators {
    /// Scripted job directory
    pub jobs: Arc<FakeJobs>,
    /// Service directory
    pub services: Arc<FakeServices>,
    /// Recording sink
    pub sink: Arc<RecordingSink>,
}

impl Collaborators {
    /// Fakes issuing URLs under `base_url`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            jobs: Arc::new(FakeJobs::default()),
            services: Arc::new(FakeServices::new(base_url)),
            sink: Arc::new(RecordingSink::default()),
        }
    }
}
