//! Fetch, decrypt and deliver one encrypted artifact
//!
//! Scratch storage is acquired before any network traffic and released on
//! every exit path. Errors carry the [`Stage`] they came from.

use std::path::Path;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::decrypt::BlockCipherDecryptor;
use crate::download::StreamingDownloader;
use crate::error::{Error, Result, Stage};
use crate::key_material::{KeyMaterial, KeyMaterialDecoder};
use crate::ports::{OutputSink, SessionProvider};
use crate::scratch::{ScratchHandle, ScratchKind, ScratchSpace};
use crate::types::{Destination, EncryptedArtifactReference, KeySource, RetrievalReport};

/// Orchestrates download, key decoding, decryption and delivery
#[derive(Clone, Debug)]
pub struct ArtifactRetrievalPipeline {
    scratch: ScratchSpace,
    downloader: StreamingDownloader,
    decoder: KeyMaterialDecoder,
    decryptor: BlockCipherDecryptor,
}

impl ArtifactRetrievalPipeline {
    /// Build a pipeline from configuration
    pub fn new(config: &Config) -> Self {
        Self {
            scratch: ScratchSpace::new(&config.scratch),
            downloader: StreamingDownloader::new(config.download.clone()),
            decoder: KeyMaterialDecoder::new(config.keys.encoding),
            decryptor: BlockCipherDecryptor::new(),
        }
    }

    /// Retrieve `reference` into `destination`
    ///
    /// A file destination only appears once decryption fully succeeded. For
    /// line delivery the plaintext is staged in scratch storage and emitted
    /// to the sink after decryption completes.
    pub async fn retrieve(
        &self,
        session: &dyn SessionProvider,
        reference: &EncryptedArtifactReference,
        destination: Destination<'_>,
    ) -> Result<RetrievalReport> {
        let mut ciphertext = self
            .scratch
            .acquire(ScratchKind::File)
            .map_err(|e| Error::at(Stage::Allocate, e))?;
        let mut plaintext = match &destination {
            Destination::Lines(_) => Some(
                self.scratch
                    .acquire(ScratchKind::File)
                    .map_err(|e| Error::at(Stage::Allocate, e))?,
            ),
            Destination::File(_) => None,
        };

        let outcome = self
            .run(session, reference, destination, &ciphertext, plaintext.as_ref())
            .await;

        ciphertext.release_logged();
        if let Some(handle) = plaintext.as_mut() {
            handle.release_logged();
        }

        match &outcome {
            Ok(report) => info!(
                kind = %reference.kind,
                bytes_downloaded = report.bytes_downloaded,
                bytes_delivered = report.bytes_delivered,
                "artifact retrieved"
            ),
            Err(e) => warn!(kind = %reference.kind, stage = ?e.stage(), error = %e, "artifact retrieval failed"),
        }
        outcome
    }

    async fn run(
        &self,
        session: &dyn SessionProvider,
        reference: &EncryptedArtifactReference,
        destination: Destination<'_>,
        ciphertext: &ScratchHandle,
        plaintext: Option<&ScratchHandle>,
    ) -> Result<RetrievalReport> {
        let mut report = RetrievalReport {
            bytes_downloaded: self
                .downloader
                .download(session, &reference.url, ciphertext.path())
                .await
                .map_err(|e| Error::at(Stage::Download, e))?,
            ..Default::default()
        };

        let decoded;
        let keys: &KeyMaterial = match &reference.keys {
            KeySource::Decoded(keys) => keys,
            KeySource::Encoded(raw) => {
                decoded = self
                    .decoder
                    .decode(&raw.key, &raw.iv)
                    .map_err(|e| Error::at(Stage::DecodeKey, e))?;
                &decoded
            }
        };

        match (destination, plaintext) {
            (Destination::File(path), _) => {
                report.bytes_delivered = self.decrypt(ciphertext.path(), keys, &path).await?;
            }
            (Destination::Lines(sink), Some(staged)) => {
                report.bytes_delivered = self.decrypt(ciphertext.path(), keys, staged.path()).await?;
                report.lines_delivered = emit_lines(staged.path(), sink)
                    .await
                    .map_err(|source| {
                        Error::at(
                            Stage::Deliver,
                            Error::Delivery {
                                path: staged.path().to_path_buf(),
                                source,
                            },
                        )
                    })?;
            }
            (Destination::Lines(_), None) => {
                return Err(Error::at(
                    Stage::Allocate,
                    Error::Io(std::io::Error::other("no plaintext scratch file for line delivery")),
                ));
            }
        }

        Ok(report)
    }

    async fn decrypt(&self, source: &Path, keys: &KeyMaterial, destination: &Path) -> Result<u64> {
        self.decryptor
            .decrypt(source, keys, destination)
            .await
            .map_err(|e| match e {
                Error::Delivery { .. } => Error::at(Stage::Deliver, e),
                other => Error::at(Stage::Decrypt, other),
            })
    }
}

async fn emit_lines(path: &Path, sink: &dyn OutputSink) -> std::io::Result<u64> {
    let file = tokio::fs::File::open(path).await?;
    let mut reader = BufReader::new(file);
    let mut line = Vec::new();
    let mut count = 0;

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            break;
        }
        let text = String::from_utf8_lossy(&line);
        sink.write_line(text.trim_end_matches(['\n', '\r']));
        count += 1;
    }

    debug!(lines = count, "delivered plaintext to output sink");
    Ok(count)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScratchConfig;
    use crate::session::AnonymousSession;
    use crate::test_helpers::{RecordingSink, encoded, encrypt, sample_keys};
    use crate::types::ArtifactKind;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Fixture {
        server: MockServer,
        scratch_root: TempDir,
        out_dir: TempDir,
        pipeline: ArtifactRetrievalPipeline,
    }

    impl Fixture {
        async fn new() -> Self {
            let scratch_root = TempDir::new().unwrap();
            let config = Config {
                scratch: ScratchConfig {
                    temp_dir: Some(scratch_root.path().to_path_buf()),
                    ..Default::default()
                },
                ..Default::default()
            };
            Self {
                server: MockServer::start().await,
                scratch_root,
                out_dir: TempDir::new().unwrap(),
                pipeline: ArtifactRetrievalPipeline::new(&config),
            }
        }

        async fn serve(&self, body: Vec<u8>) -> String {
            Mock::given(method("GET"))
                .and(path("/artifact"))
                .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
                .mount(&self.server)
                .await;
            format!("{}/artifact", self.server.uri())
        }

        fn scratch_entries(&self) -> usize {
            std::fs::read_dir(self.scratch_root.path()).unwrap().count()
        }
    }

    #[tokio::test]
    async fn delivers_file_and_cleans_scratch() {
        let fx = Fixture::new().await;
        let keys = sample_keys(32);
        let plaintext = b"CREATE TABLE t (id int);\n".repeat(100);
        let url = fx.serve(encrypt(&keys, &plaintext)).await;
        let reference = EncryptedArtifactReference {
            url,
            keys: KeySource::Encoded(encoded(&keys)),
            kind: ArtifactKind::Backup,
        };
        let dest = fx.out_dir.path().join("backup.sql");

        let report = fx
            .pipeline
            .retrieve(&AnonymousSession::new(), &reference, Destination::File(dest.clone()))
            .await
            .unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), plaintext);
        assert_eq!(report.bytes_delivered, plaintext.len() as u64);
        assert_eq!(report.lines_delivered, 0);
        assert_eq!(fx.scratch_entries(), 0);
    }

    #[tokio::test]
    async fn delivers_lines_to_sink() {
        let fx = Fixture::new().await;
        let keys = sample_keys(16);
        let url = fx
            .serve(encrypt(&keys, b"starting backup\r\nwrote 3 tables\nfinished"))
            .await;
        let reference = EncryptedArtifactReference {
            url,
            keys: KeySource::Decoded(keys),
            kind: ArtifactKind::Log,
        };
        let sink = RecordingSink::default();

        let report = fx
            .pipeline
            .retrieve(&AnonymousSession::new(), &reference, Destination::Lines(&sink))
            .await
            .unwrap();

        assert_eq!(
            sink.lines(),
            vec!["starting backup", "wrote 3 tables", "finished"]
        );
        assert_eq!(report.lines_delivered, 3);
        assert_eq!(fx.scratch_entries(), 0);
    }

    #[tokio::test]
    async fn download_failure_is_tagged_and_cleaned_up() {
        let fx = Fixture::new().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&fx.server)
            .await;
        let reference = EncryptedArtifactReference {
            url: format!("{}/artifact", fx.server.uri()),
            keys: KeySource::Decoded(sample_keys(32)),
            kind: ArtifactKind::Backup,
        };
        let dest = fx.out_dir.path().join("backup.sql");

        let err = fx
            .pipeline
            .retrieve(&AnonymousSession::new(), &reference, Destination::File(dest.clone()))
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Some(Stage::Download));
        assert!(!dest.exists());
        assert_eq!(fx.scratch_entries(), 0);
    }

    #[tokio::test]
    async fn key_decode_failure_is_tagged_and_cleaned_up() {
        let fx = Fixture::new().await;
        let keys = sample_keys(32);
        let url = fx.serve(encrypt(&keys, b"data")).await;
        let mut raw = encoded(&keys);
        raw.iv = "%%%".into();
        let reference = EncryptedArtifactReference {
            url,
            keys: KeySource::Encoded(raw),
            kind: ArtifactKind::Backup,
        };
        let sink = RecordingSink::default();

        let err = fx
            .pipeline
            .retrieve(&AnonymousSession::new(), &reference, Destination::Lines(&sink))
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Some(Stage::DecodeKey));
        assert!(sink.lines().is_empty());
        assert_eq!(fx.scratch_entries(), 0);
    }

    #[tokio::test]
    async fn allocation_failure_happens_before_any_request() {
        let missing = TempDir::new().unwrap().path().join("gone");
        let pipeline = ArtifactRetrievalPipeline::new(&Config {
            scratch: ScratchConfig {
                temp_dir: Some(missing),
                ..Default::default()
            },
            ..Default::default()
        });
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let reference = EncryptedArtifactReference {
            url: format!("{}/artifact", server.uri()),
            keys: KeySource::Decoded(sample_keys(32)),
            kind: ArtifactKind::Backup,
        };

        let err = pipeline
            .retrieve(
                &AnonymousSession::new(),
                &reference,
                Destination::File("unused".into()),
            )
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Some(Stage::Allocate));
        assert_eq!(err.error_code(), "allocation_failed");
    }
}
