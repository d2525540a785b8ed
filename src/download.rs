//! Streaming download of a remote object into scratch storage

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::config::DownloadConfig;
use crate::error::DownloadError;
use crate::ports::SessionProvider;

/// Streams an HTTP response body to a file in bounded chunks
///
/// Memory use is bounded by the transport's chunk size, never by object size.
/// The idle timeout applies to each wait for headers or body bytes, not to
/// the transfer as a whole.
/// On failure whatever was already written stays in place; the caller owns the
/// destination and decides when to delete it.
#[derive(Clone, Debug, Default)]
pub struct StreamingDownloader {
    config: DownloadConfig,
}

impl StreamingDownloader {
    /// Create a downloader
    pub fn new(config: DownloadConfig) -> Self {
        Self { config }
    }

    /// GET `url` and write the body to `destination`, returning the byte count
    pub async fn download(
        &self,
        session: &dyn SessionProvider,
        url: &str,
        destination: &Path,
    ) -> Result<u64, DownloadError> {
        let parsed = url::Url::parse(url).map_err(|e| DownloadError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        // Temporary URLs carry credentials in the query string
        let display_url = redact_query(&parsed);

        let idle = self.config.idle_timeout;

        debug!(url = %display_url, ?destination, "starting download");
        let mut response = within(idle, &display_url, session.get(parsed.as_str()).send())
            .await?
            .map_err(|cause| DownloadError::Transport {
                url: display_url.clone(),
                cause,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status {
                status: status.as_u16(),
                url: display_url,
            });
        }

        let limit = self.config.max_bytes;
        if let (Some(limit), Some(length)) = (limit, response.content_length())
            && length > limit
        {
            return Err(DownloadError::TooLarge {
                url: display_url,
                limit,
            });
        }

        let write_error = |source| DownloadError::Write {
            path: destination.to_path_buf(),
            source,
        };
        let mut file = tokio::fs::File::create(destination)
            .await
            .map_err(write_error)?;

        let chunk_size = self.config.effective_chunk_size();
        let mut written: u64 = 0;

        while let Some(chunk) = within(idle, &display_url, response.chunk())
            .await?
            .map_err(|cause| DownloadError::Transport {
                url: display_url.clone(),
                cause,
            })?
        {
            if let Some(limit) = limit
                && written + chunk.len() as u64 > limit
            {
                file.flush().await.map_err(write_error)?;
                return Err(DownloadError::TooLarge {
                    url: display_url,
                    limit,
                });
            }

            for piece in chunk.chunks(chunk_size) {
                file.write_all(piece).await.map_err(write_error)?;
            }
            file.flush().await.map_err(write_error)?;
            written += chunk.len() as u64;
        }

        file.sync_all().await.map_err(write_error)?;
        info!(url = %display_url, bytes = written, "download complete");
        Ok(written)
    }
}

/// Await `fut`, failing with `Stalled` if it takes longer than `idle`
async fn within<F: Future>(
    idle: Option<Duration>,
    url: &str,
    fut: F,
) -> Result<F::Output, DownloadError> {
    match idle {
        Some(idle) => tokio::time::timeout(idle, fut)
            .await
            .map_err(|_| DownloadError::Stalled {
                url: url.to_string(),
                idle,
            }),
        None => Ok(fut.await),
    }
}

fn redact_query(url: &url::Url) -> String {
    let mut shown = url.clone();
    if shown.query().is_some() {
        shown.set_query(Some("redacted"));
    }
    shown.to_string()
}
