//! Software artifact retrieval.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use tk_core::{Config, Error};

use crate::extract::extract_archive;
use crate::progress::{InstallProgress, ProgressCallback, report};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadRequest {
    /// Label used in progress events and errors.
    pub name: String,
    pub url: String,
    pub dest: PathBuf,
}

/// Streams a remote file to disk.
#[derive(Clone)]
pub struct Downloader {
    client: reqwest::Client,
    assumed_size: u64,
}

impl Downloader {
    pub fn new(config: &Config) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| Error::NetworkFailure {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self::with_client(client, config.assumed_download_size))
    }

    pub fn with_client(client: reqwest::Client, assumed_size: u64) -> Self {
        Self {
            client,
            assumed_size,
        }
    }

    /// Download `request.url` to `request.dest`, returning the bytes written.
    ///
    /// Without `force` an existing destination is never overwritten and
    /// [`Error::AlreadyDownloaded`] is returned instead.
    pub async fn download(
        &self,
        request: &DownloadRequest,
        force: bool,
        progress: Option<Arc<ProgressCallback>>,
    ) -> Result<u64, Error> {
        let dest = &request.dest;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io(parent, e))?;
        }

        let mut options = fs::OpenOptions::new();
        options.write(true);
        if force {
            options.create(true).truncate(true);
        } else {
            options.create_new(true);
        }

        let file = match options.open(dest).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(Error::AlreadyDownloaded {
                    name: request.name.clone(),
                    path: dest.clone(),
                });
            }
            Err(e) => return Err(Error::io(dest, e)),
        };

        debug!(name = %request.name, url = %request.url, dest = %dest.display(), "downloading");

        match self.stream_to(file, request, &progress).await {
            Ok(written) => Ok(written),
            Err(e) => {
                // A partial file would block the next attempt.
                if let Err(cleanup) = fs::remove_file(dest).await {
                    warn!(dest = %dest.display(), error = %cleanup, "failed to remove partial download");
                }
                Err(e)
            }
        }
    }

    async fn stream_to(
        &self,
        mut file: fs::File,
        request: &DownloadRequest,
        progress: &Option<Arc<ProgressCallback>>,
    ) -> Result<u64, Error> {
        let network = |e: reqwest::Error| Error::NetworkFailure {
            message: e.to_string(),
        };

        let response = self
            .client
            .get(&request.url)
            .send()
            .await
            .map_err(network)?;

        if !response.status().is_success() {
            return Err(Error::NetworkFailure {
                message: format!("HTTP {} for {}", response.status(), request.url),
            });
        }

        let (total_bytes, estimated) = match response.content_length() {
            Some(len) => (len, false),
            None => (self.assumed_size, true),
        };
        report(
            progress,
            InstallProgress::DownloadStarted {
                name: request.name.clone(),
                total_bytes,
                estimated,
            },
        );

        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(network)?;
            file.write_all(&chunk)
                .await
                .map_err(|e| Error::io(&request.dest, e))?;
            downloaded += chunk.len() as u64;
            report(
                progress,
                InstallProgress::DownloadProgress {
                    name: request.name.clone(),
                    downloaded,
                    total_bytes: total_bytes.max(downloaded),
                },
            );
        }

        file.flush()
            .await
            .map_err(|e| Error::io(&request.dest, e))?;
        file.shutdown()
            .await
            .map_err(|e| Error::io(&request.dest, e))?;

        report(
            progress,
            InstallProgress::DownloadCompleted {
                name: request.name.clone(),
                total_bytes: downloaded,
            },
        );

        Ok(downloaded)
    }
}

/// Downloads an archive, then expands it into a directory.
///
/// The archive itself is left in place after extraction.
#[derive(Clone)]
pub struct ArchiveDownloader {
    downloader: Downloader,
    extract_to: PathBuf,
}

impl ArchiveDownloader {
    pub fn new(downloader: Downloader, extract_to: impl Into<PathBuf>) -> Self {
        Self {
            downloader,
            extract_to: extract_to.into(),
        }
    }

    pub fn extract_to(&self) -> &Path {
        &self.extract_to
    }

    pub async fn download(
        &self,
        request: &DownloadRequest,
        force: bool,
        progress: Option<Arc<ProgressCallback>>,
    ) -> Result<u64, Error> {
        self.downloader.download(request, force, progress).await
    }

    /// Expand a previously downloaded archive into the extraction directory.
    pub async fn extract(
        &self,
        request: &DownloadRequest,
        progress: Option<Arc<ProgressCallback>>,
    ) -> Result<(), Error> {
        let archive = request.dest.clone();
        fs::metadata(&archive)
            .await
            .map_err(|e| Error::io(&archive, e))?;

        report(
            &progress,
            InstallProgress::ExtractStarted {
                name: request.name.clone(),
            },
        );

        let dest = self.extract_to.clone();
        let join_path = archive.clone();
        let format = tokio::task::spawn_blocking(move || extract_archive(&archive, &dest))
            .await
            .map_err(|e| Error::ExtractionFailed {
                path: join_path,
                message: e.to_string(),
            })??;

        debug!(name = %request.name, ?format, dest = %self.extract_to.display(), "extracted");
        report(
            &progress,
            InstallProgress::ExtractCompleted {
                name: request.name.clone(),
            },
        );
        Ok(())
    }

    pub async fn download_and_extract(
        &self,
        request: &DownloadRequest,
        force: bool,
        progress: Option<Arc<ProgressCallback>>,
    ) -> Result<(), Error> {
        self.download(request, force, progress.clone()).await?;
        self.extract(request, progress).await
    }
}
