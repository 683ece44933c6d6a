//! Bounded concurrent batches
//!
//! A batch downloads a list of items with at most `max_download_threads`
//! transfers in flight. Per-item failures are recorded on the item and never
//! abort the batch.

use crate::download::{DownloadError, DownloadOptions, DownloadResult, Downloader};
use crate::storage::ImageRef;
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use url::Url;

/// Default number of concurrent transfers
pub const DEFAULT_MAX_DOWNLOAD_THREADS: usize = 4;

/// Options for a batch download
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Directory items without an explicit path are stored in
    pub output_dir: Option<PathBuf>,
    pub max_download_threads: usize,
    pub download: DownloadOptions,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            output_dir: None,
            max_download_threads: DEFAULT_MAX_DOWNLOAD_THREADS,
            download: DownloadOptions::default(),
        }
    }
}

/// Something a batch can download and annotate with the outcome
pub trait BatchItem {
    /// URL to download
    fn url(&self) -> &str;

    /// Local destination, relative to `output_dir` when one is given
    fn local_path(&self, output_dir: Option<&Path>) -> PathBuf;

    /// Records a successful download
    fn record_success(&mut self, result: &DownloadResult);

    /// Records a failed download
    fn record_failure(&mut self, error: &DownloadError);
}

impl BatchItem for ImageRef {
    fn url(&self) -> &str {
        &self.src
    }

    fn local_path(&self, output_dir: Option<&Path>) -> PathBuf {
        let name = if self.file.is_empty() {
            url_file_name(&self.src)
        } else {
            self.file.clone()
        };
        match output_dir {
            Some(dir) => dir.join(name),
            None => PathBuf::from(name),
        }
    }

    fn record_success(&mut self, result: &DownloadResult) {
        if let Some(name) = result.final_path.file_name() {
            self.file = name.to_string_lossy().into_owned();
        }
        self.error = None;
        self.error_code = None;
    }

    fn record_failure(&mut self, error: &DownloadError) {
        self.error = Some(true);
        self.error_code = error.code();
    }
}

/// A plain file download request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileRequest {
    pub url: String,
    /// Explicit destination; defaults to [`mirror_path`]
    pub local_file: Option<PathBuf>,
    /// Where the file ended up after a successful download
    pub final_path: Option<PathBuf>,
    pub error: bool,
    pub error_code: Option<String>,
}

impl FileRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_local_file(mut self, local_file: impl Into<PathBuf>) -> Self {
        self.local_file = Some(local_file.into());
        self
    }
}

impl BatchItem for FileRequest {
    fn url(&self) -> &str {
        &self.url
    }

    fn local_path(&self, output_dir: Option<&Path>) -> PathBuf {
        match (&self.local_file, output_dir) {
            (Some(file), Some(dir)) if file.is_relative() => dir.join(file),
            (Some(file), _) => file.clone(),
            (None, dir) => mirror_path(&self.url, dir),
        }
    }

    fn record_success(&mut self, result: &DownloadResult) {
        self.final_path = Some(result.final_path.clone());
        self.error = false;
        self.error_code = None;
    }

    fn record_failure(&mut self, error: &DownloadError) {
        self.error = true;
        self.error_code = error.code();
    }
}

/// Last path segment of a URL, used as a default file name
///
/// URLs without a usable last segment map to `index`.
pub fn url_file_name(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "index".to_string())
}

/// Mirrors a URL's host and path below a directory
///
/// `http://example.com/a/b.css` becomes `{dir}/example.com/a/b.css`.
pub fn mirror_path(url: &str, output_dir: Option<&Path>) -> PathBuf {
    let mut path = output_dir
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    match Url::parse(url) {
        Ok(parsed) => {
            if let Some(host) = parsed.host_str() {
                path.push(host);
            }
            if let Some(segments) = parsed.path_segments() {
                for segment in segments.filter(|s| !s.is_empty() && *s != "..") {
                    path.push(segment);
                }
            }
            if parsed.path().ends_with('/') {
                path.push("index");
            }
        }
        Err(_) => path.push(url_file_name(url)),
    }
    path
}

impl Downloader {
    /// Downloads a batch of items with bounded concurrency
    ///
    /// # Behavior
    ///
    /// 1. The output directory is created if needed; failing that fails the batch
    /// 2. With `skip_if_exist`, items whose file exists are dropped up front
    ///    without taking a transfer slot
    /// 3. At most `max_download_threads` downloads run at once
    /// 4. Each item is annotated with its outcome; failures are logged
    pub async fn download_batch<T: BatchItem>(
        &self,
        items: &mut [T],
        options: &BatchOptions,
    ) -> Result<(), DownloadError> {
        if let Some(dir) = &options.output_dir {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| DownloadError::io(dir, e))?;
        }

        let download = &options.download;
        let limit = options.max_download_threads.max(1);

        let pending: Vec<(&mut T, PathBuf)> = items
            .iter_mut()
            .filter_map(|item| {
                let path = item.local_path(options.output_dir.as_deref());
                if download.skip_if_exist && path.is_file() {
                    debug!("File exists, skipping: {}", path.display());
                    None
                } else {
                    Some((item, path))
                }
            })
            .collect();

        if pending.is_empty() {
            return Ok(());
        }
        info!(
            "Downloading {} files ({} at a time)",
            pending.len(),
            limit
        );

        stream::iter(pending)
            .for_each_concurrent(limit, move |(item, path)| async move {
                let url = item.url().to_string();
                match self.download(&url, &path, download).await {
                    Ok(result) => item.record_success(&result),
                    Err(e) => {
                        warn!("Failed to download {}: {}", url, e);
                        item.record_failure(&e);
                    }
                }
            })
            .await;

        Ok(())
    }

    /// Downloads the images of a page
    pub async fn download_images(
        &self,
        images: &mut [ImageRef],
        options: &BatchOptions,
    ) -> Result<(), DownloadError> {
        self.download_batch(images, options).await
    }

    /// Downloads a list of files
    pub async fn download_files(
        &self,
        files: &mut [FileRequest],
        options: &BatchOptions,
    ) -> Result<(), DownloadError> {
        self.download_batch(files, options).await
    }
}
