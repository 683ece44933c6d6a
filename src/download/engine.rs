//! Resilient single-file downloads
//!
//! A download streams the response body into `<dest>.part` and only renames it
//! to the destination once the whole body was received, so an interrupted
//! download never leaves a truncated file at the final path.

use crate::download::mimetypes::{self, essence};
use crate::download::{
    DownloadError, DownloadOptions, DownloadResult, DownloadTarget, Progress, RenameEvent,
    RetryNotice,
};
use chrono::DateTime;
use reqwest::header::{HeaderMap, CONTENT_TYPE, LAST_MODIFIED};
use reqwest::{Client, RequestBuilder, StatusCode};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// User agent sent with page fetches unless overridden
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

/// Builds the HTTP client shared by all downloads
///
/// Compressed bodies (gzip, deflate, brotli) are decoded transparently. The
/// request timeout is applied per request from [`DownloadOptions`].
///
/// # Arguments
///
/// * `user_agent` - Default `User-Agent` header
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(user_agent: &str) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(user_agent)
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .deflate(true)
        .brotli(true)
        .build()
}

/// Path of the temporary file a download is streamed into
pub fn part_path(local_file: &Path) -> PathBuf {
    let mut name = local_file.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

/// Response data kept after the body was written
struct Fetched {
    status: StatusCode,
    headers: HeaderMap,
    bytes: u64,
}

/// Downloads files and pages over a shared HTTP client
#[derive(Debug, Clone)]
pub struct Downloader {
    pub(crate) client: Client,
}

impl Downloader {
    /// Creates a downloader over an existing client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Creates a downloader with a fresh client
    pub fn with_user_agent(user_agent: &str) -> Result<Self, reqwest::Error> {
        Ok(Self::new(build_http_client(user_agent)?))
    }

    /// The underlying HTTP client
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Downloads `url` to `local_file`
    ///
    /// # Behavior
    ///
    /// | Condition | Action |
    /// |-----------|--------|
    /// | `skip_if_exist` and file exists | Succeed without a request |
    /// | HTTP 404 | Fail immediately |
    /// | Other non-2xx | Fail immediately with the status |
    /// | Timeout | Retry after `backoff_delay`, up to `max_attempts` |
    /// | Connection reset | Retry like a timeout |
    /// | Other network error | Fail immediately |
    ///
    /// A failed attempt removes its `.part` file. On success the `.part` file is
    /// promoted to `local_file`, the server's `Last-Modified` is applied as
    /// modification time and, unless `no_rename` is set, the file is renamed
    /// when its extension does not match the response content type.
    ///
    /// # Returns
    ///
    /// * `Ok(DownloadResult)` - `final_path` is where the file actually ended up
    /// * `Err(DownloadError)` - The download failed; no file is left at `local_file`
    pub async fn download(
        &self,
        url: &str,
        local_file: impl AsRef<Path>,
        options: &DownloadOptions,
    ) -> Result<DownloadResult, DownloadError> {
        let local_file = local_file.as_ref();

        if options.skip_if_exist && local_file.is_file() {
            debug!("File exists, skipping: {}", local_file.display());
            return Ok(DownloadResult::existing(local_file));
        }

        let target = DownloadTarget {
            url,
            local_file: Some(local_file),
        };

        let result = self.download_inner(url, local_file, options).await;
        match &result {
            Ok(done) => options.callbacks.finished(done),
            Err(e) => options.callbacks.failed(e, &target),
        }
        result
    }

    async fn download_inner(
        &self,
        url: &str,
        local_file: &Path,
        options: &DownloadOptions,
    ) -> Result<DownloadResult, DownloadError> {
        if let Some(dir) = local_file.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| DownloadError::io(dir, e))?;
        }

        let tmp = part_path(local_file);
        let tmp_ref: &Path = &tmp;

        let fetched = self
            .with_retries(url, Some(local_file), options, move || {
                self.fetch_to_part(url, local_file, tmp_ref, options)
            })
            .await?;

        if !tmp.is_file() {
            return Err(DownloadError::Unknown {
                url: url.to_string(),
            });
        }

        tokio::fs::rename(&tmp, local_file)
            .await
            .map_err(|e| DownloadError::io(local_file, e))?;

        apply_last_modified(local_file, &fetched.headers);

        let content_type = fetched
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(essence)
            .filter(|ct| !ct.is_empty());

        let final_path = match (&content_type, options.no_rename) {
            (Some(ct), false) => rename_for_content_type(local_file, ct, options).await?,
            _ => local_file.to_path_buf(),
        };

        debug!(
            "Downloaded {} -> {} ({} bytes)",
            url,
            final_path.display(),
            fetched.bytes
        );

        Ok(DownloadResult {
            final_path,
            byte_size: fetched.bytes,
            content_type,
            status_code: Some(fetched.status.as_u16()),
            headers: options.return_headers.then_some(fetched.headers),
            skipped: false,
        })
    }

    /// One attempt: request, check the status and stream the body into `tmp`
    async fn fetch_to_part(
        &self,
        url: &str,
        local_file: &Path,
        tmp: &Path,
        options: &DownloadOptions,
    ) -> Result<Fetched, DownloadError> {
        options.callbacks.start(&DownloadTarget {
            url,
            local_file: Some(local_file),
        });

        let result = self.stream_to_part(url, local_file, tmp, options).await;

        if result.is_err() && tmp.exists() {
            if let Err(e) = tokio::fs::remove_file(tmp).await {
                debug!("Could not remove {}: {}", tmp.display(), e);
            }
        }

        result
    }

    async fn stream_to_part(
        &self,
        url: &str,
        local_file: &Path,
        tmp: &Path,
        options: &DownloadOptions,
    ) -> Result<Fetched, DownloadError> {
        let mut response = self
            .request(url, options)
            .send()
            .await
            .map_err(|e| DownloadError::from_reqwest(url, e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(DownloadError::NotFound {
                url: url.to_string(),
            });
        }
        if !status.is_success() {
            return Err(DownloadError::Http {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let headers = response.headers().clone();
        let total = response.content_length().unwrap_or(0);

        let mut file = tokio::fs::File::create(tmp)
            .await
            .map_err(|e| DownloadError::io(tmp, e))?;

        let started = Instant::now();
        let mut current: u64 = 0;

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| DownloadError::from_reqwest(url, e))?
        {
            file.write_all(&chunk)
                .await
                .map_err(|e| DownloadError::io(tmp, e))?;
            current += chunk.len() as u64;

            if options.callbacks.wants_progress() {
                options
                    .callbacks
                    .progress(&Progress::new(url, local_file, started, current, total));
            }
        }

        file.flush().await.map_err(|e| DownloadError::io(tmp, e))?;

        Ok(Fetched {
            status,
            headers,
            bytes: current,
        })
    }

    pub(crate) fn request(&self, url: &str, options: &DownloadOptions) -> RequestBuilder {
        let mut request = self.client.get(url).timeout(options.request_timeout);
        for (name, value) in &options.request_headers {
            request = request.header(name.as_str(), value.as_str());
        }
        request
    }

    /// Runs `attempt` until it succeeds, fails terminally or runs out of attempts
    ///
    /// Only transient failures (timeouts, connection resets) are retried, each
    /// after the fixed `backoff_delay`. Once `max_attempts` attempts failed the
    /// last transient failure becomes [`DownloadError::TimeoutExhausted`].
    pub(crate) async fn with_retries<T, F, Fut>(
        &self,
        url: &str,
        local_file: Option<&Path>,
        options: &DownloadOptions,
        mut attempt: F,
    ) -> Result<T, DownloadError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DownloadError>>,
    {
        let max_attempts = options.max_attempts.max(1);
        let mut attempts = 0;

        loop {
            let err = match attempt().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            attempts += 1;

            let Some(kind) = err.transient_kind() else {
                return Err(err);
            };

            if attempts >= max_attempts {
                warn!("{} failed {} times, giving up", url, attempts);
                return Err(DownloadError::TimeoutExhausted {
                    url: url.to_string(),
                    attempts,
                    kind,
                });
            }

            info!(
                "{} for {}, retrying in {:?} ({}/{})",
                kind.code(),
                url,
                options.backoff_delay,
                attempts,
                max_attempts
            );
            options.callbacks.timeout(&RetryNotice {
                url,
                local_file,
                attempts,
                max_attempts,
                error: &err,
            });

            tokio::time::sleep(options.backoff_delay).await;
        }
    }
}

/// Sets the file's modification time from a `Last-Modified` header
///
/// Failures are logged and otherwise ignored.
fn apply_last_modified(path: &Path, headers: &HeaderMap) {
    let Some(value) = headers.get(LAST_MODIFIED).and_then(|v| v.to_str().ok()) else {
        return;
    };

    let modified = match DateTime::parse_from_rfc2822(value) {
        Ok(time) => SystemTime::from(time),
        Err(e) => {
            debug!("Ignoring Last-Modified '{}': {}", value, e);
            return;
        }
    };

    let result = std::fs::OpenOptions::new()
        .write(true)
        .open(path)
        .and_then(|file| file.set_modified(modified));

    if let Err(e) = result {
        debug!("Could not set modification time of {}: {}", path.display(), e);
    }
}

/// Renames a downloaded file when its extension does not match its content type
///
/// Files with an unknown content type keep their name.
async fn rename_for_content_type(
    path: &Path,
    content_type: &str,
    options: &DownloadOptions,
) -> Result<PathBuf, DownloadError> {
    let Some(extensions) = mimetypes::extensions_for(content_type) else {
        return Ok(path.to_path_buf());
    };

    let current = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    if extensions.contains(&current.as_str()) {
        return Ok(path.to_path_buf());
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let new_path = path.with_file_name(format!("{}.{}", stem, extensions[0]));

    info!("File rename: {} -> {}", path.display(), new_path.display());
    options.callbacks.rename(&RenameEvent {
        old_file: path,
        new_file: &new_path,
    });

    tokio::fs::rename(path, &new_path)
        .await
        .map_err(|e| DownloadError::io(path, e))?;

    Ok(new_path)
}
