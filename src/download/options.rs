//! Download options, lifecycle callbacks and results

use crate::download::DownloadError;
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default per-request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(20_000);

/// Default number of attempts for retryable failures
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default fixed delay between attempts
pub const DEFAULT_BACKOFF_DELAY: Duration = Duration::from_millis(5_000);

/// Options recognized by the download engine
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Succeed without a request if the destination file already exists
    pub skip_if_exist: bool,

    /// Extra request headers
    pub request_headers: HashMap<String, String>,

    /// Timeout for a whole request, body included
    pub request_timeout: Duration,

    /// Attempts made for timeouts and connection resets before giving up
    pub max_attempts: u32,

    /// Fixed (non-exponential) delay before each new attempt
    pub backoff_delay: Duration,

    /// Keep the requested file name even if the content type suggests another extension
    pub no_rename: bool,

    /// Include the response headers in the result
    pub return_headers: bool,

    /// User agent sent when fetching pages without explicit request headers
    pub user_agent: Option<String>,

    /// Proxy endpoint for page fetches (`{proxy}?url={encoded url}`)
    pub html_proxy: Option<String>,

    pub callbacks: DownloadCallbacks,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            skip_if_exist: false,
            request_headers: HashMap::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_delay: DEFAULT_BACKOFF_DELAY,
            no_rename: false,
            return_headers: false,
            user_agent: None,
            html_proxy: None,
            callbacks: DownloadCallbacks::default(),
        }
    }
}

/// Progress of one download, reported per received chunk
#[derive(Debug, Clone)]
pub struct Progress<'a> {
    pub url: &'a str,
    pub file: &'a Path,
    pub timestamp: DateTime<Utc>,
    /// Average transfer speed in kB/s
    pub speed: f64,
    /// 0 when the server did not advertise a length
    pub percentage: f64,
    pub current: u64,
    pub total: u64,
}

impl<'a> Progress<'a> {
    pub(crate) fn new(
        url: &'a str,
        file: &'a Path,
        started: Instant,
        current: u64,
        total: u64,
    ) -> Self {
        let percentage = if total > 0 {
            (current as f64 / total as f64 * 100.0).round()
        } else {
            0.0
        };

        Self {
            url,
            file,
            timestamp: Utc::now(),
            speed: compute_download_speed(started.elapsed(), current),
            percentage,
            current,
            total,
        }
    }
}

/// Computes the average speed in kB/s, rounded down to one decimal
pub fn compute_download_speed(elapsed: Duration, bytes: u64) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    ((bytes as f64 / secs / 1024.0) * 10.0).floor() / 10.0
}

/// What is being downloaded
#[derive(Debug, Clone, Copy)]
pub struct DownloadTarget<'a> {
    pub url: &'a str,
    /// `None` for page fetches, which are kept in memory
    pub local_file: Option<&'a Path>,
}

/// Reported before waiting out the backoff delay
#[derive(Debug, Clone)]
pub struct RetryNotice<'a> {
    pub url: &'a str,
    pub local_file: Option<&'a Path>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub error: &'a DownloadError,
}

/// Reported when a finished file is renamed after its content type
#[derive(Debug, Clone, Copy)]
pub struct RenameEvent<'a> {
    pub old_file: &'a Path,
    pub new_file: &'a Path,
}

pub type ProgressCallback = Arc<dyn Fn(&Progress<'_>) + Send + Sync>;
pub type StartCallback = Arc<dyn Fn(&DownloadTarget<'_>) + Send + Sync>;
pub type TimeoutCallback = Arc<dyn Fn(&RetryNotice<'_>) + Send + Sync>;
pub type FailedCallback = Arc<dyn Fn(&DownloadError, &DownloadTarget<'_>) + Send + Sync>;
pub type RenameCallback = Arc<dyn Fn(&RenameEvent<'_>) + Send + Sync>;
pub type FinishedCallback = Arc<dyn Fn(&DownloadResult) + Send + Sync>;

/// Optional lifecycle callbacks
///
/// All callbacks receive plain data; nothing they return is used.
#[derive(Clone, Default)]
pub struct DownloadCallbacks {
    pub on_progress: Option<ProgressCallback>,
    pub on_download_start: Option<StartCallback>,
    pub on_download_timeout: Option<TimeoutCallback>,
    pub on_download_failed: Option<FailedCallback>,
    pub on_rename: Option<RenameCallback>,
    pub on_download_finished: Option<FinishedCallback>,
}

impl DownloadCallbacks {
    pub(crate) fn wants_progress(&self) -> bool {
        self.on_progress.is_some()
    }

    pub(crate) fn progress(&self, progress: &Progress<'_>) {
        if let Some(cb) = &self.on_progress {
            cb(progress);
        }
    }

    pub(crate) fn start(&self, target: &DownloadTarget<'_>) {
        if let Some(cb) = &self.on_download_start {
            cb(target);
        }
    }

    pub(crate) fn timeout(&self, notice: &RetryNotice<'_>) {
        if let Some(cb) = &self.on_download_timeout {
            cb(notice);
        }
    }

    pub(crate) fn failed(&self, error: &DownloadError, target: &DownloadTarget<'_>) {
        if let Some(cb) = &self.on_download_failed {
            cb(error, target);
        }
    }

    pub(crate) fn rename(&self, event: &RenameEvent<'_>) {
        if let Some(cb) = &self.on_rename {
            cb(event);
        }
    }

    pub(crate) fn finished(&self, result: &DownloadResult) {
        if let Some(cb) = &self.on_download_finished {
            cb(result);
        }
    }
}

impl fmt::Debug for DownloadCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadCallbacks")
            .field("on_progress", &self.on_progress.is_some())
            .field("on_download_start", &self.on_download_start.is_some())
            .field("on_download_timeout", &self.on_download_timeout.is_some())
            .field("on_download_failed", &self.on_download_failed.is_some())
            .field("on_rename", &self.on_rename.is_some())
            .field("on_download_finished", &self.on_download_finished.is_some())
            .finish()
    }
}

/// Outcome of a file download
///
/// `final_path` may differ from the requested path when the file was renamed
/// after its content type; callers must use this field.
#[derive(Debug, Clone)]
pub struct DownloadResult {
    pub final_path: PathBuf,
    pub byte_size: u64,
    /// Media type without parameters
    pub content_type: Option<String>,
    pub status_code: Option<u16>,
    /// Present only with `return_headers`
    pub headers: Option<HeaderMap>,
    /// True when the file already existed and no request was made
    pub skipped: bool,
}

impl DownloadResult {
    pub(crate) fn existing(path: &Path) -> Self {
        let byte_size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        Self {
            final_path: path.to_path_buf(),
            byte_size,
            content_type: None,
            status_code: None,
            headers: None,
            skipped: true,
        }
    }
}
