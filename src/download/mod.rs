//! Download engine
//!
//! This module fetches remote resources for the mirror:
//! - Single file downloads streamed into a `.part` file and promoted on success
//! - Fixed-delay retries for timeouts and connection resets
//! - Content-type driven renaming and server modification times
//! - HTML page fetches (optionally through a proxy endpoint)
//! - Bounded concurrent batches of files or images

mod batch;
mod engine;
mod mimetypes;
mod options;
mod page;

pub use batch::{
    mirror_path, url_file_name, BatchItem, BatchOptions, FileRequest, DEFAULT_MAX_DOWNLOAD_THREADS,
};
pub use engine::{build_http_client, part_path, Downloader, DEFAULT_USER_AGENT};
pub use mimetypes::extensions_for;
pub use options::{
    compute_download_speed, DownloadCallbacks, DownloadOptions, DownloadResult, DownloadTarget,
    Progress, RenameEvent, RetryNotice, DEFAULT_BACKOFF_DELAY, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_REQUEST_TIMEOUT,
};
pub use page::{proxied_url, FetchedPage};

use std::error::Error as StdError;
use std::io::ErrorKind;
use std::path::PathBuf;
use thiserror::Error;

/// Kind of a retryable network failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientKind {
    Timeout,
    ConnectionReset,
}

impl TransientKind {
    /// Symbolic code recorded in the crawl state
    pub fn code(&self) -> &'static str {
        match self {
            TransientKind::Timeout => "ETIMEDOUT",
            TransientKind::ConnectionReset => "ECONNRESET",
        }
    }
}

/// Errors that can occur while downloading
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("File not found: {url}")]
    NotFound { url: String },

    #[error("Request to {url} failed with status {status}")]
    Http { url: String, status: u16 },

    #[error("Network error ({}) for {url}: {message}", .kind.code())]
    Transient {
        url: String,
        kind: TransientKind,
        message: String,
    },

    #[error("Giving up on {url} after {attempts} attempts ({})", .kind.code())]
    TimeoutExhausted {
        url: String,
        attempts: u32,
        kind: TransientKind,
    },

    #[error("Network error for {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Not an HTML page ({content_type}): {url}")]
    NotHtml { url: String, content_type: String },

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File download failed for unknown reason: {url}")]
    Unknown { url: String },
}

impl DownloadError {
    /// Classifies a client error as retryable or terminal
    pub(crate) fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            Some(TransientKind::Timeout)
        } else {
            transient_io_kind(&err)
        };

        match kind {
            Some(kind) => DownloadError::Transient {
                url: url.to_string(),
                kind,
                message: err.to_string(),
            },
            None => DownloadError::Network {
                url: url.to_string(),
                source: err,
            },
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DownloadError::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns the transient kind when this failure may be retried
    pub fn transient_kind(&self) -> Option<TransientKind> {
        match self {
            DownloadError::Transient { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// HTTP status of the response that caused the failure
    pub fn status_code(&self) -> Option<u16> {
        match self {
            DownloadError::NotFound { .. } => Some(404),
            DownloadError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Code stored next to a failed item: the HTTP status or a symbolic network code
    pub fn code(&self) -> Option<String> {
        match self {
            DownloadError::NotFound { .. } | DownloadError::Http { .. } => {
                self.status_code().map(|s| s.to_string())
            }
            DownloadError::Transient { kind, .. } | DownloadError::TimeoutExhausted { kind, .. } => {
                Some(kind.code().to_string())
            }
            DownloadError::Network { source, .. } if source.is_connect() => {
                Some("ECONNREFUSED".to_string())
            }
            _ => None,
        }
    }
}

/// Looks for a reset or timed-out socket anywhere in the error chain
fn transient_io_kind(err: &(dyn StdError + 'static)) -> Option<TransientKind> {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            match io.kind() {
                ErrorKind::TimedOut => return Some(TransientKind::Timeout),
                ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::BrokenPipe
                | ErrorKind::UnexpectedEof => return Some(TransientKind::ConnectionReset),
                _ => {}
            }
        }
        current = e.source();
    }
    None
}
