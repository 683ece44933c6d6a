use crate::crawler::{CrawlOptions, ImageOptions, LinkOptions, DEFAULT_PAGE_DELAY};
use crate::download::{
    DownloadOptions, DEFAULT_BACKOFF_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DOWNLOAD_THREADS,
    DEFAULT_REQUEST_TIMEOUT,
};
use crate::storage::DEFAULT_STATE_FILE_NAME;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for Sumi-Mirror
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Pages the crawl starts from
    #[serde(default)]
    pub seeds: Vec<String>,
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub links: LinksConfig,
    #[serde(default)]
    pub images: ImagesConfig,
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Root directory of the mirror
    #[serde(rename = "output-dir")]
    pub output_dir: String,

    /// Name of the crawl state file inside the output directory
    #[serde(rename = "state-file-name", default = "default_state_file_name")]
    pub state_file_name: String,

    /// Separate directory (below the output directory) for saved HTML
    #[serde(rename = "html-file-root", default)]
    pub html_file_root: Option<String>,

    /// Maximum number of concurrent image downloads per page
    #[serde(rename = "max-download-threads", default = "default_max_download_threads")]
    pub max_download_threads: usize,

    /// Per-request timeout (milliseconds)
    #[serde(rename = "request-timeout", default = "default_request_timeout")]
    pub request_timeout: u64,

    /// Attempts for timeouts and connection resets
    #[serde(rename = "max-attempts", default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed delay between attempts (milliseconds)
    #[serde(rename = "backoff-delay", default = "default_backoff_delay")]
    pub backoff_delay: u64,

    /// Pause after each downloaded page (milliseconds)
    #[serde(rename = "page-delay", default = "default_page_delay")]
    pub page_delay: u64,

    /// Link levels followed from the seeds (0 = seeds only)
    #[serde(rename = "max-depth", default)]
    pub max_depth: u32,

    #[serde(rename = "user-agent", default)]
    pub user_agent: Option<String>,

    /// Fetch pages through `{html-proxy}?url={page url}`
    #[serde(rename = "html-proxy", default)]
    pub html_proxy: Option<String>,

    /// Collect links of mirrored pages for the next depth level
    #[serde(rename = "follow-links", default = "default_true")]
    pub follow_links: bool,
}

/// Link extraction configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LinksConfig {
    /// Container the links are collected from
    #[serde(default = "default_selector")]
    pub selector: String,

    /// Only follow links on this host (defaults to the page's own host)
    #[serde(rename = "filter-host", default)]
    pub filter_host: Option<String>,

    /// Substrings that exclude a link
    #[serde(default)]
    pub blacklist: Vec<String>,

    /// Substrings of which a link must contain at least one
    #[serde(default)]
    pub filters: Vec<String>,

    #[serde(rename = "exclude-visited-links", default)]
    pub exclude_visited_links: bool,
}

/// Image extraction configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ImagesConfig {
    /// Container the images are collected from
    #[serde(default = "default_selector")]
    pub selector: String,

    #[serde(default)]
    pub blacklist: Vec<String>,

    #[serde(default)]
    pub filters: Vec<String>,
}

impl Default for LinksConfig {
    fn default() -> Self {
        Self {
            selector: default_selector(),
            filter_host: None,
            blacklist: Vec::new(),
            filters: Vec::new(),
            exclude_visited_links: false,
        }
    }
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            selector: default_selector(),
            blacklist: Vec::new(),
            filters: Vec::new(),
        }
    }
}

fn default_state_file_name() -> String {
    DEFAULT_STATE_FILE_NAME.to_string()
}

fn default_max_download_threads() -> usize {
    DEFAULT_MAX_DOWNLOAD_THREADS
}

fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT.as_millis() as u64
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_backoff_delay() -> u64 {
    DEFAULT_BACKOFF_DELAY.as_millis() as u64
}

fn default_page_delay() -> u64 {
    DEFAULT_PAGE_DELAY.as_millis() as u64
}

fn default_true() -> bool {
    true
}

fn default_selector() -> String {
    "body".to_string()
}

impl Config {
    /// Builds the download options described by this configuration
    pub fn download_options(&self) -> DownloadOptions {
        DownloadOptions {
            request_timeout: Duration::from_millis(self.crawler.request_timeout),
            max_attempts: self.crawler.max_attempts,
            backoff_delay: Duration::from_millis(self.crawler.backoff_delay),
            user_agent: self.crawler.user_agent.clone(),
            html_proxy: self.crawler.html_proxy.clone(),
            ..Default::default()
        }
    }

    /// Builds the crawl options described by this configuration
    ///
    /// Run flags (`force`, `refresh`, `cache_bypass`, `verbose`) start out false.
    pub fn crawl_options(&self) -> CrawlOptions {
        CrawlOptions {
            output_dir: PathBuf::from(&self.crawler.output_dir),
            html_file_root: self.crawler.html_file_root.as_ref().map(PathBuf::from),
            links: LinkOptions {
                selector: self.links.selector.clone(),
                blacklist: self.links.blacklist.clone(),
                filters: self.links.filters.clone(),
                filter_host: self.links.filter_host.clone(),
                exclude_visited_links: self.links.exclude_visited_links,
                ..Default::default()
            },
            images: ImageOptions {
                selector: self.images.selector.clone(),
                blacklist: self.images.blacklist.clone(),
                filters: self.images.filters.clone(),
            },
            follow_links: self.crawler.follow_links,
            page_delay: Duration::from_millis(self.crawler.page_delay),
            max_download_threads: self.crawler.max_download_threads,
            download: self.download_options(),
            ..Default::default()
        }
    }
}
