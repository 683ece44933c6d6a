//! Options shared by page processing, extraction and the crawl driver

use crate::download::{DownloadOptions, DEFAULT_MAX_DOWNLOAD_THREADS};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default pause after a freshly downloaded page
pub const DEFAULT_PAGE_DELAY: Duration = Duration::from_millis(1000);

/// Accepts or rejects an extracted link
pub type LinkValidator = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Rewrites a resolved link before it is written back into the page
pub type LinkEditor = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Link extraction options
#[derive(Clone)]
pub struct LinkOptions {
    /// Container the `<a>` elements are searched in
    pub selector: String,
    /// Links containing any of these substrings are dropped
    pub blacklist: Vec<String>,
    /// When non-empty, links must contain at least one of these substrings
    pub filters: Vec<String>,
    /// Only keep links on this host (`host[:port]`)
    pub filter_host: Option<String>,
    pub exclude_visited_links: bool,
    /// Visited set used by `exclude_visited_links` instead of the state store
    pub visited_links: Option<HashSet<String>>,
    pub validator: Option<LinkValidator>,
    pub link_editor: Option<LinkEditor>,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            selector: "body".to_string(),
            blacklist: Vec::new(),
            filters: Vec::new(),
            filter_host: None,
            exclude_visited_links: false,
            visited_links: None,
            validator: None,
            link_editor: None,
        }
    }
}

impl fmt::Debug for LinkOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkOptions")
            .field("selector", &self.selector)
            .field("blacklist", &self.blacklist)
            .field("filters", &self.filters)
            .field("filter_host", &self.filter_host)
            .field("exclude_visited_links", &self.exclude_visited_links)
            .field("visited_links", &self.visited_links.as_ref().map(HashSet::len))
            .field("validator", &self.validator.is_some())
            .field("link_editor", &self.link_editor.is_some())
            .finish()
    }
}

/// Image extraction options
#[derive(Debug, Clone)]
pub struct ImageOptions {
    /// Container the `<img>` elements are searched in
    pub selector: String,
    pub blacklist: Vec<String>,
    pub filters: Vec<String>,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            selector: "body".to_string(),
            blacklist: Vec::new(),
            filters: Vec::new(),
        }
    }
}

/// Options for processing pages
#[derive(Debug, Clone)]
pub struct CrawlOptions {
    /// Root of the mirror
    pub output_dir: PathBuf,

    /// Separate root for saved HTML files, below `output_dir`
    pub html_file_root: Option<PathBuf>,

    pub links: LinkOptions,
    pub images: ImageOptions,

    /// Process links even if they are already done
    pub force: bool,

    /// Re-process every link, ignoring done and visited markers
    pub refresh: bool,

    /// Log per-page progress at info level
    pub verbose: bool,

    /// Always fetch pages from the network
    pub cache_bypass: bool,

    /// Collect followable links into `Page::links`
    pub follow_links: bool,

    /// Pause after each freshly downloaded page
    pub page_delay: Duration,

    pub max_download_threads: usize,

    pub download: DownloadOptions,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            html_file_root: None,
            links: LinkOptions::default(),
            images: ImageOptions::default(),
            force: false,
            refresh: false,
            verbose: false,
            cache_bypass: false,
            follow_links: true,
            page_delay: DEFAULT_PAGE_DELAY,
            max_download_threads: DEFAULT_MAX_DOWNLOAD_THREADS,
            download: DownloadOptions::default(),
        }
    }
}

impl CrawlOptions {
    /// Creates options writing into `output_dir`
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            ..Default::default()
        }
    }

    /// True when done/visited markers must be ignored
    pub fn reprocess(&self) -> bool {
        self.force || self.refresh
    }
}
