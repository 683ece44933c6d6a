//! Crawler coordinator - the crawl driver
//!
//! The coordinator walks a worklist of page URLs through the [`Saver`]:
//! - Links already marked `done` or `visited` in the crawl state are skipped
//!   unless the run is forced or refreshed, so a page that failed once is not
//!   fetched again on every run
//! - Pages are processed strictly one after another, in list order
//! - A freshly downloaded page is followed by `page_delay` before the next one
//! - A failing page is logged and the walk continues
//!
//! [`Coordinator::crawl`] repeats this level by level over the links the
//! handlers discovered, up to a maximum depth.

use crate::config::Config;
use crate::crawler::{
    get_links, index_html_path, load_html, CrawlOptions, Dom, MirrorHandler, Saver,
};
use crate::url::{host_with_port, LinkResolver};
use crate::{MirrorError, Result};
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, error, info, warn};

/// A page whose processing failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedPage {
    pub url: String,
    pub error: String,
}

/// Summary of one or more crawl rounds
#[derive(Debug, Clone, Default)]
pub struct CrawlReport {
    /// Pages processed successfully
    pub processed: usize,
    /// Of the processed pages, those served from the HTML cache
    pub cached: usize,
    /// Pages skipped because they were already done or visited
    pub skipped: usize,
    pub failed: Vec<FailedPage>,
    /// Links collected by handlers, deduplicated in discovery order
    pub discovered: Vec<String>,
}

impl CrawlReport {
    /// Number of pages downloaded from the network
    pub fn downloaded(&self) -> usize {
        self.processed - self.cached
    }

    fn discover(&mut self, links: impl IntoIterator<Item = String>) {
        for link in links {
            if !self.discovered.contains(&link) {
                self.discovered.push(link);
            }
        }
    }

    fn absorb(&mut self, other: CrawlReport) {
        self.processed += other.processed;
        self.cached += other.cached;
        self.skipped += other.skipped;
        self.failed.extend(other.failed);
        self.discover(other.discovered);
    }
}

/// Main crawl driver
pub struct Coordinator {
    saver: Saver,
    options: CrawlOptions,
}

impl Coordinator {
    /// Creates a coordinator over a configured saver
    pub fn new(saver: Saver, options: CrawlOptions) -> Self {
        Self { saver, options }
    }

    pub fn saver(&self) -> &Saver {
        &self.saver
    }

    pub fn options(&self) -> &CrawlOptions {
        &self.options
    }

    /// Processes a list of pages serially
    ///
    /// # Arguments
    ///
    /// * `links` - Page URLs, processed in list order
    ///
    /// # Returns
    ///
    /// * `Ok(CrawlReport)` - All pages were attempted; failures other than the
    ///   last one are listed in the report
    /// * `Err(MirrorError)` - The last page of the list failed
    pub async fn process_pages(&self, links: &[String]) -> Result<CrawlReport> {
        let mut report = CrawlReport::default();
        match self.run_pages(links, false, &mut report).await {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// Crawls from seed pages, following discovered links
    ///
    /// Level 0 is the seed list; each further level is made of the links found
    /// on the previous one that were not seen before. Skipped pages
    /// contribute the links of their cached HTML, so a resumed crawl still
    /// reaches deeper levels. Page failures are listed in the report.
    pub async fn crawl(&self, seeds: &[String], max_depth: u32) -> Result<CrawlReport> {
        let mut report = CrawlReport::default();
        let mut seen: HashSet<String> = HashSet::new();
        let mut level: Vec<String> = seeds
            .iter()
            .filter(|url| seen.insert(url.to_string()))
            .cloned()
            .collect();

        for depth in 0..=max_depth {
            if level.is_empty() {
                break;
            }
            info!("Depth {}: {} pages", depth, level.len());

            let mut round = CrawlReport::default();
            if let Some(e) = self.run_pages(&level, depth < max_depth, &mut round).await {
                debug!("Last page of depth {} failed: {}", depth, e);
            }

            level = round
                .discovered
                .iter()
                .filter(|url| seen.insert(url.to_string()))
                .cloned()
                .collect();
            report.absorb(round);
        }

        info!(
            "Crawl finished: {} processed ({} cached), {} skipped, {} failed",
            report.processed,
            report.cached,
            report.skipped,
            report.failed.len()
        );
        Ok(report)
    }

    /// Saves the crawl state; later calls do nothing
    pub fn finish(&self) -> Result<bool> {
        self.saver.exit()
    }

    /// Walks the worklist, returning the error of the last page if it failed
    async fn run_pages(
        &self,
        links: &[String],
        links_of_skipped: bool,
        report: &mut CrawlReport,
    ) -> Option<MirrorError> {
        let mut pending = Vec::with_capacity(links.len());
        for url in links {
            if !self.options.reprocess() && self.already_processed(url) {
                debug!("Already processed: {}", url);
                report.skipped += 1;
                if links_of_skipped {
                    match self.cached_links(url).await {
                        Ok(found) => report.discover(found),
                        Err(e) => debug!("No cached links for {}: {}", url, e),
                    }
                }
            } else {
                pending.push(url);
            }
        }

        let total = pending.len();
        let mut last_error = None;

        for (i, url) in pending.into_iter().enumerate() {
            self.progress(format_args!("[{}/{}] Visit page: {}", i + 1, total, url));

            let fetched = match self.saver.process_page(url, &self.options).await {
                Ok(page) => {
                    self.progress(format_args!(
                        "[{}/{}] Visited: {} ({} links)",
                        i + 1,
                        total,
                        page.url,
                        page.links.len()
                    ));
                    report.processed += 1;
                    if page.html_cached {
                        report.cached += 1;
                    }
                    report.discover(page.links);
                    !page.html_cached
                }
                Err(e) => {
                    error!("Failed to process {}: {}", url, e);
                    report.failed.push(FailedPage {
                        url: url.clone(),
                        error: e.to_string(),
                    });
                    if i + 1 == total {
                        last_error = Some(e);
                    }
                    true
                }
            };

            if fetched && i + 1 < total && !self.options.page_delay.is_zero() {
                tokio::time::sleep(self.options.page_delay).await;
            }
        }

        last_error
    }

    fn already_processed(&self, url: &str) -> bool {
        self.saver.is_done(url) || self.saver.is_visited(url)
    }

    /// Links of a page's saved HTML
    async fn cached_links(&self, url: &str) -> Result<Vec<String>> {
        let path = index_html_path(url, &self.options)?;
        let Some(html) = load_html(&path).await else {
            return Ok(Vec::new());
        };

        let dom = Dom::parse(&html);
        let base_url = dom.base_href();
        let resolver = LinkResolver::new(url, base_url.as_deref())?;

        let mut link_options = self.options.links.clone();
        if link_options.filter_host.is_none() {
            link_options.filter_host = host_with_port(resolver.page());
        }
        get_links(&dom, &resolver, &link_options, |link| {
            self.saver.is_visited(link)
        })
    }

    fn progress(&self, message: fmt::Arguments<'_>) {
        if self.options.verbose {
            info!("{}", message);
        } else {
            debug!("{}", message);
        }
    }
}

/// Runs a complete mirror crawl
///
/// This is the main entry point for mirroring. It will:
/// 1. Open the crawl state in the output directory
/// 2. Register the built-in [`MirrorHandler`]
/// 3. Crawl the configured seeds up to `max-depth`
/// 4. Save the crawl state, also when interrupted with Ctrl-C
///
/// # Arguments
///
/// * `config` - The mirror configuration
/// * `options` - Crawl options, usually `config.crawl_options()` plus run flags
///
/// # Returns
///
/// * `Ok(CrawlReport)` - Crawl completed
/// * `Err(MirrorError)` - Crawl was interrupted or the state could not be saved
///
/// # Example
///
/// ```no_run
/// use sumi_mirror::config::load_config;
/// use sumi_mirror::crawler::run_crawl;
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = load_config(Path::new("mirror.toml"))?;
/// let report = run_crawl(&config, config.crawl_options()).await?;
/// println!("{} pages mirrored", report.processed);
/// # Ok(())
/// # }
/// ```
pub async fn run_crawl(config: &Config, options: CrawlOptions) -> Result<CrawlReport> {
    let mut saver = Saver::open(&options, &config.crawler.state_file_name)?;
    saver.add_handler(MirrorHandler);

    let coordinator = Coordinator::new(saver, options);
    info!(
        "Mirroring {} seeds into {}",
        config.seeds.len(),
        coordinator.options().output_dir.display()
    );

    let outcome = tokio::select! {
        report = coordinator.crawl(&config.seeds, config.crawler.max_depth) => report,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, saving crawl state");
            Err(MirrorError::Interrupted)
        }
    };

    coordinator.finish()?;
    outcome
}
