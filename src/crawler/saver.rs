//! Page processor
//!
//! The [`Saver`] owns the downloader, the crawl state store and the ordered
//! handler registry. Processing one page walks the page state machine:
//!
//! ```text
//! Unvisited -> Fetching -> Cached | Downloaded -> Visited
//!                      \-> Failed             \-> Failed
//! ```
//!
//! A page is marked visited in the state store as soon as its fetch finished,
//! whether it succeeded or not, so a broken URL is not retried on every run.

use crate::crawler::{
    get_links, index_html_path, page_output_dir, CrawlOptions, Dom, Handler, LinkOptions, Page,
};
use crate::download::{BatchOptions, DownloadOptions, Downloader};
use crate::state::PageState;
use crate::storage::{open_store, CrawlRecord, ImageRef, StateStore, StorageError};
use crate::{MirrorError, Result};
use chrono::Utc;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// HTML of a page, from the cache or the network
#[derive(Debug, Clone)]
pub struct PageSource {
    /// Page URL (after redirects for downloaded pages)
    pub url: String,
    pub html: String,
    pub cached: bool,
}

/// Processes pages and records progress
pub struct Saver {
    downloader: Downloader,
    store: Mutex<Box<dyn StateStore>>,
    handlers: Vec<Arc<dyn Handler>>,
}

impl Saver {
    /// Creates a saver without handlers
    pub fn new(downloader: Downloader, store: impl StateStore + 'static) -> Self {
        Self {
            downloader,
            store: Mutex::new(Box::new(store)),
            handlers: Vec::new(),
        }
    }

    /// Creates a saver whose state lives in `{output_dir}/{state_file_name}`
    pub fn open(options: &CrawlOptions, state_file_name: &str) -> Result<Self> {
        let user_agent = options
            .download
            .user_agent
            .as_deref()
            .unwrap_or(crate::download::DEFAULT_USER_AGENT);
        let downloader = Downloader::with_user_agent(user_agent)?;
        let store = open_store(&options.output_dir, state_file_name);
        Ok(Self::new(downloader, store))
    }

    /// Registers a handler after the already registered ones
    pub fn add_handler(&mut self, handler: impl Handler + 'static) {
        debug!("Add handler: {}", handler.name());
        self.handlers.push(Arc::new(handler));
    }

    /// Builder form of [`Saver::add_handler`]
    pub fn with_handler(mut self, handler: impl Handler + 'static) -> Self {
        self.add_handler(handler);
        self
    }

    /// Names of the registered handlers, in dispatch order
    pub fn handler_names(&self) -> Vec<&str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    pub fn downloader(&self) -> &Downloader {
        &self.downloader
    }

    // ===== State =====

    /// Locks the state store
    ///
    /// The guard must not be held across an `.await`.
    pub fn store(&self) -> MutexGuard<'_, Box<dyn StateStore>> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record(&self, url: &str) -> Option<CrawlRecord> {
        self.store().record(url)
    }

    pub fn is_visited(&self, url: &str) -> bool {
        self.store().is_visited(url)
    }

    pub fn is_done(&self, url: &str) -> bool {
        self.store().is_done(url)
    }

    pub fn set_visited(&self, url: &str) -> Result<()> {
        Ok(self.store().set_visited(url)?)
    }

    /// Deep-merges `update` into the record of `key`
    pub fn update_state(&self, key: &str, update: Value, persist: bool) -> Result<()> {
        Ok(self.store().update(key, update, persist)?)
    }

    /// Saves the state once; later calls do nothing
    ///
    /// Returns true if this call wrote the state file.
    pub fn exit(&self) -> Result<bool> {
        let saved = self.store().shutdown()?;
        if saved {
            info!("Crawl state saved");
        }
        Ok(saved)
    }

    // ===== Pages =====

    /// Loads a page from the HTML cache, or downloads it
    ///
    /// The cache is the page's saved `index.html`; it is ignored with
    /// `cache_bypass` and when it is missing or empty.
    pub async fn get_page(&self, url: &str, options: &CrawlOptions) -> Result<PageSource> {
        let local_file = index_html_path(url, options)?;

        if !options.cache_bypass {
            if let Some(html) = load_html(&local_file).await {
                debug!("Cached: {}", local_file.display());
                return Ok(PageSource {
                    url: url.to_string(),
                    html,
                    cached: true,
                });
            }
        }

        let fetched = self.downloader.download_page(url, &options.download).await?;
        Ok(PageSource {
            url: fetched.resolved_url,
            html: fetched.html,
            cached: false,
        })
    }

    /// Processes one page
    ///
    /// # Flow
    ///
    /// 1. Get the page HTML (see [`Saver::get_page`])
    /// 2. Mark the URL visited, on success and on failure alike
    /// 3. Read title, `<base href>` and compute the page output directory
    /// 4. Dispatch to every matching handler in registration order; the first
    ///    handler error stops the dispatch and is returned
    ///
    /// # Returns
    ///
    /// * `Ok(Page)` - The page after all handlers ran
    /// * `Err(MirrorError)` - Fetch or handler failure
    pub async fn process_page(&self, url: &str, options: &CrawlOptions) -> Result<Page> {
        let state = PageState::Unvisited.transition(PageState::Fetching)?;

        let source = match self.get_page(url, options).await {
            Ok(source) => source,
            Err(e) => {
                self.set_visited(url)?;
                state.transition(PageState::Failed)?;
                return Err(e);
            }
        };

        let state = state.transition(if source.cached {
            PageState::Cached
        } else {
            PageState::Downloaded
        })?;
        self.set_visited(url)?;

        let mut dom = Dom::parse(&source.html);
        let mut page = Page {
            key: url.to_string(),
            output_dir: page_output_dir(url, &options.output_dir)?,
            url: source.url,
            base_url: dom.base_href(),
            title: dom.title().unwrap_or_default(),
            html: source.html,
            html_cached: source.cached,
            state,
            links: Vec::new(),
        };

        debug!("Visit page: {}", page.url);
        if page.url != page.key {
            debug!("Redirected from: {}", page.key);
        }
        if let Some(base_url) = &page.base_url {
            debug!("Base URL: {}", base_url);
        }
        debug!("Title: {}", page.title);
        debug!("Output directory: {}", page.output_dir.display());

        let handlers: Vec<&Arc<dyn Handler>> = self
            .handlers
            .iter()
            .filter(|h| h.matches(&page.url, options))
            .collect();
        if handlers.is_empty() {
            debug!("No handler: {}", page.url);
        }

        for handler in handlers {
            debug!("Handler: {}", handler.name());
            if let Err(source) = handler.dispatch(self, &mut dom, &mut page, options).await {
                state.transition(PageState::Failed)?;
                return Err(MirrorError::Handler {
                    name: handler.name().to_string(),
                    source,
                });
            }
        }

        page.state = state.transition(PageState::Visited)?;
        Ok(page)
    }

    // ===== Extraction =====

    /// Extracts the followable links of a page
    ///
    /// Without an explicit `visited_links` set, `exclude_visited_links` checks
    /// the state store.
    pub fn get_links(&self, dom: &Dom, page: &Page, options: &LinkOptions) -> Result<Vec<String>> {
        let resolver = page.resolver()?;
        get_links(dom, &resolver, options, |link| self.is_visited(link))
    }

    // ===== Downloads =====

    /// Downloads the images of a page into its output directory
    ///
    /// The image list is recorded with `done: false` before the batch and with
    /// `done: true` (and each image's outcome) after it; the second update is
    /// persisted. Images already on disk are not downloaded again.
    pub async fn save_images(
        &self,
        page: &Page,
        images: &mut [ImageRef],
        options: &CrawlOptions,
    ) -> Result<()> {
        let snapshot = serde_json::to_value(&*images).map_err(StorageError::from)?;
        self.update_state(
            &page.key,
            json!({ "images": snapshot, "done": false, "last_update": Utc::now() }),
            false,
        )?;

        let batch = BatchOptions {
            output_dir: Some(page.output_dir.clone()),
            max_download_threads: options.max_download_threads,
            download: DownloadOptions {
                skip_if_exist: true,
                ..options.download.clone()
            },
        };
        self.downloader.download_images(images, &batch).await?;

        let failed = images.iter().filter(|i| i.is_failed()).count();
        if failed > 0 {
            warn!("{} of {} images failed for {}", failed, images.len(), page.url);
        }

        let snapshot = serde_json::to_value(&*images).map_err(StorageError::from)?;
        self.update_state(
            &page.key,
            json!({ "images": snapshot, "done": true, "last_update": Utc::now() }),
            true,
        )
    }

    // ===== HTML files =====

    /// Writes the page HTML to its `index.html`
    ///
    /// The file is placed by the requested URL, so the next run finds it in
    /// the cache even when the page was redirected.
    pub async fn save_html(&self, page: &Page, html: &str, options: &CrawlOptions) -> Result<()> {
        let path = index_html_path(&page.key, options)?;
        save_html(&path, html).await
    }
}

/// Reads a saved HTML file
///
/// Returns `None` when the file is missing, unreadable or empty.
pub async fn load_html(path: &Path) -> Option<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(html) if !html.is_empty() => Some(html),
        Ok(_) => None,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!("Could not read {}: {}", path.display(), e);
            }
            None
        }
    }
}

/// Writes an HTML file, creating its directory
pub async fn save_html(path: &Path, html: &str) -> Result<()> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    tokio::fs::write(path, html).await?;
    debug!("Saved {}", path.display());
    Ok(())
}
