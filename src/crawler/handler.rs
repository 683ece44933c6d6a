//! Page handler contract
//!
//! Handlers are registered on a [`Saver`] and run for every processed page
//! whose URL they match, one after another in registration order. A later
//! handler sees the DOM and page changes made by earlier ones.

use crate::crawler::{CrawlOptions, Dom, Page, Saver};
use futures::future::LocalBoxFuture;

/// A plugin invoked while processing a page
///
/// `dispatch` returns a non-`Send` future because the parsed document is not
/// thread-safe; handlers run on the task that processes the page.
pub trait Handler: Send + Sync {
    /// Name used in logs and errors
    fn name(&self) -> &str;

    /// Returns true if this handler wants to process `url`
    fn matches(&self, url: &str, options: &CrawlOptions) -> bool;

    /// Processes a page
    ///
    /// # Arguments
    ///
    /// * `saver` - Access to downloads and the crawl state
    /// * `dom` - Parsed document; attribute rewrites are kept when the page is saved
    /// * `page` - Page metadata; handlers may fill `links`
    /// * `options` - Options of the current crawl
    fn dispatch<'a>(
        &'a self,
        saver: &'a Saver,
        dom: &'a mut Dom,
        page: &'a mut Page,
        options: &'a CrawlOptions,
    ) -> LocalBoxFuture<'a, anyhow::Result<()>>;
}
