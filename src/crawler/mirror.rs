//! Built-in handler that mirrors a page

use crate::crawler::{
    fix_links, get_images, localize_images, CrawlOptions, Dom, Handler, Page, Saver,
};
use crate::url::host_with_port;
use futures::future::{FutureExt, LocalBoxFuture};
use tracing::debug;

/// Mirrors every page it is dispatched to
///
/// 1. Extracts the page images and downloads them next to the page
/// 2. Points `<img src>` at the local files
/// 3. Collects followable links into `Page::links` (same host unless
///    `filter_host` says otherwise)
/// 4. Rewrites links to absolute URLs
/// 5. Saves the rewritten document as the page's `index.html`
///
/// For a cached page that already has an image list in the crawl state, that
/// list is reused since the cached HTML points at local files.
#[derive(Debug, Clone, Copy, Default)]
pub struct MirrorHandler;

impl Handler for MirrorHandler {
    fn name(&self) -> &str {
        "mirror"
    }

    fn matches(&self, _url: &str, _options: &CrawlOptions) -> bool {
        true
    }

    fn dispatch<'a>(
        &'a self,
        saver: &'a Saver,
        dom: &'a mut Dom,
        page: &'a mut Page,
        options: &'a CrawlOptions,
    ) -> LocalBoxFuture<'a, anyhow::Result<()>> {
        async move {
            let resolver = page.resolver()?;

            let recorded = if page.html_cached {
                saver
                    .record(&page.key)
                    .map(|record| record.images)
                    .filter(|images| !images.is_empty())
            } else {
                None
            };
            let mut images = match recorded {
                Some(images) => images,
                None => get_images(dom, &resolver, &options.images)?,
            };
            debug!("{} images on {}", images.len(), page.url);

            saver.save_images(page, &mut images, options).await?;
            localize_images(dom, &resolver, &options.images.selector, &images)?;

            if options.follow_links {
                let mut link_options = options.links.clone();
                if link_options.filter_host.is_none() {
                    link_options.filter_host = host_with_port(resolver.page());
                }
                page.links = saver.get_links(dom, page, &link_options)?;
                debug!("{} links on {}", page.links.len(), page.url);
            }

            fix_links(
                dom,
                &resolver,
                &options.links.selector,
                options.links.link_editor.as_ref(),
            )?;

            saver.save_html(page, &dom.html(), options).await?;
            Ok(())
        }
        .boxed_local()
    }
}
