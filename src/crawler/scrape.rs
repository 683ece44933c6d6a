//! Single-page metadata extraction
//!
//! Scrape mode fetches one page and reports what it is about (title,
//! description, icon, Open Graph data, optionally images and links) without
//! crawling or saving anything.

use crate::crawler::{fix_images, fix_links, Dom};
use crate::download::{DownloadOptions, Downloader};
use crate::url::{is_valid_link, strip_fragment, LinkResolver};
use crate::Result;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Open Graph metadata of a page
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OpenGraph {
    pub url: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScrapedImage {
    pub src: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScrapedLink {
    pub url: String,
    pub title: String,
}

/// What scrape mode knows about a page
#[derive(Debug, Clone, Default, Serialize)]
pub struct PageInfo {
    /// Page URL after redirects
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub og: Option<OpenGraph>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html_body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<ScrapedImage>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub links: Option<Vec<ScrapedLink>>,
}

/// What to include in a [`PageInfo`]
#[derive(Debug, Clone, Default)]
pub struct ScrapeOptions {
    /// Raw page HTML
    pub include_html: bool,
    /// The `<body>` element, serialized
    pub include_html_body: bool,
    /// Contents of `<body>`
    pub include_body: bool,
    pub include_images: bool,
    pub include_links: bool,
    pub include_og: bool,
    /// Links containing any of these substrings are dropped
    pub link_blacklist: Vec<String>,
    /// Links must contain every one of these substrings
    pub link_filters: Vec<String>,
    pub download: DownloadOptions,
}

/// A plugin that adds site-specific data to a [`PageInfo`]
pub trait Scraper: Send + Sync {
    fn name(&self) -> &str;

    fn matches(&self, url: &str, options: &ScrapeOptions) -> bool;

    fn scrape(&self, dom: &Dom, info: &mut PageInfo, options: &ScrapeOptions);
}

fn single_line(text: &str) -> String {
    text.replace(['\r', '\n'], "")
}

/// Fetches a page and extracts its metadata
///
/// Matching scrapers run in order after the built-in extraction.
pub async fn scrape(
    downloader: &Downloader,
    url: &str,
    options: &ScrapeOptions,
    scrapers: &[Arc<dyn Scraper>],
) -> Result<PageInfo> {
    let fetched = downloader.download_page(url, &options.download).await?;
    debug!("Scrape page: {}", fetched.resolved_url);

    let mut info = PageInfo {
        url: fetched.resolved_url,
        content_type: fetched.content_type,
        ..Default::default()
    };

    let mut dom = Dom::parse(&fetched.html);
    info.base_url = dom.base_href();

    if options.include_html {
        info.html = Some(fetched.html);
    }

    info.icon = dom
        .first_attr(r#"link[rel="shortcut icon"]"#, "href")
        .or_else(|| dom.first_attr(r#"link[rel="icon"]"#, "href"));
    info.title = dom.title();
    info.description = dom
        .first_attr("meta[name*=description]", "content")
        .map(|d| single_line(&d));

    let resolver = LinkResolver::new(&info.url, info.base_url.as_deref())?;
    fix_images(&mut dom, &resolver, "html")?;
    fix_links(&mut dom, &resolver, "body", None)?;

    if options.include_html_body {
        info.html_body = dom
            .inner_html("body")
            .map(|inner| format!("<body>{}</body>", inner));
    }

    if options.include_images {
        info.images = Some(scraped_images(&dom)?);
    }

    if options.include_links {
        info.links = Some(scraped_links(&dom, options)?);
    }

    if options.include_body {
        info.body = dom.inner_html("body");
    }

    let og = OpenGraph {
        url: dom.first_attr(r#"meta[property="og:url"]"#, "content"),
        kind: dom.first_attr(r#"meta[property="og:type"]"#, "content"),
        title: dom.first_attr(r#"meta[property="og:title"]"#, "content"),
        description: dom.first_attr(r#"meta[property="og:description"]"#, "content"),
        image: dom.first_attr(r#"meta[property="og:image"]"#, "content"),
    };

    if info.image.as_deref().map_or(true, str::is_empty) {
        info.image = og.image.clone();
    }
    if info.description.as_deref().map_or(true, str::is_empty) {
        if let Some(description) = og.description.as_deref().filter(|d| !d.is_empty()) {
            info.description = Some(single_line(description));
        }
    }
    if options.include_og {
        info.og = Some(og);
    }

    let page_url = info.url.clone();
    for scraper in scrapers.iter().filter(|s| s.matches(&page_url, options)) {
        debug!("Scraper: {}", scraper.name());
        scraper.scrape(&dom, &mut info, options);
    }

    Ok(info)
}

fn scraped_images(dom: &Dom) -> Result<Vec<ScrapedImage>> {
    let mut seen = HashSet::new();
    let mut images = Vec::new();
    for id in dom.select("img")? {
        let Some(src) = dom.attr(id, "src") else {
            continue;
        };
        if !is_valid_link(src) || !seen.insert(src.to_string()) {
            continue;
        }
        images.push(ScrapedImage {
            src: src.to_string(),
            alt: dom.attr(id, "alt").map(str::to_string),
        });
    }
    Ok(images)
}

fn scraped_links(dom: &Dom, options: &ScrapeOptions) -> Result<Vec<ScrapedLink>> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for id in dom.select("body a")? {
        let Some(href) = dom.attr(id, "href") else {
            continue;
        };
        if !is_valid_link(href) {
            continue;
        }
        let url = strip_fragment(href);

        if options.link_blacklist.iter().any(|b| url.contains(b.as_str())) {
            continue;
        }
        if !options.link_filters.iter().all(|f| url.contains(f.as_str())) {
            continue;
        }
        if !seen.insert(url.to_string()) {
            continue;
        }
        links.push(ScrapedLink {
            url: url.to_string(),
            title: dom.text(id).trim().to_string(),
        });
    }
    Ok(links)
}
