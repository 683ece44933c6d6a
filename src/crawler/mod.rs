//! Crawler module for page processing and mirroring
//!
//! This module contains the core mirroring logic, including:
//! - A DOM wrapper with attribute rewriting and serialization
//! - Link and image extraction and rewriting
//! - The page processor ([`Saver`]) and its handler plugins
//! - The built-in [`MirrorHandler`]
//! - Single-page scraping
//! - The crawl driver ([`Coordinator`])

mod coordinator;
mod dom;
mod extract;
mod handler;
mod mirror;
mod options;
mod page;
mod saver;
mod scrape;

pub use coordinator::{run_crawl, Coordinator, CrawlReport, FailedPage};
pub use dom::Dom;
pub use extract::{fix_images, fix_links, get_images, get_links, localize_images, UniqueNames};
pub use handler::Handler;
pub use mirror::MirrorHandler;
pub use options::{
    CrawlOptions, ImageOptions, LinkEditor, LinkOptions, LinkValidator, DEFAULT_PAGE_DELAY,
};
pub use page::{index_html_path, numbered_file_name, page_output_dir, unique_file_path, Page};
pub use saver::{load_html, save_html, PageSource, Saver};
pub use scrape::{
    scrape, OpenGraph, PageInfo, ScrapeOptions, ScrapedImage, ScrapedLink, Scraper,
};
