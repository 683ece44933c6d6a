//! Statistics generation from the crawl state
//!
//! This module provides functionality for extracting and displaying
//! crawl statistics from the state store.

use crate::storage::{CrawlRecord, StateStore};
use crate::url::extract_domain;
use std::collections::{BTreeMap, BTreeSet};
use url::Url;

/// Crawl statistics summary
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrawlStatistics {
    /// Number of URL records in the state
    pub total_records: u64,

    /// Records marked visited
    pub visited: u64,

    /// Records whose page work is complete
    pub done: u64,

    /// Visited records that are not done (failed or interrupted pages)
    pub pending: u64,

    /// Images listed across all records
    pub total_images: u64,

    /// Images whose last download failed
    pub failed_images: u64,

    /// Failed images by error code (`"404"`, `"ETIMEDOUT"`, ...)
    pub error_summary: BTreeMap<String, u64>,

    /// Hosts of the recorded URLs
    pub domains: BTreeSet<String>,

    /// State entries that are not crawl records
    pub other_entries: u64,
}

/// Loads statistics from a state store
///
/// # Arguments
///
/// * `store` - The state store to summarize
///
/// # Returns
///
/// The statistics over every entry of the store. Entries that do not hold a
/// crawl record are only counted in `other_entries`.
pub fn load_statistics(store: &dyn StateStore) -> CrawlStatistics {
    let mut stats = CrawlStatistics::default();

    for (key, value) in store.entries() {
        let record = match serde_json::from_value::<CrawlRecord>(value.clone()) {
            Ok(record) if value.is_object() => record,
            _ => {
                stats.other_entries += 1;
                continue;
            }
        };

        stats.total_records += 1;
        if record.visited {
            stats.visited += 1;
        }
        if record.done {
            stats.done += 1;
        } else if record.visited {
            stats.pending += 1;
        }

        if let Some(domain) = Url::parse(key).ok().as_ref().and_then(extract_domain) {
            stats.domains.insert(domain);
        }

        stats.total_images += record.images.len() as u64;
        for image in record.images.iter().filter(|i| i.is_failed()) {
            stats.failed_images += 1;
            let code = image.error_code.clone().unwrap_or_else(|| "unknown".to_string());
            *stats.error_summary.entry(code).or_insert(0) += 1;
        }
    }

    stats
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &CrawlStatistics) {
    println!("=== Crawl Statistics ===\n");

    println!("Overview:");
    println!("  Recorded pages: {}", stats.total_records);
    println!("  Unique domains: {}", stats.domains.len());
    println!("  Images: {}", stats.total_images);
    if stats.other_entries > 0 {
        println!("  Other state entries: {}", stats.other_entries);
    }
    println!();

    println!("Pages:");
    for (label, count) in [
        ("Visited", stats.visited),
        ("Done", stats.done),
        ("Pending", stats.pending),
    ] {
        println!(
            "  {}: {} ({:.1}%)",
            label,
            count,
            percentage(count, stats.total_records)
        );
    }
    println!();

    if !stats.error_summary.is_empty() {
        println!("Image Errors:");
        let mut error_counts: Vec<_> = stats.error_summary.iter().collect();
        error_counts.sort_by(|a, b| b.1.cmp(a.1));

        for (code, count) in error_counts {
            println!("  {}: {}", code, count);
        }
        println!();
    }

    println!(
        "Image Success Rate: {:.1}% ({} / {} images downloaded)",
        percentage(stats.total_images - stats.failed_images, stats.total_images),
        stats.total_images - stats.failed_images,
        stats.total_images
    );
}

fn percentage(count: u64, total: u64) -> f64 {
    if total > 0 {
        (count as f64 / total as f64) * 100.0
    } else {
        0.0
    }
}
