//! Output module for crawl statistics
//!
//! This module reads the persisted crawl state and summarizes it:
//! - Page progress (visited, done, pending)
//! - Image downloads and their failures, grouped by error code
//! - Hosts seen in the state

pub mod stats;

pub use stats::{load_statistics, print_statistics, CrawlStatistics};
