//! Storage traits and error types
//!
//! This module defines the key-value interface of the crawl state store and
//! the typed helpers the crawler builds on top of it.

use crate::storage::CrawlRecord;
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to write state file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for crawl state backends
///
/// The store is the single writer of crawl records. Every mutation goes through
/// these key operations; `persist = true` writes the whole document right after
/// the mutation.
pub trait StateStore: Send {
    // ===== Key Operations =====

    /// Gets the value stored under a key
    fn get(&self, key: &str) -> Option<&Value>;

    /// Replaces the value stored under a key
    fn set(&mut self, key: &str, value: Value);

    /// Deep-merges a partial value into the value stored under a key
    ///
    /// Nested objects are merged recursively; any other leaf (including arrays)
    /// replaces the stored leaf. A missing or non-object stored value is replaced.
    fn update(&mut self, key: &str, update: Value, persist: bool) -> StorageResult<()>;

    /// Appends a value to the sequence stored under a key
    ///
    /// An absent key is initialized with an empty sequence first. If the stored
    /// value is not a sequence the append is silently ignored.
    fn push(&mut self, key: &str, value: Value, persist: bool) -> StorageResult<()>;

    /// Removes a key
    fn delete(&mut self, key: &str, persist: bool) -> StorageResult<()>;

    /// Returns the whole in-memory state
    fn entries(&self) -> &Map<String, Value>;

    // ===== Persistence =====

    /// Writes the whole state document
    fn save(&self) -> StorageResult<()>;

    /// Saves once at teardown
    ///
    /// Returns `Ok(true)` when this call performed the save, `Ok(false)` when
    /// shutdown already happened.
    fn shutdown(&mut self) -> StorageResult<bool>;

    // ===== Crawl Records =====

    /// Gets the typed crawl record stored under a URL
    fn record(&self, url: &str) -> Option<CrawlRecord> {
        self.get(url)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// Returns true if the URL has been visited
    fn is_visited(&self, url: &str) -> bool {
        self.record(url).map_or(false, |r| r.visited)
    }

    /// Returns true if all work for the URL has been completed
    fn is_done(&self, url: &str) -> bool {
        self.record(url).map_or(false, |r| r.done)
    }

    /// Marks a URL as visited now
    fn set_visited(&mut self, url: &str) -> StorageResult<()> {
        self.update(
            url,
            json!({ "visited": true, "last_visited": Utc::now() }),
            false,
        )
    }
}
