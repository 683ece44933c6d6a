//! Storage module for persisting crawl state
//!
//! This module owns the per-URL crawl records:
//! - `StateStore` trait with get/set/update/push/delete key operations
//! - JSON document backend, loaded once and overwritten wholesale on save
//! - Typed views (`CrawlRecord`, `ImageRef`) over the stored values
//! - Idempotent shutdown persistence

mod json;
mod traits;

pub use json::{merge_value, JsonStateStore};
pub use traits::{StateStore, StorageError, StorageResult};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::path::Path;

/// Default file name of the state document inside the output directory
pub const DEFAULT_STATE_FILE_NAME: &str = "saver.json";

/// Opens the state store for an output directory
///
/// The state file is `{output_dir}/{state_file_name}`. A missing or unreadable
/// file yields an empty store.
pub fn open_store(output_dir: &Path, state_file_name: &str) -> JsonStateStore {
    JsonStateStore::open(output_dir.join(state_file_name))
}

/// Persisted visit/progress entry for one URL
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrawlRecord {
    #[serde(default, deserialize_with = "flag")]
    pub visited: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_visited: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageRef>,

    #[serde(default, deserialize_with = "flag")]
    pub done: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<DateTime<Utc>>,
}

/// An image found on a page, and where it is stored locally
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    /// Absolute image URL
    pub src: String,

    /// File name, unique within the page's output directory
    pub file: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<bool>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "code"
    )]
    pub error_code: Option<String>,
}

impl ImageRef {
    /// Creates an image reference without error markers
    pub fn new(src: impl Into<String>, file: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            file: file.into(),
            ..Default::default()
        }
    }

    /// Returns true if the last download attempt for this image failed
    pub fn is_failed(&self) -> bool {
        self.error.unwrap_or(false)
    }
}

/// Accepts `true`/`false` as well as the numeric flags older state files contain
fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_f64().map_or(false, |n| n != 0.0),
        _ => false,
    })
}

/// Error codes are either numeric HTTP statuses or symbolic network codes
fn code<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    })
}
