//! URL handling module for Sumi-Mirror
//!
//! This module turns the raw `href`/`src` values found in a page into absolute,
//! canonical URLs, and provides the host helpers used for filtering and for
//! laying out the mirror on disk.

mod domain;
mod normalize;

// Re-export main functions
pub use domain::{extract_domain, host_url, host_with_port};
pub use normalize::{is_valid_link, normalize_link, parse_page_url, LinkResolver};

/// Strips the fragment part of a URL string (everything from the first `#`)
pub fn strip_fragment(url: &str) -> &str {
    match url.find('#') {
        Some(pos) => &url[..pos],
        None => url,
    }
}
