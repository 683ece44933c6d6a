//! State module for tracking page processing
//!
//! A page moves through `Unvisited → Fetching → {Cached | Downloaded} →
//! {Visited | Failed}` during one run. `PageState` validates those transitions
//! so the page processor cannot skip or repeat a step.

mod page_state;

// Re-export main types
pub use page_state::PageState;
