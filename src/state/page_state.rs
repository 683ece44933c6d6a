/// Page state definitions for one page visit
///
/// This module defines every state a page can be in while the page processor
/// works on it, and which transitions between them are legal.
use crate::MirrorError;
use std::fmt;

/// Represents the current state of a page within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageState {
    // ===== Active States =====
    /// Page has not been requested in this run
    Unvisited,

    /// Page HTML is being loaded from cache or network
    Fetching,

    /// Page HTML was loaded from the local mirror
    Cached,

    /// Page HTML was downloaded
    Downloaded,

    // ===== Terminal States =====
    /// Page was processed and every handler succeeded
    Visited,

    /// Fetching or a handler failed; the page is still marked visited
    Failed,
}

impl PageState {
    /// Returns true if this is a terminal state for the run
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Visited | Self::Failed)
    }

    /// Returns true if the page HTML is available
    pub fn has_html(&self) -> bool {
        matches!(self, Self::Cached | Self::Downloaded)
    }

    /// Returns true if this represents a successful completion
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Visited)
    }

    /// Returns true if moving from `self` to `next` is allowed
    pub fn can_transition_to(&self, next: PageState) -> bool {
        use PageState::*;

        matches!(
            (self, next),
            (Unvisited, Fetching)
                | (Fetching, Cached)
                | (Fetching, Downloaded)
                | (Fetching, Failed)
                | (Cached, Visited)
                | (Cached, Failed)
                | (Downloaded, Visited)
                | (Downloaded, Failed)
        )
    }

    /// Moves to the next state
    ///
    /// # Returns
    ///
    /// * `Ok(PageState)` - The new state
    /// * `Err(MirrorError::InvalidTransition)` - The transition is not allowed
    pub fn transition(self, next: PageState) -> Result<PageState, MirrorError> {
        if self.can_transition_to(next) {
            tracing::trace!("Page state {} -> {}", self, next);
            Ok(next)
        } else {
            Err(MirrorError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    /// Short lowercase name, used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unvisited => "unvisited",
            Self::Fetching => "fetching",
            Self::Cached => "cached",
            Self::Downloaded => "downloaded",
            Self::Visited => "visited",
            Self::Failed => "failed",
        }
    }
}

impl Default for PageState {
    fn default() -> Self {
        Self::Unvisited
    }
}

impl fmt::Display for PageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
