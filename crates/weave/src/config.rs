//! Exploration limits.

use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ExplorerConfig {
    /// Maximum number of transitions taken before giving up.
    pub max_states: Option<usize>,
    /// Maximum trace length.
    pub max_depth: Option<usize>,
    /// Stop at the first violation or deadlock.
    pub stop_at_first: bool,
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            max_states: None,
            max_depth: None,
            stop_at_first: false,
        }
    }
}

impl ExplorerConfig {
    /// Small limits for smoke checks.
    pub fn quick() -> Self {
        Self {
            max_states: Some(10_000),
            max_depth: Some(200),
            stop_at_first: true,
        }
    }

    pub fn with_max_states(mut self, max_states: usize) -> Self {
        self.max_states = Some(max_states);
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = Some(max_depth);
        self
    }

    pub fn with_stop_at_first(mut self, stop: bool) -> Self {
        self.stop_at_first = stop;
        self
    }
}
