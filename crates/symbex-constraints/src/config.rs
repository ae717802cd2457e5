//! Solver configuration.

use serde::{Deserialize, Serialize};

/// Tunables for the constraint core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstraintsConfig {
    /// Candidate types examined per equivalence class during model
    /// verification before reporting `Undecided`.
    pub type_query_budget: usize,
}

impl Default for ConstraintsConfig {
    fn default() -> Self {
        ConstraintsConfig {
            type_query_budget: 64,
        }
    }
}
