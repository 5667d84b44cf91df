pub mod codec;
pub mod context;
pub mod enforcer;
pub mod errors;
pub mod matcher;
pub mod repository;
pub mod sanitize;
pub mod types;
pub mod web;

use chrono::{DateTime, Utc};
use matcher::RoleGraph;
use types::PolicyRule;

/// Fully compiled authorization state. Immutable after construction —
/// `Enforcer::reload` builds a replacement and swaps it in atomically.
#[derive(Debug)]
pub struct PolicySnapshot {
    /// Permission (`p`) rules in store order
    pub rules: Vec<PolicyRule>,
    /// Role membership graph from the `g` rules
    pub roles: RoleGraph,
    /// When this snapshot was built
    pub loaded_at: DateTime<Utc>,
}

impl PolicySnapshot {
    pub fn empty() -> Self {
        Self {
            rules: Vec::new(),
            roles: RoleGraph::new(),
            loaded_at: Utc::now(),
        }
    }

    /// Loaded rules: permission rules plus role-graph edges.
    pub fn policy_count(&self) -> usize {
        self.rules.len() + self.roles.edge_count()
    }
}
