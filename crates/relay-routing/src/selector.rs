//! Binding selection policies.

use parking_lot::Mutex;
use relay_core::Binding;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How a logical name with multiple bindings is narrowed to one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionPolicy {
    /// First binding in registration order.
    #[default]
    First,
    /// Rotate through the bindings; the cursor is per logical name.
    RoundRobin,
    /// Lowest combined per-1K price; ties break by registration order.
    Cheapest,
}

/// Applies a [`SelectionPolicy`] over ordered binding lists.
pub struct Selector {
    policy: SelectionPolicy,
    cursors: Mutex<HashMap<String, usize>>,
}

impl Selector {
    /// Create a selector for the given policy.
    #[must_use]
    pub fn new(policy: SelectionPolicy) -> Self {
        Self {
            policy,
            cursors: Mutex::new(HashMap::new()),
        }
    }

    /// The configured policy.
    #[must_use]
    pub fn policy(&self) -> SelectionPolicy {
        self.policy
    }

    /// Pick one binding from an ordered, non-empty list.
    #[must_use]
    pub fn select<'a>(&self, logical: &str, bindings: &'a [Binding]) -> Option<&'a Binding> {
        if bindings.is_empty() {
            return None;
        }
        match self.policy {
            SelectionPolicy::First => bindings.first(),
            SelectionPolicy::RoundRobin => {
                let mut cursors = self.cursors.lock();
                let cursor = cursors.entry(logical.to_string()).or_insert(0);
                let chosen = &bindings[*cursor % bindings.len()];
                *cursor = cursor.wrapping_add(1);
                Some(chosen)
            }
            SelectionPolicy::Cheapest => bindings.iter().min_by(|a, b| {
                blended_rate(a).total_cmp(&blended_rate(b))
            }),
        }
    }
}

/// Unpriced bindings rank last under the cheapest policy.
fn blended_rate(binding: &Binding) -> f64 {
    binding.price.map_or(f64::INFINITY, |p| p.blended())
}
