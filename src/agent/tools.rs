//! Tool identity resolution
//!
//! The upstream reports the same tool call twice (streaming partial, then
//! inside the final assistant message), and sub-agents may reuse ids the
//! top-level agent already used. `ToolCallRecord` namespaces ids by the
//! active parent agent and remembers what was already announced.

use std::collections::{HashMap, HashSet};

/// Outcome of resolving a tool start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartResolution {
    pub composite_id: String,
    pub is_duplicate: bool,
}

/// Per-turn tool bookkeeping
#[derive(Debug, Default)]
pub struct ToolCallRecord {
    emitted: HashSet<String>,
    original_to_composite: HashMap<String, String>,
    names: HashMap<String, String>,
    current_parent: Option<String>,
}

impl ToolCallRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the active parent agent. Last value wins; there is no stack.
    pub fn update_parent(&mut self, parent: Option<String>) {
        if self.current_parent != parent {
            tracing::debug!(from = ?self.current_parent, to = ?parent, "Active parent changed");
        }
        self.current_parent = parent;
    }

    /// Composite id for `original_id` under the active parent
    pub fn composite_id(&self, original_id: &str) -> String {
        match &self.current_parent {
            Some(parent) => format!("{}:{}", parent, original_id),
            None => original_id.to_string(),
        }
    }

    /// Register a tool start, reporting whether it was already announced
    pub fn resolve_for_start(&mut self, original_id: &str, name: &str) -> StartResolution {
        let composite_id = self.composite_id(original_id);
        if self.emitted.contains(&composite_id) {
            return StartResolution {
                composite_id,
                is_duplicate: true,
            };
        }

        self.emitted.insert(composite_id.clone());
        self.original_to_composite
            .insert(original_id.to_string(), composite_id.clone());
        self.names.insert(composite_id.clone(), name.to_string());

        StartResolution {
            composite_id,
            is_duplicate: false,
        }
    }

    /// Find the composite id a tool result belongs to.
    ///
    /// The id formed under the active parent wins when it was announced;
    /// otherwise the last start seen for `original_id`; otherwise the
    /// original id itself.
    pub fn resolve_for_result(&self, original_id: &str) -> String {
        let under_parent = self.composite_id(original_id);
        if self.emitted.contains(&under_parent) {
            return under_parent;
        }
        match self.original_to_composite.get(original_id) {
            Some(composite) => composite.clone(),
            None => {
                tracing::debug!(tool_use_id = original_id, "Tool result for unknown tool call");
                original_id.to_string()
            }
        }
    }

    /// Name recorded when `composite_id` was started
    pub fn tool_name(&self, composite_id: &str) -> Option<&str> {
        self.names.get(composite_id).map(String::as_str)
    }

    pub fn emitted_count(&self) -> usize {
        self.emitted.len()
    }
}
