use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

/// Where a single item stands within a run.
#[derive(PartialEq, Eq, Clone, Copy, Debug, Deserialize, Serialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    Pending,
    Synced,
    Skipped,
    Error,
}

impl ItemState {
    /// Synced and skipped items both count towards the success tally.
    pub fn is_success(&self) -> bool {
        matches!(self, ItemState::Synced | ItemState::Skipped)
    }
}

/// A task's resumable state, serialized as JSON into its row.
///
/// Two persisted shapes exist: the original flat map from item id to a
/// status string, and the partitioned form that keeps an ordered pending
/// queue so processors that discover new work mid-run (album expansion)
/// can append to it. New processors use the partitioned form; the flat
/// form is still read back for rows written by older runs.
#[derive(PartialEq, Clone, Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Memory {
    Partitioned {
        pending: Vec<String>,
        synced: Vec<String>,
        skipped: Vec<String>,
        error: Vec<String>,
    },
    Flat(BTreeMap<String, String>),
}

impl Default for Memory {
    fn default() -> Self {
        Memory::Partitioned {
            pending: Vec::new(),
            synced: Vec::new(),
            skipped: Vec::new(),
            error: Vec::new(),
        }
    }
}

impl Memory {
    /// Build a partitioned memory from an initial item cohort.
    pub fn with_pending(ids: impl IntoIterator<Item = String>) -> Self {
        let mut memory = Memory::default();
        for id in ids {
            memory.push_pending(id);
        }
        memory
    }

    /// Pop the next pending item, deduplicating against items that already
    /// reached a terminal state in an earlier run.
    pub fn pop_pending(&mut self) -> Option<String> {
        match self {
            Memory::Partitioned {
                pending,
                synced,
                skipped,
                error,
            } => {
                while !pending.is_empty() {
                    let id = pending.remove(0);
                    // drop later duplicates of the same id
                    pending.retain(|p| p != &id);
                    let seen = synced.contains(&id)
                        || skipped.contains(&id)
                        || error.contains(&id);
                    if !seen {
                        return Some(id);
                    }
                }
                None
            }
            Memory::Flat(map) => {
                let id = map
                    .iter()
                    .find(|(_, state)| state.as_str() == "pending")
                    .map(|(id, _)| id.clone())?;
                map.remove(&id);
                Some(id)
            }
        }
    }

    /// Append an item to the pending queue unless it is already known in
    /// any partition.
    pub fn push_pending(&mut self, id: String) {
        match self {
            Memory::Partitioned {
                pending,
                synced,
                skipped,
                error,
            } => {
                let seen = pending.contains(&id)
                    || synced.contains(&id)
                    || skipped.contains(&id)
                    || error.contains(&id);
                if !seen {
                    pending.push(id);
                }
            }
            Memory::Flat(map) => {
                map.entry(id).or_insert_with(|| "pending".to_string());
            }
        }
    }

    /// Record a terminal state for an item, superseding any earlier state.
    pub fn mark(&mut self, id: &str, state: ItemState) {
        match self {
            Memory::Partitioned {
                synced,
                skipped,
                error,
                ..
            } => {
                if state == ItemState::Pending {
                    return;
                }
                synced.retain(|s| s != id);
                skipped.retain(|s| s != id);
                error.retain(|s| s != id);
                let partition = match state {
                    ItemState::Synced => synced,
                    ItemState::Skipped => skipped,
                    ItemState::Error => error,
                    ItemState::Pending => return,
                };
                partition.push(id.to_string());
            }
            Memory::Flat(map) => {
                let word = match state {
                    ItemState::Pending => "pending",
                    ItemState::Synced => "synced",
                    ItemState::Skipped => "skipped",
                    ItemState::Error => "error",
                };
                map.insert(id.to_string(), word.to_string());
            }
        }
    }

    /// The set of items already settled (synced or skipped), used to make
    /// re-runs idempotent.
    pub fn settled(&self) -> HashSet<String> {
        match self {
            Memory::Partitioned {
                synced, skipped, ..
            } => synced.iter().chain(skipped.iter()).cloned().collect(),
            Memory::Flat(map) => map
                .iter()
                .filter(|(_, state)| matches!(state.as_str(), "synced" | "skipped"))
                .map(|(id, _)| id.clone())
                .collect(),
        }
    }

    /// `(success, failed)` counts over terminal items.
    pub fn tally(&self) -> (u32, u32) {
        match self {
            Memory::Partitioned {
                synced,
                skipped,
                error,
                ..
            } => ((synced.len() + skipped.len()) as u32, error.len() as u32),
            Memory::Flat(map) => {
                let success = map
                    .values()
                    .filter(|s| matches!(s.as_str(), "synced" | "skipped"))
                    .count();
                let failed = map.values().filter(|s| s.as_str() == "error").count();
                (success as u32, failed as u32)
            }
        }
    }

    pub fn pending_len(&self) -> usize {
        match self {
            Memory::Partitioned { pending, .. } => pending.len(),
            Memory::Flat(map) => map.values().filter(|s| s.as_str() == "pending").count(),
        }
    }
}

/// Terminal status of a scheduled task derived from its memory tally.
pub fn terminal_status(success: u32, failed: u32) -> &'static str {
    match (success, failed) {
        (_, 0) => "completed",
        (0, _) => "failed",
        _ => "partially_completed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pop_deduplicates_pending() {
        let mut memory = Memory::with_pending(
            ["a", "b", "a", "c", "b"].into_iter().map(String::from),
        );
        let mut order = Vec::new();
        while let Some(id) = memory.pop_pending() {
            order.push(id);
        }
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn settled_items_are_not_requeued() {
        let mut memory = Memory::default();
        memory.mark("a", ItemState::Synced);
        memory.push_pending("a".to_string());
        assert_eq!(memory.pop_pending(), None);
    }

    #[test]
    fn tally_counts_terminal_states() {
        let mut memory = Memory::with_pending(["a", "b", "c"].into_iter().map(String::from));
        while let Some(id) = memory.pop_pending() {
            match id.as_str() {
                "a" => memory.mark(&id, ItemState::Synced),
                "b" => memory.mark(&id, ItemState::Skipped),
                _ => memory.mark(&id, ItemState::Error),
            }
        }
        assert_eq!(memory.tally(), (2, 1));
    }

    #[test]
    fn flat_form_still_deserializes() {
        let json = r#"{"msg-1":"synced","msg-2":"pending","msg-3":"error"}"#;
        let mut memory: Memory = serde_json::from_str(json).unwrap();
        assert_eq!(memory.tally(), (1, 1));
        assert_eq!(memory.pop_pending(), Some("msg-2".to_string()));
    }

    #[test]
    fn partitioned_form_roundtrips() {
        let mut memory = Memory::with_pending(["x", "y"].into_iter().map(String::from));
        memory.pop_pending();
        memory.mark("x", ItemState::Synced);
        let json = serde_json::to_string(&memory).unwrap();
        let back: Memory = serde_json::from_str(&json).unwrap();
        assert_eq!(back, memory);
    }

    #[test]
    fn terminal_status_tally() {
        assert_eq!(terminal_status(3, 0), "completed");
        assert_eq!(terminal_status(0, 0), "completed");
        assert_eq!(terminal_status(0, 4), "failed");
        assert_eq!(terminal_status(3, 2), "partially_completed");
    }
}
