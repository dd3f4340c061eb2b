//! The process data model: one node of a game's executable work tree.
//!
//! A process owns an ordered cursor into a step sequence supplied by the
//! scenario contract (looked up by `kind`), scratch payload, and ids of its
//! child sub-processes. The arena holding all processes lives on the game;
//! this module only defines the node itself and stays free of side effects.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::types::{PlayerId, ProcessId};

/// One steppable unit of scenario logic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Process {
    pub id: ProcessId,
    /// Human-readable name, unique among siblings.
    pub name: String,
    /// Selects the step table from the scenario contract.
    pub kind: String,
    pub parent: Option<ProcessId>,
    /// Continuation: where `curr` goes when this process exits. Initialized
    /// to the parent at creation; orchestration rewires it to chain siblings.
    pub nxt: Option<ProcessId>,
    /// Exclusively owned sub-processes, in creation order.
    pub children: Vec<ProcessId>,
    /// Local scratch space, merged into the parent on propagate-up.
    pub payload: BTreeMap<String, Value>,
    /// Cursor into the step sequence; advances by at most one per run.
    pub step: usize,
    /// Set once the sequence is exhausted inside a concurrent batch.
    pub locked: bool,
    /// Participant this process acts for, if any.
    pub owner: Option<PlayerId>,
}

impl Process {
    pub(crate) fn new(
        id: ProcessId,
        kind: impl Into<String>,
        name: impl Into<String>,
        parent: Option<ProcessId>,
        owner: Option<PlayerId>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            kind: kind.into(),
            parent,
            nxt: parent,
            children: Vec::new(),
            payload: BTreeMap::new(),
            step: 0,
            locked: false,
            owner,
        }
    }

    /// Whether the step cursor has moved past the end of a sequence of
    /// `sequence_len` steps.
    pub fn is_exhausted(&self, sequence_len: usize) -> bool {
        self.step >= sequence_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_process_points_its_continuation_at_the_parent() {
        let parent = ProcessId(0);
        let proc = Process::new(ProcessId(1), "vote", "vote_1", Some(parent), Some(PlayerId(1)));
        assert_eq!(proc.nxt, Some(parent));
        assert_eq!(proc.step, 0);
        assert!(!proc.locked);
    }

    #[test]
    fn exhaustion_tracks_the_cursor() {
        let mut proc = Process::new(ProcessId(1), "vote", "vote_1", None, None);
        assert!(proc.is_exhausted(0));
        assert!(!proc.is_exhausted(2));
        proc.step = 2;
        assert!(proc.is_exhausted(2));
    }
}
