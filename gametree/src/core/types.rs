//! Shared deterministic types for the engine core.
//!
//! These types define stable contracts between the engine, the sampler, and
//! the io layer. They should not depend on external state or I/O and must
//! remain deterministic across runs.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::decision::DecisionError;

/// Identifier of a process inside one game's arena. Dense, game-local.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProcessId(pub u32);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// Identifier of a scenario participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PlayerId(pub u32);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a sampler tree node. Also the key under which the node's
/// game snapshot lives in the snapshot store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn random() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of one game instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameStatus {
    /// Actively stepping.
    Playing,
    /// Suspended at a checkpoint boundary, waiting for the sampler.
    Paused,
    /// Reloaded from a snapshot; the next checkpoint runs its body.
    Resumed,
    /// Terminated; `result` is final.
    Finished,
}

/// Whether a tree node may still be selected as a branch point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BranchStatus {
    Branchable,
    Unbranchable,
    Branched,
}

/// How far the node's game has been driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlayStatus {
    Unplayed,
    Played,
    Finished,
}

/// One accepted decision, as recorded on the owning tree node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    /// Label of the process step that asked for the decision.
    pub step: String,
    /// Deciding participant, if the step acts for one.
    pub player: Option<PlayerId>,
    /// Rendered transcript that was sent to the decision maker.
    pub prompt: String,
    /// Reasoning trace returned by the decision maker.
    pub reasoning: String,
    /// Raw combined output text.
    pub output: String,
}

/// Fatal and retryable failures of the engine core.
///
/// `Invariant` marks programming errors (duplicate sub-process name, unknown
/// step table, an unlocked participant after a concurrent join). They abort
/// the current rollout and are never retried. Decision-maker failures carry
/// their own taxonomy in [`DecisionError`].
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invariant violated: {0}")]
    Invariant(String),
    #[error(transparent)]
    Decision(#[from] DecisionError),
    #[error("snapshot codec: {0}")]
    Snapshot(#[from] serde_json::Error),
    #[error("telemetry sink: {0}")]
    Telemetry(#[from] std::io::Error),
}

impl EngineError {
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::Invariant(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_are_unique_and_round_trip() {
        let a = NodeId::random();
        let b = NodeId::random();
        assert_ne!(a, b);

        let json = serde_json::to_string(&a).expect("serialize");
        let back: NodeId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(a, back);
    }

    #[test]
    fn statuses_serialize_screaming_snake() {
        let json = serde_json::to_string(&BranchStatus::Branchable).expect("serialize");
        assert_eq!(json, "\"BRANCHABLE\"");
        let json = serde_json::to_string(&GameStatus::Paused).expect("serialize");
        assert_eq!(json, "\"PAUSED\"");
        let json = serde_json::to_string(&PlayStatus::Unplayed).expect("serialize");
        assert_eq!(json, "\"UNPLAYED\"");
    }
}
