//! The sampler's node tree: an id-addressed registry of rollout points.
//!
//! A [`GameNode`] is bookkeeping about one point of the exploration tree; the
//! game snapshot it stands for lives in the snapshot store under the node id,
//! never in memory here. The tree itself is a pure structure with no I/O.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::types::{BranchStatus, DecisionRecord, EngineError, NodeId, PlayStatus, PlayerId};

/// One point of the exploration tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameNode {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    /// Child ids in creation order.
    pub children: Vec<NodeId>,
    pub branch_status: BranchStatus,
    pub game_status: PlayStatus,
    /// Outcome metrics accumulated from finished descendants.
    pub result: BTreeMap<String, f64>,
    /// Accepted decisions of the segment this node played.
    pub detail: Vec<DecisionRecord>,
    /// Scenario projection captured when the node was played.
    pub observable_state: Value,
    /// Terminal result, present only on finished leaves.
    pub final_result: Option<BTreeMap<String, f64>>,
    /// Alternate-history snapshots handed over by a concurrent segment.
    /// Consumed immediately by the rollout loop, never persisted.
    #[serde(skip)]
    pub one_old: Vec<(PlayerId, Vec<u8>)>,
}

impl GameNode {
    fn new(id: NodeId, parent: Option<NodeId>) -> Self {
        Self {
            id,
            parent,
            children: Vec::new(),
            branch_status: BranchStatus::Branchable,
            game_status: PlayStatus::Unplayed,
            result: BTreeMap::new(),
            detail: Vec::new(),
            observable_state: Value::Null,
            final_result: None,
            one_old: Vec::new(),
        }
    }
}

/// Id-addressed registry of [`GameNode`]s with a single root.
#[derive(Debug, Default)]
pub struct NodeTree {
    nodes: HashMap<NodeId, GameNode>,
    root: Option<NodeId>,
}

impl NodeTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(&self) -> Option<&NodeId> {
        self.root.as_ref()
    }

    pub fn is_root(&self, id: &NodeId) -> bool {
        self.root.as_ref() == Some(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.keys()
    }

    pub fn get(&self, id: &NodeId) -> Result<&GameNode, EngineError> {
        self.nodes
            .get(id)
            .ok_or_else(|| EngineError::invariant(format!("unknown node {id}")))
    }

    pub fn get_mut(&mut self, id: &NodeId) -> Result<&mut GameNode, EngineError> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| EngineError::invariant(format!("unknown node {id}")))
    }

    /// Install the root node. The tree must be empty.
    pub fn insert_root(&mut self) -> Result<NodeId, EngineError> {
        if self.root.is_some() {
            return Err(EngineError::invariant("tree already has a root"));
        }
        let id = NodeId::random();
        self.nodes.insert(id.clone(), GameNode::new(id.clone(), None));
        self.root = Some(id.clone());
        Ok(id)
    }

    /// Create a fresh node under `parent` and return its id.
    pub fn new_child(&mut self, parent: &NodeId) -> Result<NodeId, EngineError> {
        if !self.contains(parent) {
            return Err(EngineError::invariant(format!("unknown node {parent}")));
        }
        let id = NodeId::random();
        self.nodes
            .insert(id.clone(), GameNode::new(id.clone(), Some(parent.clone())));
        self.get_mut(parent)?.children.push(id.clone());
        Ok(id)
    }

    /// Re-insert a node rebuilt from archived rows. Parents must be inserted
    /// before their children.
    pub fn insert_node(&mut self, node: GameNode) -> Result<(), EngineError> {
        match &node.parent {
            None => {
                if self.root.is_some() {
                    return Err(EngineError::invariant("tree already has a root"));
                }
                self.root = Some(node.id.clone());
            }
            Some(parent) => {
                let id = node.id.clone();
                self.get_mut(parent)?.children.push(id);
            }
        }
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// Remove a non-root node from the registry and its parent's child list.
    /// Its children must already be gone or re-parented.
    pub fn detach(&mut self, id: &NodeId) -> Result<GameNode, EngineError> {
        if self.is_root(id) {
            return Err(EngineError::invariant("cannot detach the root node"));
        }
        let node = self
            .nodes
            .remove(id)
            .ok_or_else(|| EngineError::invariant(format!("unknown node {id}")))?;
        if let Some(parent) = &node.parent
            && let Some(parent_node) = self.nodes.get_mut(parent)
        {
            parent_node.children.retain(|child| child != id);
        }
        Ok(node)
    }

    /// Distance from the root, in edges.
    pub fn level(&self, id: &NodeId) -> Result<usize, EngineError> {
        let mut level = 0;
        let mut cursor = self.get(id)?;
        while let Some(parent) = &cursor.parent {
            cursor = self.get(parent)?;
            level += 1;
        }
        Ok(level)
    }

    /// Branching depth: the number of `BRANCHED` strict ancestors. This is
    /// the budget dimension, not the tree level; linear rollout chains are
    /// free.
    pub fn depth(&self, id: &NodeId) -> Result<usize, EngineError> {
        let mut depth = 0;
        let mut cursor = self.get(id)?;
        while let Some(parent) = &cursor.parent {
            cursor = self.get(parent)?;
            if cursor.branch_status == BranchStatus::Branched {
                depth += 1;
            }
        }
        Ok(depth)
    }

    /// Branch-point candidates above `id`, leaf-to-root: collect `BRANCHABLE`
    /// strict ancestors of `id`, stopping at the first `BRANCHED` one.
    /// The node itself is never a candidate, and everything above an
    /// existing branch belongs to other subtrees' budgets.
    pub fn upstream_branchable(&self, id: &NodeId) -> Result<Vec<NodeId>, EngineError> {
        let mut candidates = Vec::new();
        let mut cursor = self.get(id)?;
        while let Some(parent) = &cursor.parent {
            cursor = self.get(parent)?;
            match cursor.branch_status {
                BranchStatus::Branched => break,
                BranchStatus::Branchable => candidates.push(cursor.id.clone()),
                BranchStatus::Unbranchable => {}
            }
        }
        Ok(candidates)
    }
}
