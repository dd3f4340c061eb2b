//! The trajectory sampler: drives games from checkpoint to checkpoint and
//! grows the exploration tree under depth and degree budgets.
//!
//! The sampler never holds a game in memory between segments. A rollout step
//! loads the node's snapshot, plays one segment, persists the result, and
//! releases the game; everything the tree remembers about the segment lives
//! on the [`GameNode`](crate::tree::GameNode).

use std::collections::{BTreeMap, VecDeque};

use anyhow::{Context, Result, anyhow};
use rand::Rng;
use tracing::{debug, info, info_span};
use uuid::Uuid;

use crate::core::branching;
use crate::core::types::{BranchStatus, GameStatus, NodeId, PlayStatus, PlayerId};
use crate::decision::DecisionSession;
use crate::game::Game;
use crate::io::archive::{Archive, ArchiveRow, SamplerMeta};
use crate::io::config::SamplerConfig;
use crate::io::snapshot::SnapshotStore;
use crate::scenario::Scenario;
use crate::tree::{GameNode, NodeTree};

/// Tree-structured trajectory sampler over one scenario.
pub struct GameSampler {
    name: String,
    id: String,
    max_depth: usize,
    max_degree: usize,
    tree: NodeTree,
    /// FIFO work queue of nodes awaiting rollout.
    queue: VecDeque<NodeId>,
    /// Archive rows mirroring the registry, keyed by node id.
    archive: BTreeMap<String, ArchiveRow>,
    /// Node ids in the order they were rolled out.
    history: Vec<NodeId>,
}

impl GameSampler {
    pub fn new(name: impl Into<String>, max_depth: usize, max_degree: usize) -> Self {
        Self {
            name: name.into(),
            id: Uuid::new_v4().simple().to_string(),
            max_depth,
            max_degree,
            tree: NodeTree::new(),
            queue: VecDeque::new(),
            archive: BTreeMap::new(),
            history: Vec::new(),
        }
    }

    pub fn from_config(cfg: &SamplerConfig) -> Self {
        Self::new(cfg.name.clone(), cfg.max_depth, cfg.max_degree)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sample_id(&self) -> &str {
        &self.id
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn max_degree(&self) -> usize {
        self.max_degree
    }

    pub fn tree(&self) -> &NodeTree {
        &self.tree
    }

    pub fn queue(&self) -> &VecDeque<NodeId> {
        &self.queue
    }

    pub fn rollout_history(&self) -> &[NodeId] {
        &self.history
    }

    /// Install a fresh game as the root node, persist its snapshot, and
    /// enqueue it for rollout.
    pub fn seed<S: Scenario>(
        &mut self,
        game: &Game<S>,
        store: &dyn SnapshotStore,
    ) -> Result<NodeId> {
        let id = self.tree.insert_root()?;
        store
            .write(&id, &game.snapshot()?)
            .with_context(|| format!("persist seed snapshot for node {id}"))?;
        self.update_row(&id)?;
        self.queue.push_back(id.clone());
        info!(sample = %self.id, node = %id, game = game.name(), "seeded sampler");
        Ok(id)
    }

    /// Drain the work queue: roll each node out to termination, then sample
    /// branch points along the finished trajectory, expand them, and enqueue
    /// the whole batch before moving on. Plain FIFO order throughout.
    pub fn sample_trajectories<S: Scenario>(
        &mut self,
        store: &dyn SnapshotStore,
        session: &DecisionSession<'_>,
        rng: &mut impl Rng,
    ) -> Result<()> {
        while let Some(id) = self.queue.pop_front() {
            // The node may have been replaced by a concurrent chain since it
            // was enqueued.
            if !self.tree.contains(&id) {
                continue;
            }
            self.history.push(id.clone());
            let leaf = self.roll_out::<S>(&id, store, session)?;
            let points = self.sample_branch_points(&leaf, rng)?;
            let mut batch = Vec::new();
            for point in &points {
                batch.extend(self.expand(point, store)?);
            }
            self.queue.extend(batch);
        }
        info!(sample = %self.id, nodes = self.tree.len(), "sampling complete");
        Ok(())
    }

    /// Roll one node out to a finished trajectory, creating a forward child
    /// per segment and splicing concurrent chains as they appear. Returns
    /// the terminal leaf.
    pub fn roll_out<S: Scenario>(
        &mut self,
        id: &NodeId,
        store: &dyn SnapshotStore,
        session: &DecisionSession<'_>,
    ) -> Result<NodeId> {
        let mut cursor = id.clone();
        // Guard against double play if the caller rolls out a queued node.
        self.queue.retain(|queued| queued != &cursor);
        loop {
            self.play_and_save::<S>(&cursor, store, session)?;
            let one_old = std::mem::take(&mut self.tree.get_mut(&cursor)?.one_old);
            if !one_old.is_empty() {
                cursor = self.create_concurrent_nodes::<S>(&cursor, one_old, store)?;
            }
            if self.tree.get(&cursor)?.game_status == PlayStatus::Finished {
                self.record_result(&cursor)?;
                return Ok(cursor);
            }
            cursor = self.create_child(&cursor, store)?;
        }
    }

    /// Play one segment of the node's game: load, resume, run to the next
    /// pause or to termination, capture telemetry, persist, release.
    fn play_and_save<S: Scenario>(
        &mut self,
        id: &NodeId,
        store: &dyn SnapshotStore,
        session: &DecisionSession<'_>,
    ) -> Result<()> {
        let span = info_span!("rollout", node = %id);
        let _guard = span.enter();

        let bytes = store
            .read(id)
            .with_context(|| format!("load snapshot for node {id}"))?;
        let mut game: Game<S> = Game::from_snapshot(&bytes)?;
        game.attach();
        game.status = if self.tree.is_root(id) {
            GameStatus::Playing
        } else {
            GameStatus::Resumed
        };
        game.play_to_next_checkpoint(session)?;

        let att = game
            .take_attachment()
            .ok_or_else(|| anyhow!("attachment lost during rollout of node {id}"))?;
        let finished = game.status == GameStatus::Finished;
        let observable = game.state.observable_state();
        let final_result = finished.then(|| game.result.clone());
        store
            .write(id, &game.snapshot()?)
            .with_context(|| format!("persist snapshot for node {id}"))?;

        let node = self.tree.get_mut(id)?;
        node.game_status = if finished {
            PlayStatus::Finished
        } else {
            PlayStatus::Played
        };
        if finished {
            // A node expanded before play stays BRANCHED; its descendants
            // count it in their depth.
            if node.branch_status == BranchStatus::Branchable {
                node.branch_status = BranchStatus::Unbranchable;
            }
            node.final_result = final_result;
        }
        node.observable_state = observable;
        node.detail.extend(att.records);
        node.one_old = att.one_old;
        debug!(finished, decisions = self.tree.get(id)?.detail.len(), "segment played");
        self.update_row(id)?;
        Ok(())
    }

    /// Create the node's forward child by snapshot copy.
    fn create_child(&mut self, parent: &NodeId, store: &dyn SnapshotStore) -> Result<NodeId> {
        let existing = self.tree.get(parent)?.children.len();
        if existing >= self.max_degree {
            return Err(anyhow!(
                "node {parent} already has {existing} children (max_degree {})",
                self.max_degree
            ));
        }
        let child = self.tree.new_child(parent)?;
        store
            .copy(parent, &child)
            .with_context(|| format!("copy snapshot {parent} -> {child}"))?;
        self.update_row(&child)?;
        Ok(child)
    }

    /// Replace a node that played a concurrent segment with a chain of
    /// per-participant nodes.
    ///
    /// For k participants in fan-out order the chain has exactly k links
    /// hanging off the played node's parent. Each link carries only its
    /// participant's decisions. The first k-1 links store the alternate
    /// snapshot in which only their participant acted; the final link stores
    /// the main post-step snapshot, carries the orchestrator's decisions of
    /// the segment, and inherits termination. The played node itself is
    /// detached and dropped. Returns the tail as the new rollout cursor.
    fn create_concurrent_nodes<S: Scenario>(
        &mut self,
        played: &NodeId,
        one_old: Vec<(PlayerId, Vec<u8>)>,
        store: &dyn SnapshotStore,
    ) -> Result<NodeId> {
        let played_node = self.tree.get(played)?.clone();
        let parent = played_node
            .parent
            .clone()
            .ok_or_else(|| anyhow!("concurrent segment cannot start at the root node"))?;

        let k = one_old.len();
        let mut remaining = played_node.detail.clone();
        let mut prev = parent;
        let mut tail = played.clone();
        for (index, (player, bytes)) in one_old.iter().enumerate() {
            let (mine, rest): (Vec<_>, Vec<_>) = remaining
                .into_iter()
                .partition(|record| record.player == Some(*player));
            remaining = rest;

            let last = index == k - 1;
            let nid = self.tree.new_child(&prev)?;
            if last {
                store
                    .copy(played, &nid)
                    .with_context(|| format!("copy snapshot {played} -> {nid}"))?;
            } else {
                store
                    .write(&nid, bytes)
                    .with_context(|| format!("persist alternate snapshot for node {nid}"))?;
            }
            let observable = if last {
                played_node.observable_state.clone()
            } else {
                let alt: Game<S> = Game::from_snapshot(bytes)?;
                alt.state.observable_state()
            };

            let leftovers = if last {
                std::mem::take(&mut remaining)
            } else {
                Vec::new()
            };
            let node = self.tree.get_mut(&nid)?;
            node.game_status = PlayStatus::Played;
            node.detail = mine;
            node.detail.extend(leftovers);
            node.observable_state = observable;
            if last && played_node.game_status == PlayStatus::Finished {
                node.game_status = PlayStatus::Finished;
                node.branch_status = BranchStatus::Unbranchable;
                node.final_result = played_node.final_result.clone();
            }
            self.update_row(&nid)?;
            prev = nid.clone();
            tail = nid;
        }

        self.tree.detach(played)?;
        self.archive.remove(played.as_str());
        self.queue.retain(|queued| queued != played);
        debug!(played = %played, participants = k, tail = %tail, "spliced concurrent chain");
        Ok(tail)
    }

    /// Key-wise sum the leaf's final result into every node on the path from
    /// the leaf to the root, the leaf included.
    fn record_result(&mut self, leaf: &NodeId) -> Result<()> {
        let final_result = self
            .tree
            .get(leaf)?
            .final_result
            .clone()
            .ok_or_else(|| anyhow!("finished node {leaf} has no final result"))?;
        let mut cursor = Some(leaf.clone());
        while let Some(id) = cursor {
            let node = self.tree.get_mut(&id)?;
            for (key, value) in &final_result {
                *node.result.entry(key.clone()).or_insert(0.0) += value;
            }
            cursor = node.parent.clone();
            self.update_row(&id)?;
        }
        Ok(())
    }

    /// Turn a node into a branch point: create sibling children by snapshot
    /// copy up to `max_degree` and mark it `BRANCHED`. A node that is
    /// already branched, or can no longer branch, yields nothing.
    pub fn expand(&mut self, id: &NodeId, store: &dyn SnapshotStore) -> Result<Vec<NodeId>> {
        let node = self.tree.get(id)?;
        match node.branch_status {
            BranchStatus::Branched | BranchStatus::Unbranchable => return Ok(Vec::new()),
            BranchStatus::Branchable => {}
        }
        let missing = self.max_degree.saturating_sub(node.children.len());
        let mut created = Vec::with_capacity(missing);
        for _ in 0..missing {
            let child = self.tree.new_child(id)?;
            store
                .copy(id, &child)
                .with_context(|| format!("copy snapshot {id} -> {child}"))?;
            self.update_row(&child)?;
            created.push(child);
        }
        self.tree.get_mut(id)?.branch_status = BranchStatus::Branched;
        self.update_row(id)?;
        debug!(node = %id, created = created.len(), "expanded branch point");
        Ok(created)
    }

    /// Pick branch points above `leaf` within the remaining depth budget.
    pub fn sample_branch_points(
        &self,
        leaf: &NodeId,
        rng: &mut impl Rng,
    ) -> Result<Vec<NodeId>> {
        Ok(branching::sample_branch_points(
            &self.tree,
            leaf,
            self.max_depth,
            rng,
        )?)
    }

    /// Push nodes onto the work queue, preserving order.
    pub fn enqueue(&mut self, ids: impl IntoIterator<Item = NodeId>) {
        self.queue.extend(ids);
    }

    /// Flatten the run for archival.
    pub fn to_archive(&self) -> Archive {
        Archive {
            meta: SamplerMeta {
                name: self.name.clone(),
                sample_id: self.id.clone(),
                max_depth: self.max_depth,
                max_degree: self.max_degree,
            },
            nodes: self.archive.values().cloned().collect(),
        }
    }

    /// Rebuild a sampler from an archive. The work queue and rollout history
    /// start empty; re-seeding the queue from leaves is the caller's choice.
    pub fn reconstruct(archive: Archive) -> Result<Self> {
        let mut tree = NodeTree::new();
        let mut rows = archive.nodes;
        // Parents carry strictly smaller levels, so this inserts them first.
        rows.sort_by_key(|row| row.level);
        for row in &rows {
            tree.insert_node(GameNode {
                id: NodeId::from(row.id.clone()),
                parent: row.parent_id.clone().map(NodeId::from),
                children: Vec::new(),
                branch_status: row.branch_status,
                game_status: row.game_status,
                result: row.result.clone(),
                detail: row.detail.clone(),
                observable_state: row.observable_state.clone(),
                final_result: (row.game_status == PlayStatus::Finished)
                    .then(|| row.result.clone()),
                one_old: Vec::new(),
            })?;
        }
        let archive_rows = rows
            .into_iter()
            .map(|row| (row.id.clone(), row))
            .collect();
        Ok(Self {
            name: archive.meta.name,
            id: archive.meta.sample_id,
            max_depth: archive.meta.max_depth,
            max_degree: archive.meta.max_degree,
            tree,
            queue: VecDeque::new(),
            archive: archive_rows,
            history: Vec::new(),
        })
    }

    fn update_row(&mut self, id: &NodeId) -> Result<()> {
        let level = self.tree.level(id)?;
        let node = self.tree.get(id)?;
        let row = ArchiveRow {
            id: node.id.to_string(),
            parent_id: node.parent.as_ref().map(ToString::to_string),
            branch_status: node.branch_status,
            game_status: node.game_status,
            level,
            result: node.result.clone(),
            observable_state: node.observable_state.clone(),
            detail: node.detail.clone(),
        };
        self.archive.insert(row.id.clone(), row);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    use super::*;
    use crate::decision::NoDiscard;
    use crate::test_support::{MemorySnapshotStore, Relay, ScriptedDecisionMaker};

    #[test]
    fn seed_installs_the_root_and_queues_it() {
        let store = MemorySnapshotStore::default();
        let mut sampler = GameSampler::new("relay-run", 1, 2);
        let game = Game::new("relay", "relay", Relay::new("favourite colour?"));

        let root = sampler.seed(&game, &store).expect("seed");

        assert!(sampler.tree().is_root(&root));
        assert_eq!(sampler.queue().len(), 1);
        assert!(store.read(&root).is_ok());
    }

    #[test]
    fn archive_round_trips_through_reconstruct() {
        let store = MemorySnapshotStore::default();
        let maker = ScriptedDecisionMaker::constant("blue");
        let sink = NoDiscard;
        let session = DecisionSession::new(&maker, &sink);
        let mut rng = SmallRng::seed_from_u64(11);

        let mut sampler = GameSampler::new("relay-run", 0, 2);
        let game = Game::new("relay", "relay", Relay::new("favourite colour?"));
        sampler.seed(&game, &store).expect("seed");
        sampler
            .sample_trajectories::<Relay>(&store, &session, &mut rng)
            .expect("sample");

        let archive = sampler.to_archive();
        let rebuilt = GameSampler::reconstruct(archive.clone()).expect("reconstruct");

        assert_eq!(rebuilt.sample_id(), sampler.sample_id());
        assert_eq!(rebuilt.tree().len(), sampler.tree().len());
        assert_eq!(rebuilt.tree().root(), sampler.tree().root());
        assert_eq!(rebuilt.to_archive().nodes.len(), archive.nodes.len());
        assert!(rebuilt.queue().is_empty());
    }
}
