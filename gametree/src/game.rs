//! The resumable game: a process arena plus the checkpoint interpreter.
//!
//! A [`Game`] owns every process of one scenario instance and a `curr` cursor
//! naming the single process eligible to run. Advancing the game means
//! running `curr` for exactly one step. Steps whose table entry declares a
//! checkpoint boundary become one-shot suspend points: the step index plus
//! the game status together encode "where execution left off", and that pair
//! is exactly what a snapshot serializes. There are no coroutines anywhere;
//! suspension is re-entry of the same step after reload.
//!
//! Concurrent steps fan out one OS thread per active participant. Each worker
//! exclusively owns its participant's sub-process and seat, moved out of the
//! game for the duration of the step and moved back after the join barrier.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::core::process::Process;
use crate::core::types::{DecisionRecord, EngineError, GameStatus, PlayerId, ProcessId};
use crate::decision::{Completion, DecisionError, DecisionSession, Message, render_transcript};
use crate::scenario::{ActorStep, Boundary, Scenario, StepSpec};

/// Segment telemetry collected while a sampler node drives the game.
///
/// Present only between load and persist; never serialized. A game without an
/// attachment is standalone: checkpoints execute immediately and decisions
/// are not recorded.
#[derive(Debug, Default)]
pub struct Attachment {
    /// Accepted decisions of the current rollout segment.
    pub records: Vec<DecisionRecord>,
    /// Per-participant alternate-history snapshots produced by a concurrent
    /// checkpoint, in fan-out order. Consumed immediately by the sampler.
    pub one_old: Vec<(PlayerId, Vec<u8>)>,
}

/// The root process of one scenario instance.
#[derive(Debug, Serialize, Deserialize)]
#[serde(bound = "S: Scenario")]
pub struct Game<S: Scenario> {
    name: String,
    pub status: GameStatus,
    /// Outcome metrics, written once at termination.
    pub result: BTreeMap<String, f64>,
    /// Scenario-owned state (players, memories, board).
    pub state: S,
    procs: BTreeMap<ProcessId, Process>,
    next_id: u32,
    root: ProcessId,
    /// The process currently eligible to run. `None` once finished.
    pub curr: Option<ProcessId>,
    #[serde(skip)]
    pub(crate) attachment: Option<Attachment>,
}

impl<S: Scenario> Game<S> {
    /// Create a fresh game whose root process runs the `root_kind` sequence.
    pub fn new(name: impl Into<String>, root_kind: &str, state: S) -> Self {
        let name = name.into();
        let root = ProcessId(0);
        let mut procs = BTreeMap::new();
        procs.insert(root, Process::new(root, root_kind, name.clone(), None, None));
        Self {
            name,
            status: GameStatus::Playing,
            result: BTreeMap::new(),
            state,
            procs,
            next_id: 1,
            root,
            curr: Some(root),
            attachment: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> ProcessId {
        self.root
    }

    /// Standalone games have no attachment: checkpoints run through and
    /// nothing is recorded.
    pub fn is_standalone(&self) -> bool {
        self.attachment.is_none()
    }

    pub(crate) fn attach(&mut self) {
        self.attachment = Some(Attachment::default());
    }

    pub(crate) fn take_attachment(&mut self) -> Option<Attachment> {
        self.attachment.take()
    }

    pub fn process(&self, pid: ProcessId) -> Result<&Process, EngineError> {
        self.procs
            .get(&pid)
            .ok_or_else(|| EngineError::invariant(format!("unknown process {pid}")))
    }

    pub fn process_mut(&mut self, pid: ProcessId) -> Result<&mut Process, EngineError> {
        self.procs
            .get_mut(&pid)
            .ok_or_else(|| EngineError::invariant(format!("unknown process {pid}")))
    }

    /// Create a sub-process under `parent`. Sibling names must be unique.
    pub fn create_subprocess(
        &mut self,
        parent: ProcessId,
        kind: &str,
        name: Option<String>,
        owner: Option<PlayerId>,
    ) -> Result<ProcessId, EngineError> {
        let id = ProcessId(self.next_id);
        let name = name.unwrap_or_else(|| format!("{kind}_{id}"));
        {
            let parent_proc = self.process(parent)?;
            for child in &parent_proc.children {
                if self.process(*child)?.name == name {
                    return Err(EngineError::invariant(format!(
                        "duplicate sub-process name {name:?} under {}",
                        parent_proc.name
                    )));
                }
            }
        }
        self.next_id += 1;
        self.procs
            .insert(id, Process::new(id, kind, name, Some(parent), owner));
        self.process_mut(parent)?.children.push(id);
        Ok(id)
    }

    /// Find a direct child of `parent` by name.
    pub fn find_subprocess(&self, parent: ProcessId, name: &str) -> Option<ProcessId> {
        let parent = self.procs.get(&parent)?;
        parent
            .children
            .iter()
            .copied()
            .find(|child| self.procs.get(child).is_some_and(|p| p.name == name))
    }

    /// Children of `pid` that have not locked yet, in creation order.
    pub fn active_children(&self, pid: ProcessId) -> Result<Vec<ProcessId>, EngineError> {
        let proc = self.process(pid)?;
        let mut active = Vec::new();
        for child in &proc.children {
            if !self.process(*child)?.locked {
                active.push(*child);
            }
        }
        Ok(active)
    }

    /// Merge `pid`'s payload into its parent's, last-write-wins per key.
    pub fn propagate_payload(&mut self, pid: ProcessId) -> Result<(), EngineError> {
        let proc = self.process(pid)?;
        let Some(parent) = proc.parent else {
            return Ok(());
        };
        let payload = proc.payload.clone();
        self.process_mut(parent)?.payload.extend(payload);
        Ok(())
    }

    /// Detach and drop `pid`'s entire subtree of children.
    fn clear_children(&mut self, pid: ProcessId) -> Result<(), EngineError> {
        let mut stack = std::mem::take(&mut self.process_mut(pid)?.children);
        while let Some(id) = stack.pop() {
            let Some(proc) = self.procs.remove(&id) else {
                continue;
            };
            stack.extend(proc.children);
        }
        Ok(())
    }

    /// Chain `pid`'s children `c0 -> c1 -> ... -> cn` and point `curr` at
    /// `c0`. The last child's continuation remains the parent.
    pub fn run_children_sequential(&mut self, pid: ProcessId) -> Result<(), EngineError> {
        let children = self.process(pid)?.children.clone();
        if children.is_empty() {
            return Ok(());
        }
        for pair in children.windows(2) {
            self.process_mut(pair[0])?.nxt = Some(pair[1]);
        }
        self.curr = Some(children[0]);
        Ok(())
    }

    /// Like sequential, but the last child wraps back to the first. An
    /// external condition must rewire `nxt` to break the cycle.
    pub fn run_children_looping(&mut self, pid: ProcessId) -> Result<(), EngineError> {
        let children = self.process(pid)?.children.clone();
        if children.is_empty() {
            return Ok(());
        }
        for pair in children.windows(2) {
            self.process_mut(pair[0])?.nxt = Some(pair[1]);
        }
        self.process_mut(children[children.len() - 1])?.nxt = Some(children[0]);
        self.curr = Some(children[0]);
        Ok(())
    }

    /// Drive every active child of `pid` to sequence exhaustion on its own
    /// OS thread and join them all before returning.
    ///
    /// Each worker exclusively owns its child process and its participant's
    /// seat; the scenario state is shared read-only. After the join, child
    /// payloads are merged into `pid`'s payload and worker telemetry is
    /// appended in child order. Every participating child must end locked.
    pub(crate) fn run_children_concurrent(
        &mut self,
        pid: ProcessId,
        session: &DecisionSession<'_>,
    ) -> Result<(), EngineError> {
        let active = self.active_children(pid)?;
        if active.is_empty() {
            return Ok(());
        }

        let mut items: Vec<(Process, S::Seat, PlayerId)> = Vec::with_capacity(active.len());
        for cid in &active {
            let proc = self
                .procs
                .remove(cid)
                .ok_or_else(|| EngineError::invariant(format!("unknown process {cid}")))?;
            let owner = proc.owner.ok_or_else(|| {
                EngineError::invariant(format!("concurrent child {} has no owner", proc.name))
            })?;
            let seat = self.state.detach_seat(owner)?;
            items.push((proc, seat, owner));
        }

        let view = &self.state;
        let results: Vec<Result<(Process, S::Seat, PlayerId, Vec<DecisionRecord>), EngineError>> =
            std::thread::scope(|scope| {
                let handles: Vec<_> = items
                    .into_iter()
                    .map(|(mut proc, mut seat, owner)| {
                        scope.spawn(move || {
                            let seq = S::actor_sequence(&proc.kind).ok_or_else(|| {
                                EngineError::invariant(format!(
                                    "no actor step table for process kind {:?}",
                                    proc.kind
                                ))
                            })?;
                            let mut records = Vec::new();
                            while !proc.is_exhausted(seq.len()) {
                                let step: &ActorStep<S> = &seq[proc.step];
                                let mut turn = ActorTurn {
                                    proc: &mut proc,
                                    seat: &mut seat,
                                    view,
                                    step: step.name,
                                    session,
                                    records: &mut records,
                                };
                                (step.run)(&mut turn)?;
                                proc.step += 1;
                            }
                            proc.locked = true;
                            Ok((proc, seat, owner, records))
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|handle| {
                        handle
                            .join()
                            .unwrap_or_else(|_| Err(EngineError::invariant("concurrent worker panicked")))
                    })
                    .collect()
            });

        let mut failure = None;
        for result in results {
            match result {
                Ok((proc, seat, owner, records)) => {
                    self.state.attach_seat(owner, seat);
                    let payload = proc.payload.clone();
                    self.procs.insert(proc.id, proc);
                    self.process_mut(pid)?.payload.extend(payload);
                    if let Some(att) = self.attachment.as_mut() {
                        att.records.extend(records);
                    }
                }
                Err(err) => {
                    failure.get_or_insert(err);
                }
            }
        }
        if let Some(err) = failure {
            return Err(err);
        }
        if !self.active_children(pid)?.is_empty() {
            return Err(EngineError::invariant(
                "concurrent join left an unlocked participant",
            ));
        }
        Ok(())
    }

    /// Terminate the game with `result`.
    pub fn finish(&mut self, result: BTreeMap<String, f64>) {
        debug!(game = %self.name, "game finished");
        self.result = result;
        self.status = GameStatus::Finished;
        self.curr = None;
    }

    fn exit_process(&mut self, pid: ProcessId) -> Result<(), EngineError> {
        if pid == self.root {
            debug!(game = %self.name, "root sequence exhausted");
            self.status = GameStatus::Finished;
            self.curr = None;
            return Ok(());
        }
        self.clear_children(pid)?;
        let proc = self.process_mut(pid)?;
        proc.step = 0;
        let nxt = proc.nxt;
        self.curr = nxt;
        Ok(())
    }

    /// Run `curr` for exactly one step (or exit it if exhausted).
    pub fn run_one(&mut self, session: &DecisionSession<'_>) -> Result<(), EngineError> {
        let pid = self
            .curr
            .ok_or_else(|| EngineError::invariant("run with no current process"))?;
        let (kind, step) = {
            let proc = self.process(pid)?;
            (proc.kind.clone(), proc.step)
        };
        let seq = S::sequence(&kind).ok_or_else(|| {
            EngineError::invariant(format!("no step table for process kind {kind:?}"))
        })?;
        if step > seq.len() {
            return Err(EngineError::invariant(format!(
                "step cursor {step} past the end of {kind:?}"
            )));
        }
        if self.process(pid)?.is_exhausted(seq.len()) {
            return self.exit_process(pid);
        }
        let spec = &seq[step];
        let advanced = match spec.boundary {
            Boundary::Plain => {
                self.run_body(pid, spec, session)?;
                true
            }
            Boundary::Checkpoint => self.run_checkpoint(pid, spec, session)?,
            Boundary::Concurrent => self.run_concurrent_checkpoint(pid, spec, session)?,
        };
        if advanced {
            self.process_mut(pid)?.step += 1;
        }
        Ok(())
    }

    fn run_body(
        &mut self,
        pid: ProcessId,
        spec: &StepSpec<S>,
        session: &DecisionSession<'_>,
    ) -> Result<(), EngineError> {
        let mut turn = Turn {
            game: self,
            pid,
            step: spec.name,
            session,
        };
        (spec.run)(&mut turn)
    }

    /// Single-actor checkpoint: pause on first encounter, execute on resume.
    fn run_checkpoint(
        &mut self,
        pid: ProcessId,
        spec: &StepSpec<S>,
        session: &DecisionSession<'_>,
    ) -> Result<bool, EngineError> {
        if self.attachment.is_none() {
            self.run_body(pid, spec, session)?;
            return Ok(true);
        }
        match self.status {
            GameStatus::Playing => {
                debug!(step = spec.name, "pausing at checkpoint");
                self.status = GameStatus::Paused;
                Ok(false)
            }
            GameStatus::Resumed => {
                self.status = GameStatus::Playing;
                self.run_body(pid, spec, session)?;
                Ok(true)
            }
            status => Err(EngineError::invariant(format!(
                "checkpoint {:?} reached with status {status:?}",
                spec.name
            ))),
        }
    }

    /// Concurrent checkpoint: pause on first encounter; on resume, run the
    /// fan-out and decompose it into per-participant alternate histories.
    ///
    /// For each participant that was active before the fan-out, a clone of
    /// the post-fan-out game is built in which every *other* active
    /// participant's sub-process is reset to its pre-step condition and that
    /// participant's private state is restored from the pre-fan-out game.
    /// The clone represents a world in which only the one participant acted.
    fn run_concurrent_checkpoint(
        &mut self,
        pid: ProcessId,
        spec: &StepSpec<S>,
        session: &DecisionSession<'_>,
    ) -> Result<bool, EngineError> {
        if self.attachment.is_none() {
            self.run_body(pid, spec, session)?;
            return Ok(true);
        }
        match self.status {
            GameStatus::Playing => {
                debug!(step = spec.name, "pausing at concurrent checkpoint");
                self.status = GameStatus::Paused;
                Ok(false)
            }
            GameStatus::Resumed => {
                self.status = GameStatus::Playing;
                let orig = self.clone_via_snapshot()?;
                let mut active: Vec<(ProcessId, PlayerId)> = Vec::new();
                for cid in self.active_children(pid)? {
                    let owner = self.process(cid)?.owner.ok_or_else(|| {
                        EngineError::invariant(format!("concurrent child {cid} has no owner"))
                    })?;
                    active.push((cid, owner));
                }

                self.run_body(pid, spec, session)?;

                let mut alternates = Vec::with_capacity(active.len());
                for &(_, player) in &active {
                    let mut alt = self.clone_via_snapshot()?;
                    for &(other_pid, other) in &active {
                        if other == player {
                            continue;
                        }
                        let proc = alt.process_mut(other_pid)?;
                        proc.step = 0;
                        proc.locked = false;
                        alt.state.restore_player(other, &orig.state);
                    }
                    alternates.push((player, alt.snapshot()?));
                }
                debug!(step = spec.name, participants = alternates.len(), "reconciled concurrent step");
                let att = self
                    .attachment
                    .as_mut()
                    .ok_or_else(|| EngineError::invariant("attachment vanished during fan-out"))?;
                att.one_old.extend(alternates);
                Ok(true)
            }
            status => Err(EngineError::invariant(format!(
                "concurrent checkpoint {:?} reached with status {status:?}",
                spec.name
            ))),
        }
    }

    /// Run a standalone game to completion. Checkpoints execute immediately.
    pub fn play(&mut self, session: &DecisionSession<'_>) -> Result<(), EngineError> {
        while self.curr.is_some() {
            self.run_one(session)?;
        }
        Ok(())
    }

    /// Advance an attached game until it pauses or finishes.
    pub fn play_to_next_checkpoint(
        &mut self,
        session: &DecisionSession<'_>,
    ) -> Result<(), EngineError> {
        while self.curr.is_some()
            && matches!(self.status, GameStatus::Playing | GameStatus::Resumed)
        {
            self.run_one(session)?;
        }
        Ok(())
    }

    /// Serialize the whole game. The attachment never travels with it.
    pub fn snapshot(&self) -> Result<Vec<u8>, EngineError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_snapshot(bytes: &[u8]) -> Result<Self, EngineError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Deep clone through the snapshot codec, never by shared references.
    fn clone_via_snapshot(&self) -> Result<Self, EngineError> {
        Self::from_snapshot(&self.snapshot()?)
    }

    pub(crate) fn record_decision(&mut self, record: DecisionRecord) {
        if let Some(att) = self.attachment.as_mut() {
            att.records.push(record);
        }
    }
}

/// Mutable step context for orchestrated steps.
pub struct Turn<'a, S: Scenario> {
    pub game: &'a mut Game<S>,
    /// The process whose step is running.
    pub pid: ProcessId,
    /// Name of the running step, for telemetry labels.
    pub step: &'static str,
    pub session: &'a DecisionSession<'a>,
}

impl<S: Scenario> Turn<'_, S> {
    pub fn state(&self) -> &S {
        &self.game.state
    }

    pub fn state_mut(&mut self) -> &mut S {
        &mut self.game.state
    }

    pub fn payload_mut(&mut self) -> Result<&mut BTreeMap<String, Value>, EngineError> {
        Ok(&mut self.game.process_mut(self.pid)?.payload)
    }

    pub fn create_subprocess(
        &mut self,
        kind: &str,
        name: Option<String>,
        owner: Option<PlayerId>,
    ) -> Result<ProcessId, EngineError> {
        self.game.create_subprocess(self.pid, kind, name, owner)
    }

    pub fn run_sequential(&mut self) -> Result<(), EngineError> {
        self.game.run_children_sequential(self.pid)
    }

    pub fn run_looping(&mut self) -> Result<(), EngineError> {
        self.game.run_children_looping(self.pid)
    }

    pub fn run_concurrent(&mut self) -> Result<(), EngineError> {
        self.game.run_children_concurrent(self.pid, self.session)
    }

    pub fn propagate_payload(&mut self) -> Result<(), EngineError> {
        self.game.propagate_payload(self.pid)
    }

    pub fn finish(&mut self, result: BTreeMap<String, f64>) {
        self.game.finish(result);
    }

    /// Obtain one decision and record it on the owning node's telemetry.
    pub fn decide<T>(
        &mut self,
        player: Option<PlayerId>,
        messages: &[Message],
        parse: impl Fn(&Completion) -> Result<T, DecisionError>,
    ) -> Result<(Completion, T), EngineError> {
        let (completion, value) = self.session.decide(messages, parse)?;
        let label = format!("{} -> {}", self.game.process(self.pid)?.name, self.step);
        self.game.record_decision(DecisionRecord {
            step: label,
            player,
            prompt: render_transcript(messages),
            reasoning: completion.reasoning.clone(),
            output: completion.raw.clone(),
        });
        Ok((completion, value))
    }
}

/// Step context for one participant's concurrent worker. Ownership enforces
/// the isolation contract: the worker sees only its own process, its own
/// seat, and a read-only view of the shared scenario state.
pub struct ActorTurn<'a, S: Scenario> {
    pub proc: &'a mut Process,
    pub seat: &'a mut S::Seat,
    pub view: &'a S,
    /// Name of the running step, for telemetry labels.
    pub step: &'static str,
    pub session: &'a DecisionSession<'a>,
    pub records: &'a mut Vec<DecisionRecord>,
}

impl<S: Scenario> ActorTurn<'_, S> {
    pub fn player(&self) -> Result<PlayerId, EngineError> {
        self.proc.owner.ok_or_else(|| {
            EngineError::invariant(format!("concurrent process {} has no owner", self.proc.name))
        })
    }

    /// Obtain one decision for this participant and buffer its record. The
    /// orchestrator appends buffered records after the join barrier.
    pub fn decide<T>(
        &mut self,
        messages: &[Message],
        parse: impl Fn(&Completion) -> Result<T, DecisionError>,
    ) -> Result<(Completion, T), EngineError> {
        let (completion, value) = self.session.decide(messages, parse)?;
        self.records.push(DecisionRecord {
            step: format!("{} -> {}", self.proc.name, self.step),
            player: self.proc.owner,
            prompt: render_transcript(messages),
            reasoning: completion.reasoning.clone(),
            output: completion.raw.clone(),
        });
        Ok((completion, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::NoDiscard;
    use crate::test_support::{Council, Relay, ScriptedDecisionMaker};

    fn session<'a>(
        maker: &'a ScriptedDecisionMaker,
        sink: &'a NoDiscard,
    ) -> DecisionSession<'a> {
        DecisionSession::new(maker, sink)
    }

    /// Verifies a standalone game runs straight through its checkpoints.
    #[test]
    fn standalone_play_runs_checkpoints_immediately() {
        let maker = ScriptedDecisionMaker::constant("blue");
        let sink = NoDiscard;
        let session = session(&maker, &sink);

        let mut game = Game::new("relay", "relay", Relay::new("favourite colour?"));
        game.play(&session).expect("play");

        assert_eq!(game.status, GameStatus::Finished);
        assert_eq!(game.state.answers, vec!["blue".to_string()]);
        assert_eq!(game.result.get("answers"), Some(&1.0));
        assert!(game.curr.is_none());
    }

    /// Verifies the step cursor moves by at most one per run and an attached
    /// game pauses at the first checkpoint without executing its body.
    #[test]
    fn attached_game_pauses_at_checkpoint_without_running_the_body() {
        let maker = ScriptedDecisionMaker::constant("blue");
        let sink = NoDiscard;
        let session = session(&maker, &sink);

        let mut game = Game::new("relay", "relay", Relay::new("favourite colour?"));
        game.attach();
        game.play_to_next_checkpoint(&session).expect("play");

        assert_eq!(game.status, GameStatus::Paused);
        // greet ran, answer did not: the cursor re-points at the checkpoint.
        assert_eq!(game.process(game.root()).expect("root").step, 1);
        assert!(game.state.answers.is_empty());
    }

    /// Verifies pause/persist/reload/resume is transparent: the resumed game
    /// produces the same answers and result as a straight standalone run.
    #[test]
    fn snapshot_round_trip_is_transparent() {
        let maker = ScriptedDecisionMaker::constant("blue");
        let sink = NoDiscard;
        let session = session(&maker, &sink);

        let mut straight = Game::new("relay", "relay", Relay::new("favourite colour?"));
        straight.play(&session).expect("straight play");

        let mut game = Game::new("relay", "relay", Relay::new("favourite colour?"));
        game.attach();
        game.play_to_next_checkpoint(&session).expect("first segment");
        let bytes = game.snapshot().expect("snapshot");

        let mut resumed: Game<Relay> = Game::from_snapshot(&bytes).expect("reload");
        resumed.attach();
        resumed.status = GameStatus::Resumed;
        resumed.play_to_next_checkpoint(&session).expect("resume");

        assert_eq!(resumed.status, GameStatus::Finished);
        assert_eq!(resumed.state.answers, straight.state.answers);
        assert_eq!(resumed.result, straight.result);
    }

    /// Verifies concurrent reconciliation produces one alternate snapshot per
    /// active participant, differing from the main post-step game only in the
    /// other participants' sub-processes and seats.
    #[test]
    fn concurrent_checkpoint_reconciles_per_participant() {
        let maker = ScriptedDecisionMaker::vote_by_parity();
        let sink = NoDiscard;
        let session = session(&maker, &sink);

        let mut game = Game::new("council", "council", Council::new("adjourn?", 3));
        game.attach();
        game.play_to_next_checkpoint(&session).expect("first segment");
        assert_eq!(game.status, GameStatus::Paused);

        game.status = GameStatus::Resumed;
        game.play_to_next_checkpoint(&session).expect("fan-out segment");
        assert_eq!(game.status, GameStatus::Finished);

        let att = game.take_attachment().expect("attachment");
        assert_eq!(att.records.len(), 3);
        assert_eq!(att.one_old.len(), 3);

        let players: Vec<PlayerId> = att.one_old.iter().map(|(p, _)| *p).collect();
        assert_eq!(players, vec![PlayerId(1), PlayerId(2), PlayerId(3)]);

        for (player, bytes) in &att.one_old {
            let alt: Game<Council> = Game::from_snapshot(bytes).expect("alternate");
            for other in alt.state.players() {
                let ballot = alt
                    .find_subprocess(alt.root(), &format!("ballot_{other}"))
                    .expect("ballot");
                let proc = alt.process(ballot).expect("proc");
                let seat = alt.state.seats.get(&other).expect("seat");
                if other == *player {
                    // This participant acted: cursor advanced, memory kept.
                    assert_eq!(proc.step, 1);
                    assert!(proc.locked);
                    assert_eq!(seat.memory.len(), 1);
                } else {
                    // Peers are rolled back to their pre-step condition.
                    assert_eq!(proc.step, 0);
                    assert!(!proc.locked);
                    assert!(seat.memory.is_empty());
                }
                // Global side effects of the fan-out are kept in every world.
                assert!(
                    alt.process(alt.root())
                        .expect("root")
                        .payload
                        .contains_key(&format!("vote_{other}"))
                );
            }
        }
    }

    /// Verifies duplicate sibling names are rejected as structural errors.
    #[test]
    fn duplicate_subprocess_name_is_fatal() {
        let mut game = Game::new("council", "council", Council::new("adjourn?", 1));
        let root = game.root();
        game.create_subprocess(root, "ballot", Some("b".to_string()), None)
            .expect("first");
        let err = game
            .create_subprocess(root, "ballot", Some("b".to_string()), None)
            .expect_err("duplicate");
        assert!(matches!(err, EngineError::Invariant(_)));
    }

    /// Verifies propagate-up merges child payload into the parent with
    /// last-write-wins per key.
    #[test]
    fn propagate_payload_is_last_write_wins() {
        let mut game = Game::new("council", "council", Council::new("adjourn?", 1));
        let root = game.root();
        let child = game
            .create_subprocess(root, "ballot", None, None)
            .expect("child");

        game.process_mut(root)
            .expect("root")
            .payload
            .insert("round".to_string(), serde_json::json!(1));
        let payload = &mut game.process_mut(child).expect("child").payload;
        payload.insert("round".to_string(), serde_json::json!(2));
        payload.insert("vote_1".to_string(), serde_json::json!("yes"));

        game.propagate_payload(child).expect("propagate");
        let root_payload = &game.process(root).expect("root").payload;
        assert_eq!(root_payload.get("round"), Some(&serde_json::json!(2)));
        assert_eq!(root_payload.get("vote_1"), Some(&serde_json::json!("yes")));
    }

    /// Verifies sequential orchestration chains continuations and looping
    /// wraps the last child back to the first.
    #[test]
    fn orchestration_rewires_continuations() {
        let mut game = Game::new("council", "council", Council::new("adjourn?", 1));
        let root = game.root();
        let a = game
            .create_subprocess(root, "ballot", Some("a".to_string()), None)
            .expect("a");
        let b = game
            .create_subprocess(root, "ballot", Some("b".to_string()), None)
            .expect("b");

        game.run_children_sequential(root).expect("sequential");
        assert_eq!(game.curr, Some(a));
        assert_eq!(game.process(a).expect("a").nxt, Some(b));
        assert_eq!(game.process(b).expect("b").nxt, Some(root));

        game.run_children_looping(root).expect("looping");
        assert_eq!(game.process(b).expect("b").nxt, Some(a));
    }
}
