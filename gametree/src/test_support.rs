//! Test-only fakes: scripted decision makers, an in-memory snapshot store,
//! and two toy scenarios small enough to reason about by hand.
//!
//! `Relay` is a single-actor question game with one checkpoint. `Council` is
//! a simultaneous-vote game exercising the concurrent fan-out and
//! reconciliation path. Both are deterministic given a scripted maker.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::core::types::{EngineError, NodeId, PlayerId};
use crate::decision::{
    Completion, DecisionError, DecisionMaker, DiscardSink, DiscardedAttempt, Message,
};
use crate::game::{ActorTurn, Turn};
use crate::io::snapshot::SnapshotStore;
use crate::scenario::{ActorStep, Boundary, Scenario, StepSpec};

/// Build a completion whose raw text equals its content.
pub fn completion(content: &str) -> Completion {
    Completion {
        reasoning: String::new(),
        content: content.to_string(),
        raw: content.to_string(),
    }
}

/// Decision maker backed by a deterministic script over the transcript.
pub struct ScriptedDecisionMaker {
    script: Box<dyn Fn(&[Message]) -> Completion + Send + Sync>,
}

impl ScriptedDecisionMaker {
    pub fn new(script: impl Fn(&[Message]) -> Completion + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
        }
    }

    /// Always answer with the same content.
    pub fn constant(content: &str) -> Self {
        let content = content.to_string();
        Self::new(move |_| completion(&content))
    }

    /// Vote "yes" for odd player ids, "no" for even ones. The last transcript
    /// message must start with `player <id>:`, as `Council` prompts do.
    pub fn vote_by_parity() -> Self {
        Self::new(|messages| {
            let text = messages.last().map_or("", |m| m.content.as_str());
            let id: u32 = text
                .strip_prefix("player ")
                .and_then(|rest| rest.split(':').next())
                .and_then(|digits| digits.trim().parse().ok())
                .unwrap_or(0);
            completion(if id % 2 == 1 { "yes" } else { "no" })
        })
    }
}

impl DecisionMaker for ScriptedDecisionMaker {
    fn complete(&self, messages: &[Message]) -> Result<Completion, DecisionError> {
        Ok((self.script)(messages))
    }
}

/// Wrapper that fails the first `failures` calls with a malfunction before
/// delegating to the inner maker.
pub struct FlakyDecisionMaker<M> {
    failures: u32,
    calls: AtomicU32,
    inner: M,
}

impl<M: DecisionMaker> FlakyDecisionMaker<M> {
    pub fn new(failures: u32, inner: M) -> Self {
        Self {
            failures,
            calls: AtomicU32::new(0),
            inner,
        }
    }
}

impl<M: DecisionMaker> DecisionMaker for FlakyDecisionMaker<M> {
    fn complete(&self, messages: &[Message]) -> Result<Completion, DecisionError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(DecisionError::Malfunction(format!("synthetic outage {call}")));
        }
        self.inner.complete(messages)
    }
}

/// Discard sink that keeps serialized discards in memory.
#[derive(Default)]
pub struct CollectingDiscardSink {
    entries: Mutex<Vec<String>>,
}

impl CollectingDiscardSink {
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().expect("sink mutex").clone()
    }
}

impl DiscardSink for CollectingDiscardSink {
    fn record(&self, attempt: &DiscardedAttempt<'_>) -> std::io::Result<()> {
        let line = serde_json::to_string(attempt).map_err(std::io::Error::other)?;
        self.entries
            .lock()
            .map_err(|_| std::io::Error::other("sink mutex poisoned"))?
            .push(line);
        Ok(())
    }
}

/// Snapshot store over a hash map, for tests that never touch the disk.
#[derive(Default)]
pub struct MemorySnapshotStore {
    blobs: Mutex<HashMap<NodeId, Vec<u8>>>,
}

impl SnapshotStore for MemorySnapshotStore {
    fn write(&self, id: &NodeId, bytes: &[u8]) -> anyhow::Result<()> {
        self.blobs
            .lock()
            .expect("store mutex")
            .insert(id.clone(), bytes.to_vec());
        Ok(())
    }

    fn read(&self, id: &NodeId) -> anyhow::Result<Vec<u8>> {
        self.blobs
            .lock()
            .expect("store mutex")
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow!("no snapshot for node {id}"))
    }
}

/// Single-actor toy scenario: greet, answer one question at a checkpoint,
/// then wrap up with a result counting the answers.
#[derive(Debug, Serialize, Deserialize)]
pub struct Relay {
    pub question: String,
    pub answers: Vec<String>,
}

impl Relay {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answers: Vec::new(),
        }
    }
}

fn relay_greet(turn: &mut Turn<'_, Relay>) -> Result<(), EngineError> {
    turn.payload_mut()?.insert("greeted".to_string(), json!(true));
    Ok(())
}

fn relay_answer(turn: &mut Turn<'_, Relay>) -> Result<(), EngineError> {
    let messages = [
        Message::system("answer in one word"),
        Message::user(turn.state().question.clone()),
    ];
    let (_, answer) = turn.decide(Some(PlayerId(1)), &messages, |c| {
        let trimmed = c.content.trim();
        if trimmed.is_empty() {
            Err(DecisionError::Malformed("empty answer".to_string()))
        } else {
            Ok(trimmed.to_string())
        }
    })?;
    turn.state_mut().answers.push(answer);
    Ok(())
}

fn relay_wrap(turn: &mut Turn<'_, Relay>) -> Result<(), EngineError> {
    let count = turn.state().answers.len() as f64;
    turn.finish(BTreeMap::from([("answers".to_string(), count)]));
    Ok(())
}

static RELAY_STEPS: [StepSpec<Relay>; 3] = [
    StepSpec {
        name: "greet",
        boundary: Boundary::Plain,
        run: relay_greet,
    },
    StepSpec {
        name: "answer",
        boundary: Boundary::Checkpoint,
        run: relay_answer,
    },
    StepSpec {
        name: "wrap",
        boundary: Boundary::Plain,
        run: relay_wrap,
    },
];

impl Scenario for Relay {
    type Seat = ();

    fn sequence(kind: &str) -> Option<&'static [StepSpec<Self>]> {
        match kind {
            "relay" => Some(&RELAY_STEPS),
            _ => None,
        }
    }

    fn actor_sequence(_kind: &str) -> Option<&'static [ActorStep<Self>]> {
        None
    }

    fn detach_seat(&mut self, _player: PlayerId) -> Result<Self::Seat, EngineError> {
        Ok(())
    }

    fn attach_seat(&mut self, _player: PlayerId, _seat: Self::Seat) {}

    fn restore_player(&mut self, _player: PlayerId, _other: &Self) {}

    fn players(&self) -> Vec<PlayerId> {
        vec![PlayerId(1)]
    }

    fn observable_state(&self) -> Value {
        json!({ "question": self.question, "answers": self.answers })
    }
}

/// Private per-participant state of a [`Council`] member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouncilSeat {
    pub memory: Vec<String>,
}

/// Simultaneous-vote toy scenario: convene one ballot sub-process per
/// member, cast votes concurrently, then tally.
#[derive(Debug, Serialize, Deserialize)]
pub struct Council {
    pub motion: String,
    pub seats: BTreeMap<PlayerId, CouncilSeat>,
}

impl Council {
    pub fn new(motion: impl Into<String>, members: u32) -> Self {
        let seats = (1..=members)
            .map(|id| (PlayerId(id), CouncilSeat { memory: Vec::new() }))
            .collect();
        Self {
            motion: motion.into(),
            seats,
        }
    }
}

fn council_convene(turn: &mut Turn<'_, Council>) -> Result<(), EngineError> {
    let players = turn.state().players();
    for player in players {
        turn.create_subprocess("ballot", Some(format!("ballot_{player}")), Some(player))?;
    }
    Ok(())
}

fn council_cast(turn: &mut Turn<'_, Council>) -> Result<(), EngineError> {
    turn.run_concurrent()
}

fn council_tally(turn: &mut Turn<'_, Council>) -> Result<(), EngineError> {
    let payload = turn.game.process(turn.pid)?.payload.clone();
    let mut yes = 0.0;
    let mut no = 0.0;
    for (key, value) in &payload {
        if key.starts_with("vote_") {
            match value.as_str() {
                Some("yes") => yes += 1.0,
                Some("no") => no += 1.0,
                _ => {}
            }
        }
    }
    turn.finish(BTreeMap::from([
        ("yes".to_string(), yes),
        ("no".to_string(), no),
    ]));
    Ok(())
}

fn ballot_choose(turn: &mut ActorTurn<'_, Council>) -> Result<(), EngineError> {
    let player = turn.player()?;
    let motion = turn.view.motion.clone();
    let messages = [
        Message::system("you are a council member"),
        Message::user(format!("player {player}: vote yes or no on {motion}")),
    ];
    let (_, vote) = turn.decide(&messages, |c| {
        let choice = c.content.trim().to_lowercase();
        if choice == "yes" || choice == "no" {
            Ok(choice)
        } else {
            Err(DecisionError::BadChoice {
                choice,
                offered: vec!["yes".to_string(), "no".to_string()],
            })
        }
    })?;
    turn.seat.memory.push(format!("voted {vote} on {motion}"));
    turn.proc
        .payload
        .insert(format!("vote_{player}"), json!(vote));
    Ok(())
}

static COUNCIL_STEPS: [StepSpec<Council>; 3] = [
    StepSpec {
        name: "convene",
        boundary: Boundary::Plain,
        run: council_convene,
    },
    StepSpec {
        name: "cast",
        boundary: Boundary::Concurrent,
        run: council_cast,
    },
    StepSpec {
        name: "tally",
        boundary: Boundary::Plain,
        run: council_tally,
    },
];

static BALLOT_STEPS: [ActorStep<Council>; 1] = [ActorStep {
    name: "choose",
    run: ballot_choose,
}];

impl Scenario for Council {
    type Seat = CouncilSeat;

    fn sequence(kind: &str) -> Option<&'static [StepSpec<Self>]> {
        match kind {
            "council" => Some(&COUNCIL_STEPS),
            _ => None,
        }
    }

    fn actor_sequence(kind: &str) -> Option<&'static [ActorStep<Self>]> {
        match kind {
            "ballot" => Some(&BALLOT_STEPS),
            _ => None,
        }
    }

    fn detach_seat(&mut self, player: PlayerId) -> Result<Self::Seat, EngineError> {
        self.seats
            .remove(&player)
            .ok_or_else(|| EngineError::invariant(format!("no seat for player {player}")))
    }

    fn attach_seat(&mut self, player: PlayerId, seat: Self::Seat) {
        self.seats.insert(player, seat);
    }

    fn restore_player(&mut self, player: PlayerId, other: &Self) {
        if let Some(seat) = other.seats.get(&player) {
            self.seats.insert(player, seat.clone());
        }
    }

    fn players(&self) -> Vec<PlayerId> {
        self.seats.keys().copied().collect()
    }

    fn observable_state(&self) -> Value {
        json!({ "motion": self.motion, "members": self.seats.len() })
    }
}
