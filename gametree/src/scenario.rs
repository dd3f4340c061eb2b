//! The scenario contract: what a concrete game supplies to the engine.
//!
//! A scenario never interprets its own control flow. It hands the engine
//! explicit ordered step tables (function pointers, not name lookup), a
//! projection of its observable state, and hooks for detaching one
//! participant's private state so a concurrent worker can own it exclusively.
//! The engine owns sequencing, checkpointing, and reconciliation.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::core::types::{EngineError, PlayerId};
use crate::game::{ActorTurn, Turn};

/// Checkpoint classification of one step.
///
/// `Plain` steps run unconditionally. `Checkpoint` steps are one-shot suspend
/// points for a single actor. `Concurrent` steps fan out into simultaneous
/// per-participant sub-processes and are reconciled into independently
/// branchable snapshots after the fan-out joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    Plain,
    Checkpoint,
    Concurrent,
}

/// Step function driven on the orchestrator thread, with full game access.
pub type StepFn<S> = fn(&mut Turn<'_, S>) -> Result<(), EngineError>;

/// Step function driven on a concurrent worker thread. It may only touch the
/// worker's own process, its participant's seat, and a shared read-only view.
pub type ActorFn<S> = fn(&mut ActorTurn<'_, S>) -> Result<(), EngineError>;

/// One named step of an orchestrated process sequence.
pub struct StepSpec<S: Scenario> {
    pub name: &'static str,
    pub boundary: Boundary,
    pub run: StepFn<S>,
}

/// One named step of a per-participant concurrent sequence.
pub struct ActorStep<S: Scenario> {
    pub name: &'static str,
    pub run: ActorFn<S>,
}

/// Contract between a concrete game and the engine.
///
/// `Serialize + DeserializeOwned` because the whole scenario state travels
/// inside every game snapshot; `Send + Sync` because concurrent workers read
/// a shared view of it.
pub trait Scenario: Serialize + DeserializeOwned + Send + Sync + Sized + 'static {
    /// Private per-participant state a concurrent worker owns exclusively
    /// (memory, hidden role knowledge). Use `()` when participants carry no
    /// private state.
    type Seat: Send;

    /// Ordered step table for an orchestrated process kind, or `None` if the
    /// kind is not registered (a structural error when reached).
    fn sequence(kind: &str) -> Option<&'static [StepSpec<Self>]>;

    /// Ordered step table for a per-participant concurrent process kind.
    fn actor_sequence(kind: &str) -> Option<&'static [ActorStep<Self>]>;

    /// Move `player`'s private state out of the scenario so a worker thread
    /// can own it for the duration of one concurrent step.
    fn detach_seat(&mut self, player: PlayerId) -> Result<Self::Seat, EngineError>;

    /// Move a detached seat back in after the join barrier.
    fn attach_seat(&mut self, player: PlayerId, seat: Self::Seat);

    /// Overwrite `player`'s private state with its condition in `other`.
    /// Used by reconciliation to roll one participant back to the pre-step
    /// world.
    fn restore_player(&mut self, player: PlayerId, other: &Self);

    /// All participants of this scenario instance.
    fn players(&self) -> Vec<PlayerId>;

    /// Projection of the state every participant can observe. Recorded as
    /// node telemetry after each rollout segment.
    fn observable_state(&self) -> serde_json::Value;
}
