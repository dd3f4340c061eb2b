//! Resumable game engine with a tree-structured trajectory sampler.
//!
//! A scenario runs as a tree of steppable processes inside a [`game::Game`].
//! Steps marked as checkpoints turn the game into a resumable machine: the
//! sampler plays one segment at a time, persists a full snapshot at every
//! pause, and explores alternative continuations by re-resuming copies of
//! those snapshots under depth and degree budgets. Simultaneous-move steps
//! fan out one worker per participant and are reconciled into independently
//! branchable per-participant histories.
//!
//! The architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (process model, branch-point
//!   selection, shared types). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (snapshot store, archive, config,
//!   discard log). Isolated to enable in-memory fakes in tests.
//!
//! [`game`], [`tree`], and [`sampler`] coordinate core logic with I/O;
//! [`scenario`] and [`decision`] are the two seams a concrete game plugs
//! into.

pub mod core;
pub mod decision;
pub mod game;
pub mod io;
pub mod logging;
pub mod sampler;
pub mod scenario;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tree;
