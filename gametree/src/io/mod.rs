//! Filesystem surfaces of a sampler run: snapshots, archive, config, and the
//! discard log. Everything under here takes paths and does I/O; the engine
//! core never touches the disk directly.

pub mod archive;
pub mod config;
pub mod discard_log;
pub mod snapshot;
