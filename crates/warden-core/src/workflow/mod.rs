//! Workflow engine: definitions, compilation, per-run context, retries,
//! checkpointing and the orchestrator that ties them together.
//!
//! - `definition` -- YAML/JSON parsing and filesystem discovery
//! - `compiler` -- validation and the immutable [`compiler::CompiledGraph`]
//! - `context` -- per-run results, trigger, `ENV`, `VARS` and secrets
//! - `retry` -- retry decisions from a policy and a dispatch error
//! - `checkpoint` -- durable transitions and context snapshots
//! - `orchestrator` -- event-driven execution of a compiled graph

pub mod checkpoint;
pub mod compiler;
pub mod context;
pub mod definition;
pub mod orchestrator;
pub mod retry;

pub use compiler::{CompileError, CompiledGraph, compile};
pub use orchestrator::{Orchestrator, OrchestratorError, OrchestratorOptions, RunOutcome};
