//! Repository trait definitions (ports).
//!
//! Storage interfaces the orchestrator and substrate depend on. The core
//! crate never depends on a specific storage technology; [`memory`] provides
//! the in-process implementation used by the local substrate and by tests.

pub mod memory;
pub mod run;

pub use memory::MemoryRunRepository;
pub use run::RunRepository;
