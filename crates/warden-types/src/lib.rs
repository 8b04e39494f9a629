//! Shared domain types for warden.
//!
//! Workflow definitions, action results, run records, roles, retry policy and
//! configuration used across the engine, adapters and application layer.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod result;
pub mod retry;
pub mod role;
pub mod run;
pub mod workflow;
