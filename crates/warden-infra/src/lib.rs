//! Infrastructure adapters for warden.
//!
//! The HTTP executor client, configuration loading, registry origins that
//! touch the filesystem or git, webhook secrets and I/O-bound actions.

pub mod actions;
pub mod config;
pub mod executor_client;
pub mod registry;
pub mod webhook;
