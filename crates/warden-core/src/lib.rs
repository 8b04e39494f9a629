//! Workflow engine core for warden.
//!
//! Pure engine logic and the ports the infrastructure layer implements. It
//! depends on `warden-types` and never on `warden-infra` or any network
//! client.

pub mod dispatch;
pub mod expression;
pub mod registry;
pub mod repository;
pub mod substrate;
pub mod workflow;
