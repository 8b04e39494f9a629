//! Observability for warden: tracing subscriber setup and span attribute
//! names shared by the engine and the server.

pub mod attrs;
pub mod tracing_setup;
