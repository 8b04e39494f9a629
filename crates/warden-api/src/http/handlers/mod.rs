pub mod executor;
pub mod health;
pub mod webhook;
