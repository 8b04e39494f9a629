//! Actions that need I/O and therefore live outside `warden-core`.

pub mod http;

use warden_core::registry::ActionRegistry;

/// Register every infra action on `registry`.
pub fn register_all(registry: &ActionRegistry, client: reqwest::Client) {
    for spec in http::http_actions(client) {
        registry.register(spec);
    }
}
