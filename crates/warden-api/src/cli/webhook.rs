//! `warden webhook-secret`.

use anyhow::{Context, Result, bail};
use console::style;
use secrecy::SecretString;
use serde_json::json;
use warden_infra::webhook::WebhookSigner;
use warden_types::config::WardenConfig;

pub fn handle_webhook_secret(config: &WardenConfig, workflow_id: &str, json: bool) -> Result<()> {
    let secret = derive_secret(config, workflow_id)?;
    if json {
        let out = json!({
            "workflow_id": workflow_id,
            "secret": secret,
            "path": format!("/webhooks/{workflow_id}/{secret}"),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!();
        println!("  Webhook secret for '{}':", style(workflow_id).cyan());
        println!();
        println!("  {}", style(&secret).yellow().bold());
        println!();
        println!("  POST /webhooks/{workflow_id}/{secret}");
        println!();
    }
    Ok(())
}

fn derive_secret(config: &WardenConfig, workflow_id: &str) -> Result<String> {
    let Some(key) = &config.server.signing_secret else {
        bail!("no signing secret configured (set server.signing_secret or WARDEN__SIGNING_SECRET)");
    };
    WebhookSigner::new(SecretString::from(key.clone()))
        .secret_for(workflow_id)
        .context("failed to derive webhook secret")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_signing_secret() {
        let err = derive_secret(&WardenConfig::default(), "wf-a").unwrap_err();
        assert!(err.to_string().contains("signing secret"));
    }

    #[test]
    fn derives_stable_hex_secret() {
        let mut config = WardenConfig::default();
        config.server.signing_secret = Some("k".to_string());
        let a = derive_secret(&config, "wf-a").unwrap();
        assert_eq!(a.len(), 64);
        assert_eq!(a, derive_secret(&config, "wf-a").unwrap());
        assert_ne!(a, derive_secret(&config, "wf-b").unwrap());
    }
}
