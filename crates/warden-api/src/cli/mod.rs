//! CLI command definitions for the `warden` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod serve;
pub mod webhook;
pub mod workflow;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Compile and run workflow graphs.
#[derive(Parser)]
#[command(name = "warden", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true, env = "WARDEN_CONFIG", default_value = "warden.toml")]
    pub config: PathBuf,

    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Detailed output (-v for verbose, -vv for debug, -vvv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export spans to stdout via OpenTelemetry.
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compile a workflow definition and show its execution plan.
    Validate {
        /// Path to a YAML or JSON workflow definition.
        file: PathBuf,
    },

    /// Compile and execute a workflow definition to completion.
    Run {
        /// Path to a YAML or JSON workflow definition.
        file: PathBuf,

        /// JSON trigger payload, available as `TRIGGER`.
        #[arg(long)]
        trigger: Option<String>,

        /// Dispatch actions to the configured executor instead of in process.
        #[arg(long)]
        remote: bool,
    },

    /// Start the webhook and executor HTTP server.
    Serve {
        /// Bind address (overrides `server.host`).
        #[arg(long, env = "WARDEN_HOST")]
        host: Option<String>,

        /// Port (overrides `server.port`).
        #[arg(long, env = "WARDEN_PORT")]
        port: Option<u16>,

        /// Dispatch actions to the configured executor instead of in process.
        #[arg(long)]
        remote: bool,
    },

    /// Print the webhook secret for a workflow.
    WebhookSecret {
        /// Workflow id.
        workflow_id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_run_with_trigger() {
        let cli = Cli::try_parse_from(["warden", "-vv", "run", "wf.yaml", "--trigger", r#"{"x":1}"#]).unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Run { file, trigger, remote } => {
                assert_eq!(file, PathBuf::from("wf.yaml"));
                assert_eq!(trigger.as_deref(), Some(r#"{"x":1}"#));
                assert!(!remote);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn parses_webhook_secret() {
        let cli = Cli::try_parse_from(["warden", "--json", "webhook-secret", "wf-a"]).unwrap();
        assert!(cli.json);
        assert!(matches!(cli.command, Commands::WebhookSecret { workflow_id } if workflow_id == "wf-a"));
    }
}
