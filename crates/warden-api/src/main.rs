//! warden CLI and HTTP server entry point.
//!
//! Binary name: `warden`
//!
//! Parses CLI arguments, sets up tracing, loads configuration, then
//! dispatches to the command handler or starts the server.

mod cli;
mod http;
mod state;

use clap::Parser;

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    warden_observe::tracing_setup::init_tracing_with_filter(
        cli.otel,
        false,
        warden_observe::tracing_setup::filter_for_verbosity(cli.verbose),
    )
    .map_err(|e| anyhow::anyhow!("failed to initialise tracing: {e}"))?;

    let config = warden_infra::config::load_config(&cli.config).await?;

    let result = match cli.command {
        Commands::Validate { file } => cli::workflow::handle_validate(&file, cli.json),

        Commands::Run { file, trigger, remote } => {
            let state = AppState::init(config, remote).await?;
            cli::workflow::handle_run(&state, &file, trigger.as_deref(), cli.json).await
        }

        Commands::Serve { host, port, remote } => {
            let state = AppState::init(config, remote).await?;
            cli::serve::handle_serve(state, host, port).await
        }

        Commands::WebhookSecret { workflow_id } => cli::webhook::handle_webhook_secret(&config, &workflow_id, cli.json),
    };

    warden_observe::tracing_setup::shutdown_tracing();
    result
}
