//! `warden validate` and `warden run`.

use std::path::Path;

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use serde_json::{Value, json};
use warden_core::workflow::definition::load_workflow_file;
use warden_core::workflow::{CompileError, CompiledGraph, RunOutcome, compile};
use warden_observe::attrs;
use warden_types::result::ActionResult;
use warden_types::role::Role;
use warden_types::run::{ActionStatus, RunStatus};

use crate::state::AppState;

/// Service identity for runs started from the command line.
pub const CLI_SERVICE_ID: &str = "warden-cli";

// ---------------------------------------------------------------------------
// Validate
// ---------------------------------------------------------------------------

pub fn handle_validate(file: &Path, json: bool) -> Result<()> {
    let def = load_workflow_file(file).with_context(|| format!("failed to load {}", file.display()))?;
    let graph = match compile(&def) {
        Ok(graph) => graph,
        Err(e) => {
            print_compile_error(&e, json)?;
            bail!("workflow '{}' does not compile", def.id);
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&plan_json(&graph))?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Workflow '{}' v{} compiles",
        style("*").green().bold(),
        style(graph.workflow_id()).cyan(),
        graph.version()
    );
    println!("  Entrypoints: {}", graph.entrypoints().join(", "));
    println!();

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Wave").fg(Color::Cyan),
            Cell::new("Ref"),
            Cell::new("Action"),
            Cell::new("Depends on"),
        ]);
    for (wave, refs) in graph.waves().iter().enumerate() {
        for action_ref in refs {
            let Some(node) = graph.node(action_ref) else {
                continue;
            };
            let upstream: Vec<&str> = node.upstream.iter().map(|d| d.action_ref.as_str()).collect();
            table.add_row(vec![
                Cell::new(wave),
                Cell::new(action_ref),
                Cell::new(&node.definition.action),
                Cell::new(if upstream.is_empty() { "-".to_string() } else { upstream.join(", ") }),
            ]);
        }
    }
    println!("{table}");
    println!();
    Ok(())
}

fn plan_json(graph: &CompiledGraph) -> Value {
    json!({
        "workflow_id": graph.workflow_id(),
        "version": graph.version(),
        "entrypoints": graph.entrypoints(),
        "topological_order": graph.topological_order(),
        "waves": graph.waves(),
    })
}

fn print_compile_error(e: &CompileError, json: bool) -> Result<()> {
    if json {
        let out = match e {
            CompileError::Validation(issues) => json!({
                "error": "ValidationError",
                "issues": issues
                    .iter()
                    .map(|i| json!({ "action_ref": i.action_ref, "message": i.message }))
                    .collect::<Vec<_>>(),
            }),
            CompileError::Cycle(refs) => json!({ "error": "CycleError", "actions": refs }),
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    match e {
        CompileError::Validation(issues) => {
            println!("  {} {} validation issue(s):", style("x").red().bold(), issues.len());
            for issue in issues {
                println!("    - {issue}");
            }
        }
        CompileError::Cycle(refs) => {
            println!(
                "  {} Dependency cycle between: {}",
                style("x").red().bold(),
                refs.join(", ")
            );
        }
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

pub async fn handle_run(state: &AppState, file: &Path, trigger: Option<&str>, json: bool) -> Result<()> {
    let def = load_workflow_file(file).with_context(|| format!("failed to load {}", file.display()))?;
    let graph = compile(&def).with_context(|| format!("workflow '{}' does not compile", def.id))?;
    let trigger: Value = match trigger {
        Some(raw) => serde_json::from_str(raw).context("invalid JSON trigger payload")?,
        None => Value::Null,
    };

    let graph = state.substrate.register(graph);
    tracing::info!(
        { attrs::WORKFLOW_ID } = %graph.workflow_id(),
        { attrs::WORKFLOW_VERSION } = graph.version(),
        { attrs::TRIGGER_TYPE } = attrs::TRIGGER_MANUAL,
        "starting run"
    );
    let outcome = state
        .substrate
        .start_and_wait(graph.workflow_id(), Some(graph.version()), trigger, Role::service(CLI_SERVICE_ID))
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_outcome(&outcome);
    }

    match outcome.status {
        RunStatus::Succeeded => Ok(()),
        other => bail!("run {} finished as {}", outcome.run_id, status_label(other)),
    }
}

fn print_outcome(outcome: &RunOutcome) {
    println!();
    println!(
        "  {} Run {} {}",
        match outcome.status {
            RunStatus::Succeeded => style("*").green().bold(),
            _ => style("x").red().bold(),
        },
        outcome.run_id,
        status_label(outcome.status)
    );
    if let Some(error) = &outcome.error {
        println!("  Error: {error}");
    }
    println!();

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Ref").fg(Color::Cyan),
            Cell::new("Status"),
            Cell::new("Result"),
        ]);
    for (action_ref, status) in &outcome.actions {
        let result = match outcome.results.get(action_ref) {
            Some(ActionResult::Success { result }) => truncate(&result.to_string(), 60),
            Some(ActionResult::Error { error, .. }) => truncate(&error.to_string(), 60),
            None => "-".to_string(),
        };
        table.add_row(vec![Cell::new(action_ref), format_status(*status), Cell::new(result)]);
    }
    println!("{table}");
    println!();
}

fn status_label(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Pending => "pending",
        RunStatus::Running => "running",
        RunStatus::Succeeded => "succeeded",
        RunStatus::Failed => "failed",
        RunStatus::Cancelled => "cancelled",
    }
}

fn format_status(status: ActionStatus) -> Cell {
    match status {
        ActionStatus::Pending => Cell::new("pending").fg(Color::Yellow),
        ActionStatus::Running => Cell::new("running").fg(Color::Blue),
        ActionStatus::Succeeded => Cell::new("succeeded").fg(Color::Green),
        ActionStatus::Failed => Cell::new("failed").fg(Color::Red),
        ActionStatus::Skipped => Cell::new("skipped").fg(Color::DarkYellow),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{head}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use warden_types::config::WardenConfig;

    fn write_def(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    const GOOD: &str = r#"
id: wf-cli
title: CLI
actions:
  - ref: first
    action: core.transform.reshape
    args:
      value: "${{ TRIGGER.n }}"
  - ref: second
    action: core.transform.reshape
    depends_on: [first]
    args:
      value: "${{ ACTIONS.first.result }}"
"#;

    const CYCLIC: &str = r#"
id: wf-cycle
title: Cycle
actions:
  - ref: a
    action: core.transform.reshape
    depends_on: [b]
  - ref: b
    action: core.transform.reshape
    depends_on: [a]
"#;

    #[test]
    fn validate_accepts_good_definition() {
        let file = write_def(GOOD);
        handle_validate(file.path(), true).unwrap();
        handle_validate(file.path(), false).unwrap();
    }

    #[test]
    fn validate_rejects_cycle() {
        let file = write_def(CYCLIC);
        let err = handle_validate(file.path(), true).unwrap_err();
        assert!(err.to_string().contains("wf-cycle"));
    }

    #[test]
    fn plan_lists_order_and_entrypoints() {
        let graph = compile(&load_workflow_file(write_def(GOOD).path()).unwrap()).unwrap();
        let plan = plan_json(&graph);
        assert_eq!(plan["entrypoints"], json!(["first"]));
        assert_eq!(plan["topological_order"], json!(["first", "second"]));
    }

    #[tokio::test]
    async fn run_executes_locally() {
        let state = AppState::init(WardenConfig::default(), false).await.unwrap();
        let file = write_def(GOOD);
        handle_run(&state, file.path(), Some(r#"{"n": 5}"#), true).await.unwrap();
    }

    #[tokio::test]
    async fn run_rejects_bad_trigger_json() {
        let state = AppState::init(WardenConfig::default(), false).await.unwrap();
        let file = write_def(GOOD);
        let err = handle_run(&state, file.path(), Some("{"), true).await.unwrap_err();
        assert!(err.to_string().contains("trigger"));
    }

    #[test]
    fn truncates_long_values() {
        assert_eq!(truncate("abc", 5), "abc");
        assert_eq!(truncate("abcdefgh", 6), "abc...");
    }
}
