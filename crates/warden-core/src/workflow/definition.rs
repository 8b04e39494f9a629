//! Workflow definition loading.
//!
//! Converts between YAML/JSON documents and [`WorkflowDefinition`], and
//! discovers definition files on disk. Structural validation (refs, edges,
//! expressions, cycles) is the compiler's job; this module only parses.

use std::path::{Path, PathBuf};

use thiserror::Error;
use warden_types::workflow::WorkflowDefinition;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors raised while reading a workflow definition.
#[derive(Debug, Error)]
pub enum DefinitionError {
    /// YAML/JSON parse failure.
    #[error("failed to parse workflow definition: {0}")]
    Parse(String),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML document into a workflow definition.
pub fn parse_workflow_yaml(yaml: &str) -> Result<WorkflowDefinition, DefinitionError> {
    serde_yaml_ng::from_str(yaml).map_err(|e| DefinitionError::Parse(e.to_string()))
}

/// Parse a JSON document into a workflow definition.
pub fn parse_workflow_json(json: &str) -> Result<WorkflowDefinition, DefinitionError> {
    serde_json::from_str(json).map_err(|e| DefinitionError::Parse(e.to_string()))
}

/// Serialize a definition back to YAML.
pub fn serialize_workflow_yaml(def: &WorkflowDefinition) -> Result<String, DefinitionError> {
    serde_yaml_ng::to_string(def).map_err(|e| DefinitionError::Parse(e.to_string()))
}

// ---------------------------------------------------------------------------
// Filesystem
// ---------------------------------------------------------------------------

fn is_json(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "json")
}

fn is_definition_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| matches!(ext, "yaml" | "yml" | "json"))
}

/// Load a definition from a `.yaml`, `.yml` or `.json` file.
pub fn load_workflow_file(path: &Path) -> Result<WorkflowDefinition, DefinitionError> {
    let content = std::fs::read_to_string(path)?;
    if is_json(path) {
        parse_workflow_json(&content)
    } else {
        parse_workflow_yaml(&content)
    }
}

/// Discover every definition under `base_dir`, recursively.
///
/// Files that fail to parse are logged and skipped so one bad file does not
/// hide the rest. A missing directory yields an empty list.
pub fn discover_workflows(
    base_dir: &Path,
) -> Result<Vec<(PathBuf, WorkflowDefinition)>, DefinitionError> {
    let mut results = Vec::new();
    if !base_dir.exists() {
        return Ok(results);
    }
    discover_recursive(base_dir, &mut results)?;
    results.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(results)
}

fn discover_recursive(
    dir: &Path,
    results: &mut Vec<(PathBuf, WorkflowDefinition)>,
) -> Result<(), DefinitionError> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            discover_recursive(&path, results)?;
        } else if is_definition_file(&path) {
            match load_workflow_file(&path) {
                Ok(def) => results.push((path, def)),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unparseable workflow file");
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
id: wf-minimal
title: Minimal
actions:
  - ref: first
    action: core.transform.reshape
    args:
      value: 1
"#;

    #[test]
    fn test_parse_yaml() {
        let def = parse_workflow_yaml(MINIMAL).unwrap();
        assert_eq!(def.id, "wf-minimal");
        assert_eq!(def.actions[0].action_ref, "first");
    }

    #[test]
    fn test_parse_json() {
        let json = r#"{"id": "wf-json", "title": "J", "actions": [{"ref": "a", "action": "core.transform.reshape"}]}"#;
        let def = parse_workflow_json(json).unwrap();
        assert_eq!(def.id, "wf-json");
        assert!(def.actions[0].args.is_empty());
    }

    #[test]
    fn test_parse_error_is_reported() {
        let err = parse_workflow_yaml("id: [unclosed").unwrap_err();
        assert!(matches!(err, DefinitionError::Parse(_)));
    }

    #[test]
    fn test_yaml_round_trip_preserves_actions() {
        let def = parse_workflow_yaml(MINIMAL).unwrap();
        let yaml = serialize_workflow_yaml(&def).unwrap();
        let back = parse_workflow_yaml(&yaml).unwrap();
        assert_eq!(back.actions.len(), 1);
        assert_eq!(back.actions[0].args["value"], 1);
    }

    #[test]
    fn test_discover_skips_bad_files_and_recurses() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("good.yaml"), MINIMAL).unwrap();
        std::fs::write(dir.path().join("bad.yml"), "::: not yaml").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        let nested = dir.path().join("team");
        std::fs::create_dir(&nested).unwrap();
        std::fs::write(
            nested.join("other.json"),
            r#"{"id": "wf-nested", "title": "N", "actions": []}"#,
        )
        .unwrap();

        let found = discover_workflows(dir.path()).unwrap();
        let ids: Vec<&str> = found.iter().map(|(_, d)| d.id.as_str()).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"wf-minimal"));
        assert!(ids.contains(&"wf-nested"));
    }

    #[test]
    fn test_discover_missing_dir_is_empty() {
        let found = discover_workflows(Path::new("/nonexistent/warden/workflows")).unwrap();
        assert!(found.is_empty());
    }
}
