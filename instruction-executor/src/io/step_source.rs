//! Loading the externally owned step document (`instructions.json`).
//!
//! The server only ever reads this file. A missing file means zero steps; a
//! malformed one is an error the caller renders as text.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use jsonschema::Draft;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::core::types::Step;
use crate::io::prompt::render_instructions;

const INSTRUCTIONS_SCHEMA: &str = include_str!("../../schemas/instructions.schema.json");

pub const DEFAULT_FILE_NAME: &str = "instructions.json";

/// Parsed step document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstructionsDoc {
    #[serde(default)]
    pub goal: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub requirements: Map<String, Value>,
    #[serde(default)]
    pub success_criteria: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepSource {
    path: PathBuf,
}

impl StepSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Pick the step document location.
    ///
    /// An explicit path always wins. Otherwise `cwd/instructions.json`, then
    /// the nearest ancestor holding one, then `cwd/instructions.json` as an
    /// (absent) fallback.
    pub fn resolve(explicit: Option<&Path>, cwd: &Path) -> Self {
        if let Some(path) = explicit {
            return Self::new(cwd.join(path));
        }
        let local = cwd.join(DEFAULT_FILE_NAME);
        if local.is_file() {
            return Self::new(local);
        }
        for dir in cwd.ancestors().skip(1) {
            let candidate = dir.join(DEFAULT_FILE_NAME);
            if candidate.is_file() {
                debug!(path = %candidate.display(), "found step source in ancestor");
                return Self::new(candidate);
            }
        }
        Self::new(local)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and validate the document. `Ok(None)` when the file is absent.
    pub fn load(&self) -> Result<Option<InstructionsDoc>> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "step source absent");
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("read {}", self.path.display()))?;
        let doc = parse_instructions(&raw)
            .with_context(|| format!("invalid step source {}", self.path.display()))?;
        debug!(steps = doc.steps.len(), "step source loaded");
        Ok(Some(doc))
    }

    /// Steps from the document; empty when the file is absent.
    pub fn load_steps(&self) -> Result<Vec<Step>> {
        Ok(self.load()?.map(|doc| doc.steps).unwrap_or_default())
    }

    /// Markdown rendering for prompts and state snapshots. Never fails:
    /// absence and errors are rendered as text.
    pub fn render(&self) -> String {
        match self.load() {
            Ok(Some(doc)) => match render_instructions(&doc) {
                Ok(rendered) => rendered,
                Err(err) => format!("# Error reading instructions\n\n{err:#}"),
            },
            Ok(None) => format!(
                "# No instructions found\n\nPlease create an {DEFAULT_FILE_NAME} file."
            ),
            Err(err) => format!("# Error reading instructions\n\n{err:#}"),
        }
    }
}

/// Parse and validate a step document: schema conformance, then typed parse.
pub fn parse_instructions(raw: &str) -> Result<InstructionsDoc> {
    let instance: Value = serde_json::from_str(raw).context("parse instructions json")?;
    let schema: Value =
        serde_json::from_str(INSTRUCTIONS_SCHEMA).context("parse instructions schema")?;
    validate_schema(&instance, &schema)?;
    let doc: InstructionsDoc =
        serde_json::from_value(instance).context("parse instructions document")?;
    Ok(doc)
}

/// Validate JSON instance against a JSON Schema (Draft 2020-12).
fn validate_schema(instance: &Value, schema: &Value) -> Result<()> {
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(schema)
        .context("compile json schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("schema validation failed:\n- {}", messages.join("\n- "));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "goal": "Ship the page",
        "description": "Website build",
        "steps": [
            {"step": 1, "description": "read file A"},
            {"step": 2, "description": "write file B"}
        ],
        "requirements": {"language": "html"},
        "success_criteria": ["page renders"]
    }"#;

    #[test]
    fn parses_full_document() {
        let doc = parse_instructions(SAMPLE).expect("parse");
        assert_eq!(doc.goal.as_deref(), Some("Ship the page"));
        assert_eq!(doc.steps.len(), 2);
        assert_eq!(doc.steps[1].description, "write file B");
        assert_eq!(doc.requirements["language"], "html");
        assert_eq!(doc.success_criteria, vec!["page renders".to_string()]);
    }

    #[test]
    fn optional_fields_default() {
        let doc = parse_instructions(r#"{"steps": []}"#).expect("parse");
        assert_eq!(doc.goal, None);
        assert!(doc.steps.is_empty());
        assert!(doc.requirements.is_empty());
    }

    #[test]
    fn schema_rejects_step_zero() {
        let err = parse_instructions(r#"{"steps": [{"step": 0, "description": "x"}]}"#)
            .unwrap_err();
        assert!(format!("{err:#}").contains("schema validation failed"));
    }

    #[test]
    fn schema_rejects_missing_description() {
        let err = parse_instructions(r#"{"steps": [{"step": 1}]}"#).unwrap_err();
        assert!(format!("{err:#}").contains("description"));
    }

    #[test]
    fn absent_file_is_zero_steps() {
        let temp = tempfile::tempdir().expect("tempdir");
        let source = StepSource::new(temp.path().join(DEFAULT_FILE_NAME));
        assert_eq!(source.load().expect("load"), None);
        assert!(source.load_steps().expect("steps").is_empty());
        assert!(source.render().starts_with("# No instructions found"));
    }

    #[test]
    fn malformed_file_renders_error_text() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(DEFAULT_FILE_NAME);
        fs::write(&path, "{ not json").expect("write");
        let source = StepSource::new(&path);

        assert!(source.load_steps().is_err());
        let rendered = source.render();
        assert!(rendered.starts_with("# Error reading instructions"));
        assert!(rendered.contains("parse instructions json"));
    }

    #[test]
    fn resolve_prefers_explicit_then_local_then_ancestor() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        let nested = root.join("a").join("b");
        fs::create_dir_all(&nested).expect("mkdir");
        fs::write(root.join(DEFAULT_FILE_NAME), SAMPLE).expect("write");

        let explicit = StepSource::resolve(Some(Path::new("custom.json")), &nested);
        assert_eq!(explicit.path(), nested.join("custom.json"));

        let ancestor = StepSource::resolve(None, &nested);
        assert_eq!(ancestor.path(), root.join(DEFAULT_FILE_NAME));

        fs::write(nested.join(DEFAULT_FILE_NAME), SAMPLE).expect("write");
        let local = StepSource::resolve(None, &nested);
        assert_eq!(local.path(), nested.join(DEFAULT_FILE_NAME));
    }
}
