//! Prompt rendering for step hand-off.

use anyhow::Result;
use minijinja::{Environment, context};
use serde::Serialize;
use serde_json::Value;

use crate::core::types::Step;
use crate::io::step_source::InstructionsDoc;

const INSTRUCTIONS_TEMPLATE: &str = include_str!("prompts/instructions.md");
const STEP_TEMPLATE: &str = include_str!("prompts/step.md");

const DEFAULT_GOAL: &str = "No goal specified";
const DEFAULT_DESCRIPTION: &str = "AI Development Instructions";
const EMPTY_HISTORY: &str = "No previous steps.";

#[derive(Debug, Clone, Serialize)]
struct RequirementLine {
    key: String,
    value: String,
}

/// Inputs for one step prompt.
#[derive(Debug, Clone)]
pub struct PromptInputs<'a> {
    /// Rendered instructions document (see [`render_instructions`]).
    pub instructions: &'a str,
    /// Joined history, `None` before the first step.
    pub history: Option<&'a str>,
    pub user_input: &'a str,
    /// 1-based number of the step about to run.
    pub step_number: usize,
    pub step: Option<&'a Step>,
}

/// Render the step document as markdown.
pub fn render_instructions(doc: &InstructionsDoc) -> Result<String> {
    let requirements: Vec<RequirementLine> = doc
        .requirements
        .iter()
        .map(|(key, value)| RequirementLine {
            key: key.clone(),
            value: match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            },
        })
        .collect();

    render(
        "instructions",
        INSTRUCTIONS_TEMPLATE,
        context! {
            description => doc.description.as_deref().unwrap_or(DEFAULT_DESCRIPTION),
            goal => doc.goal.as_deref().unwrap_or(DEFAULT_GOAL),
            steps => &doc.steps,
            requirements => requirements,
            success_criteria => &doc.success_criteria,
        },
    )
}

/// Render the prompt handed to the step runner.
pub fn render_step_prompt(inputs: &PromptInputs<'_>) -> Result<String> {
    let history = inputs
        .history
        .map(str::trim)
        .filter(|history| !history.is_empty())
        .unwrap_or(EMPTY_HISTORY);
    render(
        "step",
        STEP_TEMPLATE,
        context! {
            instructions => inputs.instructions.trim(),
            history => history,
            user_input => inputs.user_input,
            step_number => inputs.step_number,
            step => inputs.step,
        },
    )
}

fn render(name: &'static str, source: &'static str, ctx: minijinja::Value) -> Result<String> {
    let mut env = Environment::new();
    env.add_template(name, source)?;
    let rendered = env.get_template(name)?.render(ctx)?;
    Ok(rendered)
}
