//! Task prompt composition.

use anyhow::Result;
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::debug;

use crate::core::contract::Contract;
use crate::core::signals::SIGNAL_DONE_TOOL;
use crate::core::types::Task;
use crate::io::skills::LoadedSkills;

const TASK_TEMPLATE: &str = include_str!("prompts/task.md");

#[derive(Debug, Clone, Serialize)]
struct TaskContext<'a> {
    id: &'a str,
    description: &'a str,
    instruction: &'a str,
}

/// Everything a task prompt is rendered from.
#[derive(Debug, Clone, Copy)]
pub struct PromptInputs<'a> {
    pub task: &'a Task,
    pub contracts: &'a [&'a Contract],
    pub skills: &'a LoadedSkills,
}

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("task", TASK_TEMPLATE)
            .expect("task template should be valid");
        Self { env }
    }

    fn render_task(&self, input: &PromptInputs<'_>) -> Result<String> {
        let task = input.task;
        let template = self.env.get_template("task")?;
        let rendered = template.render(context! {
            task => TaskContext {
                id: &task.id,
                description: &task.description,
                instruction: task.instruction.trim(),
            },
            files => task.files.as_deref(),
            todo_ids => task.declared_todo_ids(),
            contracts => input.contracts,
            skills => &input.skills.found,
            missing_skills => &input.skills.missing,
            signal_tool => SIGNAL_DONE_TOOL,
        })?;
        Ok(rendered)
    }
}

/// Render the prompt sent to a task's session.
pub fn build_task_prompt(input: &PromptInputs<'_>) -> Result<String> {
    let rendered = PromptEngine::new().render_task(input)?;
    let prompt = collapse_blank_lines(&rendered);
    debug!(task_id = %input.task.id, bytes = prompt.len(), "rendered task prompt");
    Ok(prompt)
}

fn collapse_blank_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out.trim().to_string() + "\n"
}
