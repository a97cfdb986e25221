use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::{Captures, Regex};

use crate::error::ExecError;
use crate::model::ExecutionTask;
use crate::runner::split_command;

lazy_static! {
    static ref PLACEHOLDER: Regex =
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
            .expect("valid regex");
}

/// Turns a component task into the argument vector a backend runs.
#[async_trait]
pub trait CommandBuilder: Send + Sync {
    async fn build(&self, task: &ExecutionTask) -> Result<Vec<String>, ExecError>;
}

/// Fills `$name` / `${name}` placeholders of the component's command
/// template from the task's input parameters, then splits the result keeping
/// double-quoted runs whole. Unknown placeholders are left untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateCommandBuilder;

impl TemplateCommandBuilder {
    pub fn render(&self, task: &ExecutionTask) -> Result<String, ExecError> {
        let component = task.processing_component().ok_or_else(|| {
            ExecError::Execution(format!("task {} has no processing component", task.id))
        })?;
        let rendered = PLACEHOLDER.replace_all(&component.command_template, |caps: &Captures| {
            let name = caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str()).unwrap_or_default();
            match task.input_parameters.get(name) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            }
        });
        Ok(rendered.into_owned())
    }
}

#[async_trait]
impl CommandBuilder for TemplateCommandBuilder {
    async fn build(&self, task: &ExecutionTask) -> Result<Vec<String>, ExecError> {
        let argv = split_command(&self.render(task)?);
        if argv.is_empty() {
            return Err(ExecError::Execution(format!(
                "task {} renders an empty command",
                task.id
            )));
        }
        Ok(argv)
    }
}
