use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyOp {
    Register,
    Remove,
    Update,
    Install,
    Uninstall,
    Probe,
    ListImages,
}

impl fmt::Display for TopologyOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TopologyOp::Register => "register",
            TopologyOp::Remove => "remove",
            TopologyOp::Update => "update",
            TopologyOp::Install => "install",
            TopologyOp::Uninstall => "uninstall",
            TopologyOp::Probe => "probe",
            TopologyOp::ListImages => "list-images",
        };
        f.write_str(s)
    }
}

/// Node lifecycle failure with the node and remote exit code attached.
#[derive(Debug, Clone, Error)]
#[error("{op} failed on node '{node}'{}{}: {message}",
    .tool.as_ref().map(|t| format!(" (tool {t})")).unwrap_or_default(),
    .exit_code.map(|c| format!(" [code {c}]")).unwrap_or_default())]
pub struct TopologyError {
    pub op: TopologyOp,
    pub node: String,
    pub exit_code: Option<i32>,
    pub tool: Option<String>,
    pub message: String,
}

impl TopologyError {
    pub fn new(op: TopologyOp, node: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            op,
            node: node.into(),
            exit_code: None,
            tool: None,
            message: message.into(),
        }
    }

    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }
}
