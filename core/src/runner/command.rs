//! Command vectors for remote and local execution.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Tokens that delimit sequential sub-commands inside one command line.
pub const SHELL_COMMAND_SEPARATORS: [&str; 3] = [";", "&&", "||"];

/// Non-interactive sudo reading the password from stdin with an empty prompt.
pub const SUDO_PREFIX: [&str; 4] = ["sudo", "-S", "-p", "''"];

lazy_static! {
    static ref QUOTED_TOKEN: Regex = Regex::new(r#"([^"]\S*|".+?")\s*"#).expect("valid regex");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    User,
    SuperUser,
}

/// One command to run on one host.
#[derive(Clone)]
pub struct CommandSpec {
    pub host: String,
    pub user: String,
    pub password: Option<String>,
    pub args: Vec<String>,
    pub mode: ExecutionMode,
    pub working_dir: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
    /// Arguments are already shell words and are passed through unsplit.
    pub shell_words: bool,
}

impl CommandSpec {
    pub fn new(host: impl Into<String>, user: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            password: None,
            args,
            mode: ExecutionMode::User,
            working_dir: None,
            env: BTreeMap::new(),
            timeout: None,
            shell_words: false,
        }
    }

    pub fn local(args: Vec<String>) -> Self {
        Self::new("localhost", "", args)
    }

    pub fn with_password(mut self, password: Option<String>) -> Self {
        self.password = password;
        self
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn as_super_user(self) -> Self {
        self.with_mode(ExecutionMode::SuperUser)
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_shell_words(mut self) -> Self {
        self.shell_words = true;
        self
    }

    pub fn is_super_user(&self) -> bool {
        self.mode == ExecutionMode::SuperUser
    }

    /// Argument vector as it is sent to the shell, sudo-rewritten if needed.
    pub fn effective_args(&self) -> Vec<String> {
        let args = if self.shell_words {
            self.args.clone()
        } else {
            tokenize_args(&self.args)
        };
        if self.is_super_user() {
            insert_sudo_params(&args)
        } else {
            args
        }
    }

    pub fn command_line(&self) -> String {
        self.effective_args().join(" ")
    }
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSpec")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("args", &self.args)
            .field("mode", &self.mode)
            .field("timeout", &self.timeout)
            .field("shell_words", &self.shell_words)
            .finish()
    }
}

pub fn is_separator(token: &str) -> bool {
    SHELL_COMMAND_SEPARATORS.contains(&token)
}

/// Prefixes every sub-command segment with [`SUDO_PREFIX`], not just the first.
pub fn insert_sudo_params(args: &[String]) -> Vec<String> {
    let sudo = SUDO_PREFIX.iter().map(|s| s.to_string());
    let mut out: Vec<String> = sudo.clone().collect();
    out.reserve(args.len());
    for arg in args {
        out.push(arg.clone());
        if is_separator(arg) {
            out.extend(sudo.clone());
        }
    }
    out
}

/// Splits arguments that still contain spaces.
///
/// One pair of surrounding double quotes is stripped and the remainder split
/// on spaces; empty fragments are dropped.
pub fn tokenize_args(args: &[String]) -> Vec<String> {
    args.iter()
        .flat_map(|arg| {
            let arg = arg.trim();
            let arg = arg.strip_prefix('"').unwrap_or(arg);
            let arg = arg.strip_suffix('"').unwrap_or(arg);
            arg.split(' ')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Wraps `value` in single quotes so the shell reads it as one literal word.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// [`shell_quote`] unless `arg` is a plain word the shell reads unchanged.
pub fn quote_arg(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg.chars().all(|c| c.is_ascii_alphanumeric() || "_-./:=@%+,".contains(c));
    if plain {
        arg.to_string()
    } else {
        shell_quote(arg)
    }
}

/// Splits a command template on whitespace, keeping double-quoted runs whole.
pub fn split_command(template: &str) -> Vec<String> {
    QUOTED_TOKEN
        .captures_iter(template.trim())
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}
