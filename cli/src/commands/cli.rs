use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "geoflow", version, about = "Run and supervise geospatial processing jobs")]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file; defaults to ~/.geoflow/config.toml, then ./config.toml.
    #[arg(long, global = true)]
    pub config: Option<String>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct SubmitArgs {
    /// JSON file holding one job document or an array of them.
    pub jobs: String,

    /// Print every state event as a JSON line while jobs run.
    #[arg(long)]
    pub events: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct RunArgs {
    /// Print every state event as a JSON line.
    #[arg(long)]
    pub events: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct NodeAddArgs {
    pub hostname: String,

    #[arg(long)]
    pub user: String,

    #[arg(long)]
    pub ip: Option<String>,

    /// Falls back to GEOFLOW_SSH_PASSWORD when omitted.
    #[arg(long)]
    pub password: Option<String>,

    #[arg(long, default_value_t = 1)]
    pub processors: u32,

    #[arg(long, default_value_t = 0)]
    pub memory_gb: u32,

    #[arg(long, default_value_t = 0)]
    pub disk_gb: u32,
}

#[derive(Subcommand, Debug, Clone)]
pub enum NodeCommands {
    /// Lists the master and every configured worker.
    List,
    /// Registers a worker and runs the configured installers on it.
    Add(NodeAddArgs),
    /// Runs uninstallers on a worker and deregisters it.
    Remove { hostname: String },
    /// Probes every node over SSH.
    Check,
    /// Copies a local file or directory to a node over SFTP.
    Upload {
        hostname: String,
        local: String,
        /// Existing files of the same name are overwritten.
        remote_dir: String,
    },
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ExecArgs {
    #[arg(long, default_value = "localhost")]
    pub host: String,

    #[arg(long)]
    pub user: Option<String>,

    /// Falls back to GEOFLOW_SSH_PASSWORD when omitted.
    #[arg(long)]
    pub password: Option<String>,

    /// Run every command segment through sudo.
    #[arg(long)]
    pub sudo: bool,

    /// Run through the local process runner instead of SSH.
    #[arg(long)]
    pub local: bool,

    #[arg(long)]
    pub timeout_secs: Option<u64>,

    #[arg(trailing_var_arg = true, required = true)]
    pub args: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Submits jobs and runs them to completion.
    Submit(SubmitArgs),
    /// Worker loop: recovers unfinished jobs and serves the queue until Ctrl-C.
    Run(RunArgs),
    #[command(subcommand)]
    Nodes(NodeCommands),
    /// Lists container images available on the master.
    Images,
    /// Runs one command on a host and streams its output.
    Exec(ExecArgs),
}
