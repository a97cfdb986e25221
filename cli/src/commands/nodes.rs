//! Node registry commands.
use std::path::Path;

use geoflow_core::error::CliError;
use geoflow_core::model::{NodeDescription, ServiceStatus, ToolInstallStatus};
use geoflow_core::{AppContext, ExecError};

use crate::commands::cli::{NodeAddArgs, NodeCommands};

pub const PASSWORD_ENV: &str = "GEOFLOW_SSH_PASSWORD";

pub async fn handle_nodes(cmd: NodeCommands, ctx: &AppContext) -> Result<i32, CliError> {
    let topology = ctx.topology();
    topology
        .seed(ctx.cfg().topology.nodes.clone())
        .await
        .map_err(ExecError::from)?;
    topology.initialize().await.map_err(ExecError::from)?;

    match cmd {
        NodeCommands::List => {
            for node in topology.list().await {
                print_node(&node);
            }
            Ok(0)
        }
        NodeCommands::Add(args) => {
            let node = node_from_args(args);
            let statuses = topology.add(node).await.map_err(ExecError::from)?;
            Ok(print_statuses(&statuses))
        }
        NodeCommands::Remove { hostname } => {
            let statuses = topology.remove(&hostname).await.map_err(ExecError::from)?;
            Ok(print_statuses(&statuses))
        }
        NodeCommands::Check => {
            let mut unreachable = 0;
            for (hostname, reachable) in topology.check_reachability().await {
                println!("{hostname}\t{}", if reachable { "reachable" } else { "unreachable" });
                if !reachable {
                    unreachable += 1;
                }
            }
            Ok(if unreachable == 0 { 0 } else { 1 })
        }
        NodeCommands::Upload {
            hostname,
            local,
            remote_dir,
        } => {
            let node = topology
                .get(&hostname)
                .await
                .ok_or_else(|| CliError::Command(format!("unknown node {hostname}")))?;
            ctx.services()
                .remote_runner
                .upload(
                    node.address(),
                    &node.user,
                    node.password.as_deref(),
                    Path::new(&local),
                    &remote_dir,
                )
                .await?;
            println!("{local}\t{hostname}:{remote_dir}");
            Ok(0)
        }
    }
}

pub fn node_from_args(args: NodeAddArgs) -> NodeDescription {
    let mut node = NodeDescription::new(args.hostname, args.user);
    node.ip = args.ip;
    node.password = args.password.or_else(|| std::env::var(PASSWORD_ENV).ok());
    node.processors = args.processors.max(1);
    node.memory_gb = args.memory_gb;
    node.disk_gb = args.disk_gb;
    node
}

fn print_node(node: &NodeDescription) {
    let role = if node.is_master() { "master" } else { "worker" };
    let services = node
        .services
        .iter()
        .map(|s| format!("{}={:?}", s.service, s.status))
        .collect::<Vec<_>>()
        .join(",");
    println!(
        "{}\t{}\t{}@{}\tcpus={}\tactive={}\t{}",
        node.hostname,
        role,
        node.user,
        node.address(),
        node.processors,
        node.active,
        if services.is_empty() { "-" } else { &services }
    );
}

/// Prints installer results; returns 1 when any tool ended in error.
fn print_statuses(statuses: &[ToolInstallStatus]) -> i32 {
    let mut failed = false;
    for status in statuses {
        match &status.reason {
            Some(reason) => println!("{}\t{:?}\t{reason}", status.tool_name, status.status),
            None => println!("{}\t{:?}", status.tool_name, status.status),
        }
        failed |= status.status == ServiceStatus::Error;
    }
    i32::from(failed)
}
