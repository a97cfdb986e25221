use std::path::{Path, PathBuf};

use super::types::AppConfig;

/// Get the default geoflow data directory: ~/.geoflow
pub fn get_geoflow_data_dir() -> anyhow::Result<PathBuf> {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map_err(|_| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(PathBuf::from(home).join(".geoflow"))
}

pub fn load_default() -> anyhow::Result<AppConfig> {
    // ~/.geoflow/config.toml wins over ./config.toml
    let data_dir = get_geoflow_data_dir()?;
    let user_config = data_dir.join("config.toml");
    let local_config = Path::new("config.toml");

    let mut cfg = if user_config.exists() {
        parse_file(&user_config)?
    } else if local_config.exists() {
        parse_file(local_config)?
    } else {
        AppConfig::default()
    };

    if cfg
        .logging
        .directory
        .as_ref()
        .map(|s| s.trim().is_empty())
        .unwrap_or(true)
    {
        cfg.logging.directory = Some(data_dir.join("logs").to_string_lossy().to_string());
    }

    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Loads an explicit config file; environment overrides still apply.
pub fn load_from_path(path: &Path) -> anyhow::Result<AppConfig> {
    let mut cfg = parse_file(path)?;
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

fn parse_file(path: &Path) -> anyhow::Result<AppConfig> {
    let s = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("cannot read {}: {e}", path.display()))?;
    toml::from_str::<AppConfig>(&s)
        .map_err(|e| anyhow::anyhow!("invalid config {}: {e}", path.display()))
}

fn apply_env_overrides(cfg: &mut AppConfig) {
    if let Ok(v) = std::env::var("GEOFLOW_LOG_LEVEL") {
        if !v.trim().is_empty() {
            cfg.logging.level = v;
        }
    }
    if let Ok(v) = std::env::var("GEOFLOW_MAX_CONCURRENCY") {
        match v.trim().parse::<usize>() {
            Ok(n) => cfg.executor.max_concurrency = n,
            Err(_) => tracing::warn!(value = %v, "ignoring invalid GEOFLOW_MAX_CONCURRENCY"),
        }
    }
    if let Ok(v) = std::env::var("GEOFLOW_DOCKER_REGISTRY") {
        if !v.trim().is_empty() {
            cfg.container.registry = Some(v);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::config::types::BackendConfig;
    use crate::runner::ExecutionMode;

    #[test]
    fn empty_file_yields_defaults() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f).unwrap();
        let cfg = parse_file(f.path()).unwrap();
        assert_eq!(cfg.executor.monitor_interval_ms, 5000);
        assert_eq!(cfg.remote.connect_timeout_secs, 1);
        assert_eq!(cfg.retry.strategy, "exponential-backoff");
        assert_eq!(cfg.backends.len(), 1);
        assert!(cfg.topology.master.is_master());
    }

    #[test]
    fn parses_backends_and_tools() {
        let toml = r##"
[executor]
max_concurrency = 4

[[backends]]
provider = "ssh"
hosts = ["worker-1"]

[[backends]]
provider = "grid"
hosts = ["n1", "n2"]
queue = "geo.q"

[topology.master]
hostname = "master"
user = "geo"

[[topology.tools]]
name = "otb"
version = "7.4"

[[topology.tools.install_steps]]
name = "fetch"
invocation = "ssh"
command = "curl -sO #INSTALL_SCRIPTS_ROOT_PATH#/otb.sh"

[[topology.tools.install_steps]]
name = "run"
command = "sh otb.sh #NODE_PROCESSORS_CNT#"
mode = "super_user"
ignore_err = true
"##;
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(toml.as_bytes()).unwrap();
        let cfg = parse_file(f.path()).unwrap();

        assert_eq!(cfg.executor.effective_max_concurrency(), 4);
        assert_eq!(cfg.backends.len(), 2);
        assert_eq!(cfg.backends[0].provider(), "ssh");
        match &cfg.backends[1] {
            BackendConfig::Grid(grid) => {
                assert_eq!(grid.hosts.len(), 2);
                assert_eq!(grid.qsub_bin, "qsub");
            }
            other => panic!("unexpected backend {other:?}"),
        }
        let steps = &cfg.topology.tools[0].install_steps;
        assert_eq!(steps[1].mode, ExecutionMode::SuperUser);
        assert!(steps[1].ignore_err);
        assert_eq!(cfg.topology.master.hostname, "master");
    }

    #[test]
    fn unreadable_file_is_an_error() {
        assert!(load_from_path(Path::new("/nonexistent/geoflow.toml")).is_err());
    }
}
