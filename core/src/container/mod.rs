//! Builds container runtime invocations for containerized components.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ExecError;
use crate::model::ContainerRef;
use crate::runner::quote_arg;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerRuntime {
    #[default]
    Docker,
    Kubernetes,
}

impl std::fmt::Display for ContainerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerRuntime::Docker => write!(f, "docker"),
            ContainerRuntime::Kubernetes => write!(f, "kubernetes"),
        }
    }
}

/// Container lifecycle actions beyond `run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerAction {
    Pause,
    Unpause,
    Stop,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    #[serde(default)]
    pub runtime: ContainerRuntime,
    pub image: String,
    #[serde(default)]
    pub registry: Option<String>,
    /// Container name, used to address it for pause and stop.
    #[serde(default)]
    pub name: Option<String>,
    /// Extra `run` options placed right after `run`.
    #[serde(default)]
    pub run_args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Host path to container path.
    #[serde(default)]
    pub volumes: BTreeMap<String, String>,
    /// Command passed to the image entry point.
    #[serde(default)]
    pub args: Vec<String>,
}

impl ContainerSpec {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Self::default()
        }
    }

    /// Spec for a component's container reference running `args`.
    pub fn from_ref(container: &ContainerRef, args: Vec<String>) -> Self {
        Self {
            image: container.image.clone(),
            registry: container.registry.clone(),
            env: container.env.clone(),
            volumes: container.volumes.clone(),
            args,
            ..Self::default()
        }
    }

    pub fn with_runtime(mut self, runtime: ContainerRuntime) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn with_registry(mut self, registry: impl Into<String>) -> Self {
        self.registry = Some(registry.into());
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_run_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.run_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_volume(mut self, host: impl Into<String>, container: impl Into<String>) -> Self {
        self.volumes.insert(host.into(), container.into());
        self
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// `[registry/]image`; an unset or blank registry leaves the image as is.
    pub fn image_ref(&self) -> String {
        match self.registry.as_deref().map(|r| r.trim().trim_end_matches('/')) {
            Some(registry) if !registry.is_empty() => format!("{registry}/{}", self.image),
            _ => self.image.clone(),
        }
    }
}

/// Argument vector that runs `spec`.
///
/// Docker yields `docker run <run args> [--name N] -e K=V… -v S:D… [registry/]image args…`.
/// Kubernetes targets are not supported yet and yield `NotImplemented`, so
/// callers fail the task instead of running a malformed command.
pub fn build(spec: &ContainerSpec) -> Result<Vec<String>, ExecError> {
    match spec.runtime {
        ContainerRuntime::Docker => build_docker(spec),
        ContainerRuntime::Kubernetes => Err(ExecError::NotImplemented(
            "kubernetes container invocation".to_string(),
        )),
    }
}

fn build_docker(spec: &ContainerSpec) -> Result<Vec<String>, ExecError> {
    if spec.image.trim().is_empty() {
        return Err(ExecError::Execution("container image is not set".to_string()));
    }
    let mut argv = vec!["docker".to_string(), "run".to_string()];
    argv.extend(spec.run_args.iter().cloned());
    if let Some(name) = &spec.name {
        argv.push("--name".to_string());
        argv.push(name.clone());
    }
    for (key, value) in &spec.env {
        argv.push("-e".to_string());
        argv.push(format!("{key}={value}"));
    }
    for (host, container) in &spec.volumes {
        argv.push("-v".to_string());
        argv.push(format!("{host}:{container}"));
    }
    argv.push(spec.image_ref());
    argv.extend(spec.args.iter().cloned());
    Ok(argv)
}

/// [`build`] rendered as shell words for a `sh -c` or ssh command line.
///
/// Runtime options, env values and volume paths are quoted as literals. The
/// trailing component command keeps its own shell syntax.
pub fn shell_words(spec: &ContainerSpec) -> Result<Vec<String>, ExecError> {
    let argv = build(spec)?;
    let literal = argv.len() - spec.args.len();
    Ok(argv
        .iter()
        .enumerate()
        .map(|(i, arg)| if i < literal { quote_arg(arg) } else { arg.clone() })
        .collect())
}

/// Argument vector for a lifecycle action on a named container.
pub fn control(
    runtime: ContainerRuntime,
    action: ContainerAction,
    name: &str,
) -> Result<Vec<String>, ExecError> {
    if runtime == ContainerRuntime::Kubernetes {
        return Err(ExecError::NotImplemented("kubernetes container control".to_string()));
    }
    let verb = match action {
        ContainerAction::Pause => "pause",
        ContainerAction::Unpause => "unpause",
        ContainerAction::Stop => "stop",
    };
    Ok(vec!["docker".to_string(), verb.to_string(), quote_arg(name)])
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use pretty_assertions::assert_eq;

    use super::*;

    fn pairs(argv: &[String], flag: &str) -> HashSet<String> {
        argv.windows(2)
            .filter(|w| w[0] == flag)
            .map(|w| w[1].clone())
            .collect()
    }

    #[test]
    fn docker_run_carries_env_volumes_and_registry() {
        let spec = ContainerSpec::new("img")
            .with_registry("reg")
            .with_volume("/a", "/b")
            .with_env("K", "V");
        let argv = build(&spec).unwrap();

        assert_eq!(&argv[..2], &["docker".to_string(), "run".to_string()]);
        assert_eq!(pairs(&argv, "-v"), HashSet::from(["/a:/b".to_string()]));
        assert_eq!(pairs(&argv, "-e"), HashSet::from(["K=V".to_string()]));
        assert_eq!(argv.last().unwrap(), "reg/img");
        assert_eq!(argv.len(), 7);
    }

    #[test]
    fn every_pair_is_emitted_once() {
        let spec = ContainerSpec::new("otb")
            .with_env("A", "1")
            .with_env("B", "2")
            .with_volume("/in", "/data/in")
            .with_volume("/out", "/data/out")
            .with_args(vec!["otbcli_BandMath".into(), "-exp".into(), "im1b1".into()]);
        let argv = build(&spec).unwrap();

        assert_eq!(pairs(&argv, "-e"), HashSet::from(["A=1".to_string(), "B=2".to_string()]));
        assert_eq!(
            pairs(&argv, "-v"),
            HashSet::from(["/in:/data/in".to_string(), "/out:/data/out".to_string()])
        );
        assert_eq!(argv.iter().filter(|a| *a == "-e").count(), 2);
        let image_at = argv.iter().position(|a| a == "otb").unwrap();
        assert_eq!(&argv[image_at + 1..], &["otbcli_BandMath", "-exp", "im1b1"]);
    }

    #[test]
    fn unset_or_blank_registry_is_omitted() {
        assert_eq!(ContainerSpec::new("img").image_ref(), "img");
        assert_eq!(ContainerSpec::new("img").with_registry(" ").image_ref(), "img");
        let trailing_slash = ContainerSpec::new("img").with_registry("reg:5000/");
        assert_eq!(trailing_slash.image_ref(), "reg:5000/img");
    }

    #[test]
    fn kubernetes_is_not_implemented() {
        let spec = ContainerSpec::new("img").with_runtime(ContainerRuntime::Kubernetes);
        assert!(matches!(build(&spec), Err(ExecError::NotImplemented(_))));
    }

    #[test]
    fn empty_image_is_rejected() {
        assert!(build(&ContainerSpec::new("")).is_err());
    }

    #[test]
    fn shell_words_quote_values_but_not_the_command() {
        let spec = ContainerSpec::new("img")
            .with_env("K", "a b")
            .with_volume("/in dir", "/data/$HOME")
            .with_args(vec!["sh".into(), "-c".into(), "\"echo $X\"".into()]);
        let words = shell_words(&spec).unwrap();

        assert_eq!(
            words,
            vec![
                "docker",
                "run",
                "-e",
                "'K=a b'",
                "-v",
                "'/in dir:/data/$HOME'",
                "img",
                "sh",
                "-c",
                "\"echo $X\"",
            ]
        );
        let line = crate::runner::CommandSpec::local(words).with_shell_words().command_line();
        assert!(line.starts_with("docker run -e 'K=a b' -v '/in dir:/data/$HOME' img"));
    }

    #[test]
    fn control_verbs() {
        assert_eq!(
            control(ContainerRuntime::Docker, ContainerAction::Pause, "geoflow-t1").unwrap(),
            vec!["docker", "pause", "geoflow-t1"]
        );
    }
}
