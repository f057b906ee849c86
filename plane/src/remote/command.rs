//! Typed remote commands
//!
//! Every operation the control plane performs on a target host is one of
//! these values. Rendering produces argv vectors; user-supplied values are
//! always separate arguments and are escaped by the transport.

use std::collections::BTreeMap;
use std::fmt;

/// A container to start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub host_port: u16,
    pub container_port: u16,
    pub env_file: Option<String>,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCommand {
    PullImage { image: String },
    StopContainer { name: String },
    RemoveContainer { name: String },
    RunContainer(ContainerSpec),
    InspectContainer { name: String },

    /// Replace a file on the host through a temporary file and rename
    WriteFile { path: String, contents: Vec<u8> },
    RemoveFile { path: String },

    /// GET `http://127.0.0.1:{port}{path}` on the host
    HttpProbe { port: u16, path: String },

    /// Reload a system service
    ReloadService { service: String },
}

/// One process invocation on the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub argv: Vec<String>,
    pub stdin: Option<Vec<u8>>,
}

impl Invocation {
    fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            stdin: None,
        }
    }
}

impl RemoteCommand {
    /// Commands that observe but never change the host. Only these may be
    /// served by the fallback transport.
    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            RemoteCommand::InspectContainer { .. } | RemoteCommand::HttpProbe { .. }
        )
    }

    /// Short label for logs
    pub fn label(&self) -> &'static str {
        match self {
            RemoteCommand::PullImage { .. } => "pull",
            RemoteCommand::StopContainer { .. } => "stop",
            RemoteCommand::RemoveContainer { .. } => "remove",
            RemoteCommand::RunContainer(_) => "run",
            RemoteCommand::InspectContainer { .. } => "inspect",
            RemoteCommand::WriteFile { .. } => "write-file",
            RemoteCommand::RemoveFile { .. } => "remove-file",
            RemoteCommand::HttpProbe { .. } => "http-probe",
            RemoteCommand::ReloadService { .. } => "reload",
        }
    }

    /// Render into the invocations to run, in order
    pub fn render(&self, runtime: &str) -> Vec<Invocation> {
        match self {
            RemoteCommand::PullImage { image } => {
                vec![Invocation::new([runtime, "pull", image.as_str()])]
            }
            RemoteCommand::StopContainer { name } => {
                vec![Invocation::new([runtime, "stop", name.as_str()])]
            }
            RemoteCommand::RemoveContainer { name } => {
                vec![Invocation::new([runtime, "rm", "-f", name.as_str()])]
            }
            RemoteCommand::RunContainer(spec) => {
                let mut argv: Vec<String> = vec![
                    runtime.to_string(),
                    "run".to_string(),
                    "-d".to_string(),
                    "--name".to_string(),
                    spec.name.clone(),
                    "--restart".to_string(),
                    "unless-stopped".to_string(),
                    "-p".to_string(),
                    format!("{}:{}", spec.host_port, spec.container_port),
                ];
                if let Some(env_file) = &spec.env_file {
                    argv.push("--env-file".to_string());
                    argv.push(env_file.clone());
                }
                for (key, value) in &spec.labels {
                    argv.push("--label".to_string());
                    argv.push(format!("{}={}", key, value));
                }
                argv.push(spec.image.clone());
                vec![Invocation { argv, stdin: None }]
            }
            RemoteCommand::InspectContainer { name } => vec![Invocation::new([
                runtime,
                "inspect",
                "--format",
                "{{.State.Status}}",
                name.as_str(),
            ])],
            RemoteCommand::WriteFile { path, contents } => {
                let temp = format!("{}.tmp", path);
                vec![
                    Invocation::new(["mkdir", "-p", parent_dir(path)]),
                    Invocation {
                        argv: vec!["tee".to_string(), temp.clone()],
                        stdin: Some(contents.clone()),
                    },
                    Invocation::new(["mv", "-f", temp.as_str(), path.as_str()]),
                ]
            }
            RemoteCommand::RemoveFile { path } => {
                vec![Invocation::new(["rm", "-f", path.as_str()])]
            }
            RemoteCommand::HttpProbe { port, path } => vec![Invocation::new([
                "curl".to_string(),
                "-fsS".to_string(),
                "-o".to_string(),
                "/dev/null".to_string(),
                "--max-time".to_string(),
                "5".to_string(),
                format!("http://127.0.0.1:{}{}", port, path),
            ])],
            RemoteCommand::ReloadService { service } => {
                vec![Invocation::new(["systemctl", "reload", service.as_str()])]
            }
        }
    }
}

impl fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteCommand::PullImage { image } => write!(f, "pull {}", image),
            RemoteCommand::StopContainer { name } => write!(f, "stop {}", name),
            RemoteCommand::RemoveContainer { name } => write!(f, "remove {}", name),
            RemoteCommand::RunContainer(spec) => {
                write!(f, "run {} ({}) on :{}", spec.name, spec.image, spec.host_port)
            }
            RemoteCommand::InspectContainer { name } => write!(f, "inspect {}", name),
            RemoteCommand::WriteFile { path, contents } => {
                write!(f, "write {} ({} bytes)", path, contents.len())
            }
            RemoteCommand::RemoveFile { path } => write!(f, "remove file {}", path),
            RemoteCommand::HttpProbe { port, path } => write!(f, "probe :{}{}", port, path),
            RemoteCommand::ReloadService { service } => write!(f, "reload {}", service),
        }
    }
}

fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(idx) => &path[..idx],
        None => ".",
    }
}

/// Runtime stderr for a container that does not exist
pub fn is_missing_container(stderr: &str) -> bool {
    let stderr = stderr.to_lowercase();
    stderr.contains("no such container") || stderr.contains("no container with name")
}
