//! Read-only HTTP fallback transport
//!
//! Health probes go straight to `http://{host}:{port}{path}`. Container
//! inspection needs a host agent at the configured base URL
//! (`{host}` substituted), answering `GET /containers/{name}/status` with
//! `{"status": "..."}`. Anything mutating is refused.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::errors::RemoteExecError;
use crate::remote::command::RemoteCommand;
use crate::remote::executor::{CommandOutput, Transport};

#[derive(Debug, Deserialize)]
struct ContainerStatus {
    status: String,
}

pub struct HttpFallback {
    client: Client,
    agent_url: Option<String>,
}

impl HttpFallback {
    pub fn new(agent_url: Option<String>, timeout: Duration) -> Result<Self, RemoteExecError> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            RemoteExecError::ConnectionUnavailable {
                host: "-".to_string(),
                reason: format!("failed to build HTTP client: {}", e),
            }
        })?;
        Ok(Self { client, agent_url })
    }

    fn agent_base(&self, host: &str) -> Result<url::Url, RemoteExecError> {
        let template = self
            .agent_url
            .as_deref()
            .ok_or_else(|| unavailable(host, "no fallback agent configured"))?;
        url::Url::parse(&template.replace("{host}", host))
            .map_err(|e| unavailable(host, &e.to_string()))
    }
}

fn unavailable(host: &str, reason: &str) -> RemoteExecError {
    RemoteExecError::ConnectionUnavailable {
        host: host.to_string(),
        reason: reason.to_string(),
    }
}

#[async_trait]
impl Transport for HttpFallback {
    fn name(&self) -> &'static str {
        "http-fallback"
    }

    async fn execute(
        &self,
        host: &str,
        command: &RemoteCommand,
    ) -> Result<CommandOutput, RemoteExecError> {
        let started = Instant::now();
        let (stdout, exit_code, stderr) = match command {
            RemoteCommand::HttpProbe { port, path } => {
                let url = format!("http://{}:{}{}", host, port, path);
                debug!("Fallback probe {}", url);
                let resp = self
                    .client
                    .get(&url)
                    .send()
                    .await
                    .map_err(|e| unavailable(host, &e.to_string()))?;
                let status = resp.status();
                if status.is_success() {
                    (status.as_u16().to_string(), 0, String::new())
                } else {
                    (String::new(), 22, format!("probe returned {}", status))
                }
            }
            RemoteCommand::InspectContainer { name } => {
                let url = self
                    .agent_base(host)?
                    .join(&format!("containers/{}/status", name))
                    .map_err(|e| unavailable(host, &e.to_string()))?;
                let resp = self
                    .client
                    .get(url)
                    .send()
                    .await
                    .map_err(|e| unavailable(host, &e.to_string()))?;
                if resp.status() == reqwest::StatusCode::NOT_FOUND {
                    (String::new(), 1, format!("no such container: {}", name))
                } else {
                    let body: ContainerStatus = resp
                        .error_for_status()
                        .map_err(|e| unavailable(host, &e.to_string()))?
                        .json()
                        .await
                        .map_err(|e| unavailable(host, &e.to_string()))?;
                    (body.status, 0, String::new())
                }
            }
            other => {
                return Err(RemoteExecError::CommandFailed {
                    host: host.to_string(),
                    exit_code: -1,
                    stderr: format!("{} is not allowed over the fallback transport", other.label()),
                })
            }
        };

        Ok(CommandOutput {
            stdout,
            stderr,
            exit_code,
            duration_ms: started.elapsed().as_millis() as u64,
            degraded: true,
        })
    }
}
