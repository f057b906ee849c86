//! SSH transport
//!
//! One multiplexed session per host, reused across commands and reopened
//! when the control connection drops.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use openssh::{KnownHosts, Session, SessionBuilder, Stdio};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::errors::RemoteExecError;
use crate::remote::command::{Invocation, RemoteCommand};
use crate::remote::executor::{CommandOutput, Transport};
use crate::storage::settings::ExecutorSettings;

type SessionCell<S> = Arc<Mutex<Option<Arc<S>>>>;

/// Cached session per host. The map lock only guards the lookup of a host's
/// cell; connecting holds that host's cell alone.
pub(crate) struct HostSessions<S> {
    cells: Mutex<HashMap<String, SessionCell<S>>>,
}

impl<S> Default for HostSessions<S> {
    fn default() -> Self {
        Self {
            cells: Mutex::new(HashMap::new()),
        }
    }
}

impl<S> HostSessions<S> {
    async fn cell(&self, host: &str) -> SessionCell<S> {
        let mut cells = self.cells.lock().await;
        cells
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    /// The live session for `host`, connecting if there is none
    pub(crate) async fn get_or_connect<K, KF, C, CF>(
        &self,
        host: &str,
        is_alive: K,
        connect: C,
    ) -> Result<Arc<S>, RemoteExecError>
    where
        K: FnOnce(Arc<S>) -> KF,
        KF: Future<Output = bool>,
        C: FnOnce() -> CF,
        CF: Future<Output = Result<S, RemoteExecError>>,
    {
        let cell = self.cell(host).await;
        let mut slot = cell.lock().await;
        if let Some(session) = slot.as_ref() {
            if is_alive(session.clone()).await {
                return Ok(session.clone());
            }
            debug!("Dropping dead SSH session to {}", host);
            *slot = None;
        }

        let session = Arc::new(connect().await?);
        *slot = Some(session.clone());
        Ok(session)
    }

    pub(crate) async fn forget(&self, host: &str) {
        let cell = self.cell(host).await;
        *cell.lock().await = None;
    }
}

pub struct SshTransport {
    user: String,
    port: u16,
    runtime: String,
    sessions: HostSessions<Session>,
}

impl SshTransport {
    pub fn new(settings: &ExecutorSettings) -> Self {
        Self {
            user: settings.ssh_user.clone(),
            port: settings.ssh_port,
            runtime: settings.runtime.clone(),
            sessions: HostSessions::default(),
        }
    }

    async fn session(&self, host: &str) -> Result<Arc<Session>, RemoteExecError> {
        self.sessions
            .get_or_connect(
                host,
                |session| async move { session.check().await.is_ok() },
                || async {
                    let mut builder = SessionBuilder::default();
                    builder
                        .user(self.user.clone())
                        .port(self.port)
                        .known_hosts_check(KnownHosts::Strict);
                    let session = builder
                        .connect_mux(host)
                        .await
                        .map_err(|e| unavailable(host, e))?;
                    info!("Opened SSH session to {}@{}", self.user, host);
                    Ok::<_, RemoteExecError>(session)
                },
            )
            .await
    }

    async fn forget(&self, host: &str) {
        self.sessions.forget(host).await;
    }

    async fn invoke(
        &self,
        session: &Session,
        host: &str,
        invocation: &Invocation,
    ) -> Result<std::process::Output, RemoteExecError> {
        let (program, args) = invocation
            .argv
            .split_first()
            .ok_or_else(|| RemoteExecError::CommandFailed {
                host: host.to_string(),
                exit_code: -1,
                stderr: "empty command".to_string(),
            })?;

        let mut cmd = session.command(program);
        for arg in args {
            cmd.arg(arg);
        }

        match &invocation.stdin {
            None => cmd.output().await.map_err(|e| unavailable(host, e)),
            Some(input) => {
                cmd.stdin(Stdio::piped())
                    .stdout(Stdio::null())
                    .stderr(Stdio::piped());
                let mut child = cmd.spawn().await.map_err(|e| unavailable(host, e))?;
                if let Some(mut stdin) = child.stdin().take() {
                    stdin.write_all(input).await.map_err(|e| {
                        RemoteExecError::ConnectionUnavailable {
                            host: host.to_string(),
                            reason: e.to_string(),
                        }
                    })?;
                    stdin.shutdown().await.map_err(|e| {
                        RemoteExecError::ConnectionUnavailable {
                            host: host.to_string(),
                            reason: e.to_string(),
                        }
                    })?;
                }
                child
                    .wait_with_output()
                    .await
                    .map_err(|e| unavailable(host, e))
            }
        }
    }
}

fn unavailable(host: &str, err: openssh::Error) -> RemoteExecError {
    RemoteExecError::ConnectionUnavailable {
        host: host.to_string(),
        reason: err.to_string(),
    }
}

#[async_trait]
impl Transport for SshTransport {
    fn name(&self) -> &'static str {
        "ssh"
    }

    async fn execute(
        &self,
        host: &str,
        command: &RemoteCommand,
    ) -> Result<CommandOutput, RemoteExecError> {
        let started = Instant::now();
        let session = self.session(host).await?;

        let mut stdout = String::new();
        let mut stderr = String::new();
        let mut exit_code = 0;
        for invocation in command.render(&self.runtime) {
            let output = match self.invoke(&session, host, &invocation).await {
                Ok(output) => output,
                Err(e) => {
                    warn!("SSH command on {} failed: {}", host, e);
                    self.forget(host).await;
                    return Err(e);
                }
            };
            stdout.push_str(&String::from_utf8_lossy(&output.stdout));
            stderr.push_str(&String::from_utf8_lossy(&output.stderr));
            exit_code = output.status.code().unwrap_or(-1);
            if exit_code != 0 {
                break;
            }
        }

        Ok(CommandOutput {
            stdout,
            stderr,
            exit_code,
            duration_ms: started.elapsed().as_millis() as u64,
            degraded: false,
        })
    }
}
