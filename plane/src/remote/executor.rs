//! Remote executor
//!
//! `PooledExecutor` checks the host allow-list, caps concurrent sessions per
//! host with a semaphore, bounds every attempt (permit wait included) by the
//! command timeout, and retries attempts that could not reach the host.
//! Read-only commands fall back to a secondary transport when the primary
//! one is unreachable; their output is flagged `degraded`.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ipnet::IpNet;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, warn};

use crate::errors::RemoteExecError;
use crate::remote::command::RemoteCommand;
use crate::storage::settings::ExecutorSettings;
use crate::utils::{calc_exp_backoff, CooldownOptions};

/// Result of one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration_ms: u64,

    /// Served by the fallback transport
    pub degraded: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub timeout: Duration,
    pub retries: u32,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            retries: 2,
        }
    }
}

/// Runs typed commands against a named host
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn run(
        &self,
        host: &str,
        command: &RemoteCommand,
        options: &RunOptions,
    ) -> Result<CommandOutput, RemoteExecError>;
}

/// One way of reaching a host. Returns the raw exit code; mapping a
/// non-zero exit to an error is the executor's job.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(
        &self,
        host: &str,
        command: &RemoteCommand,
    ) -> Result<CommandOutput, RemoteExecError>;
}

/// Hosts commands may target: exact names plus CIDR networks
#[derive(Debug, Clone, Default)]
pub struct HostAllowList {
    hosts: HashSet<String>,
    networks: Vec<IpNet>,
}

impl HostAllowList {
    pub fn new(hosts: impl IntoIterator<Item = String>, networks: Vec<IpNet>) -> Self {
        Self {
            hosts: hosts.into_iter().map(|h| h.to_lowercase()).collect(),
            networks,
        }
    }

    pub fn allows(&self, host: &str) -> bool {
        if self.hosts.contains(&host.to_lowercase()) {
            return true;
        }
        match host.parse::<IpAddr>() {
            Ok(ip) => self.networks.iter().any(|net| net.contains(&ip)),
            Err(_) => false,
        }
    }
}

pub struct PooledExecutor {
    primary: Arc<dyn Transport>,
    fallback: Option<Arc<dyn Transport>>,
    allow_list: HostAllowList,
    max_sessions_per_host: usize,
    permits: Mutex<HashMap<String, Arc<Semaphore>>>,
    cooldown: CooldownOptions,
}

impl PooledExecutor {
    pub fn new(
        primary: Arc<dyn Transport>,
        fallback: Option<Arc<dyn Transport>>,
        allow_list: HostAllowList,
        max_sessions_per_host: usize,
    ) -> Self {
        Self {
            primary,
            fallback,
            allow_list,
            max_sessions_per_host: max_sessions_per_host.max(1),
            permits: Mutex::new(HashMap::new()),
            cooldown: CooldownOptions::default(),
        }
    }

    pub fn from_settings(
        settings: &ExecutorSettings,
        primary: Arc<dyn Transport>,
        fallback: Option<Arc<dyn Transport>>,
    ) -> Self {
        Self::new(
            primary,
            fallback,
            HostAllowList::new(
                settings.allowed_hosts.iter().cloned(),
                settings.allowed_networks.clone(),
            ),
            settings.max_sessions_per_host,
        )
    }

    pub fn with_cooldown(mut self, cooldown: CooldownOptions) -> Self {
        self.cooldown = cooldown;
        self
    }

    async fn semaphore(&self, host: &str) -> Arc<Semaphore> {
        let mut permits = self.permits.lock().await;
        permits
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.max_sessions_per_host)))
            .clone()
    }

    async fn attempt(
        &self,
        transport: &Arc<dyn Transport>,
        host: &str,
        command: &RemoteCommand,
        timeout: Duration,
    ) -> Result<CommandOutput, RemoteExecError> {
        let semaphore = self.semaphore(host).await;
        let work = async {
            let _permit = semaphore.acquire().await.map_err(|_| {
                RemoteExecError::ConnectionUnavailable {
                    host: host.to_string(),
                    reason: "session pool closed".to_string(),
                }
            })?;
            transport.execute(host, command).await
        };

        match tokio::time::timeout(timeout, work).await {
            Ok(result) => result,
            Err(_) => Err(RemoteExecError::Timeout {
                host: host.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }
}

#[async_trait]
impl RemoteExecutor for PooledExecutor {
    async fn run(
        &self,
        host: &str,
        command: &RemoteCommand,
        options: &RunOptions,
    ) -> Result<CommandOutput, RemoteExecError> {
        if !self.allow_list.allows(host) {
            warn!("Refusing {} on host {}: not in allow-list", command.label(), host);
            return Err(RemoteExecError::HostNotAllowed(host.to_string()));
        }

        let started = Instant::now();
        let mut attempt = 0;
        let result = loop {
            debug!(
                "Running {} on {} via {} (attempt {})",
                command,
                host,
                self.primary.name(),
                attempt + 1
            );
            match self
                .attempt(&self.primary, host, command, options.timeout)
                .await
            {
                Err(RemoteExecError::ConnectionUnavailable { reason, .. })
                    if attempt < options.retries =>
                {
                    let delay = calc_exp_backoff(&self.cooldown, attempt);
                    warn!(
                        "Host {} unreachable ({}), retrying in {:?}",
                        host, reason, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => break other,
            }
        };

        let result = match (result, &self.fallback) {
            (Err(RemoteExecError::ConnectionUnavailable { reason, .. }), Some(fallback))
                if command.is_read_only() =>
            {
                warn!(
                    "Primary transport to {} unavailable ({}), using {} for {}",
                    host,
                    reason,
                    fallback.name(),
                    command.label()
                );
                self.attempt(fallback, host, command, options.timeout)
                    .await
                    .map(|mut output| {
                        output.degraded = true;
                        output
                    })
            }
            (result, _) => result,
        };

        let mut output = result?;
        output.duration_ms = started.elapsed().as_millis() as u64;
        if !output.success() {
            return Err(RemoteExecError::CommandFailed {
                host: host.to_string(),
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }
}
