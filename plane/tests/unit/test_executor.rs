//! Pooled executor tests with scripted transports

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use slotplane::errors::RemoteExecError;
use slotplane::remote::executor::HostAllowList;
use slotplane::remote::{CommandOutput, PooledExecutor, RemoteCommand, RemoteExecutor, RunOptions, Transport};
use slotplane::utils::CooldownOptions;

#[derive(Clone, Copy)]
enum Behavior {
    Exit(i32),
    Unavailable,
    Sleep(Duration),
}

struct ScriptedTransport {
    name: &'static str,
    script: Mutex<Vec<Behavior>>,
    fallback_behavior: Behavior,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedTransport {
    /// Plays `script` in order, then `then` forever
    fn new(name: &'static str, script: Vec<Behavior>, then: Behavior) -> Arc<Self> {
        Arc::new(Self {
            name,
            script: Mutex::new(script.into_iter().rev().collect()),
            fallback_behavior: then,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn execute(
        &self,
        host: &str,
        _command: &RemoteCommand,
    ) -> Result<CommandOutput, RemoteExecError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self
            .script
            .lock()
            .unwrap()
            .pop()
            .unwrap_or(self.fallback_behavior);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let result = match behavior {
            Behavior::Exit(code) => Ok(CommandOutput {
                stdout: "ok".to_string(),
                stderr: if code == 0 { String::new() } else { "boom\n".to_string() },
                exit_code: code,
                duration_ms: 0,
                degraded: false,
            }),
            Behavior::Unavailable => Err(RemoteExecError::ConnectionUnavailable {
                host: host.to_string(),
                reason: "connection refused".to_string(),
            }),
            Behavior::Sleep(delay) => {
                tokio::time::sleep(delay).await;
                Ok(CommandOutput {
                    stdout: String::new(),
                    stderr: String::new(),
                    exit_code: 0,
                    duration_ms: 0,
                    degraded: false,
                })
            }
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

fn executor(
    primary: Arc<ScriptedTransport>,
    fallback: Option<Arc<ScriptedTransport>>,
    max_sessions: usize,
) -> PooledExecutor {
    PooledExecutor::new(
        primary,
        fallback.map(|f| f as Arc<dyn Transport>),
        HostAllowList::new(vec!["web-1".to_string()], vec!["10.1.0.0/16".parse().unwrap()]),
        max_sessions,
    )
    .with_cooldown(CooldownOptions {
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
        multiplier: 2.0,
    })
}

fn options(retries: u32) -> RunOptions {
    RunOptions {
        timeout: Duration::from_millis(500),
        retries,
    }
}

fn inspect() -> RemoteCommand {
    RemoteCommand::InspectContainer {
        name: "checkout-staging-blue".to_string(),
    }
}

fn pull() -> RemoteCommand {
    RemoteCommand::PullImage {
        image: "registry.local/checkout:v1".to_string(),
    }
}

#[tokio::test]
async fn test_host_outside_allow_list_is_refused() {
    let primary = ScriptedTransport::new("ssh", vec![], Behavior::Exit(0));
    let exec = executor(primary.clone(), None, 2);

    let err = exec.run("db-9", &pull(), &options(0)).await.unwrap_err();
    assert_eq!(err, RemoteExecError::HostNotAllowed("db-9".to_string()));
    assert_eq!(primary.calls(), 0);

    assert!(exec.run("10.1.4.2", &pull(), &options(0)).await.is_ok());
    assert!(exec.run("WEB-1", &pull(), &options(0)).await.is_ok());
}

#[tokio::test]
async fn test_non_zero_exit_is_command_failed() {
    let primary = ScriptedTransport::new("ssh", vec![], Behavior::Exit(125));
    let exec = executor(primary.clone(), None, 2);

    let err = exec.run("web-1", &pull(), &options(3)).await.unwrap_err();
    assert_eq!(
        err,
        RemoteExecError::CommandFailed {
            host: "web-1".to_string(),
            exit_code: 125,
            stderr: "boom".to_string(),
        }
    );
    // Command failures are not retried
    assert_eq!(primary.calls(), 1);
}

#[tokio::test]
async fn test_connection_failures_are_retried() {
    let primary = ScriptedTransport::new(
        "ssh",
        vec![Behavior::Unavailable, Behavior::Unavailable],
        Behavior::Exit(0),
    );
    let exec = executor(primary.clone(), None, 2);

    let output = exec.run("web-1", &pull(), &options(2)).await.unwrap();
    assert!(!output.degraded);
    assert_eq!(primary.calls(), 3);

    let primary = ScriptedTransport::new("ssh", vec![], Behavior::Unavailable);
    let exec = executor(primary.clone(), None, 2);
    let err = exec.run("web-1", &pull(), &options(1)).await.unwrap_err();
    assert_eq!(err.kind(), "RemoteConnectionUnavailable");
    assert_eq!(primary.calls(), 2);
}

#[tokio::test]
async fn test_fallback_serves_read_only_commands_only() {
    let primary = ScriptedTransport::new("ssh", vec![], Behavior::Unavailable);
    let fallback = ScriptedTransport::new("http", vec![], Behavior::Exit(0));
    let exec = executor(primary.clone(), Some(fallback.clone()), 2);

    let output = exec.run("web-1", &inspect(), &options(0)).await.unwrap();
    assert!(output.degraded);
    assert_eq!(fallback.calls(), 1);

    let err = exec.run("web-1", &pull(), &options(0)).await.unwrap_err();
    assert!(matches!(err, RemoteExecError::ConnectionUnavailable { .. }));
    assert_eq!(fallback.calls(), 1);
}

#[tokio::test]
async fn test_timeout() {
    let primary = ScriptedTransport::new("ssh", vec![], Behavior::Sleep(Duration::from_secs(5)));
    let exec = executor(primary, None, 2);

    let opts = RunOptions {
        timeout: Duration::from_millis(20),
        retries: 3,
    };
    let err = exec.run("web-1", &pull(), &opts).await.unwrap_err();
    assert_eq!(
        err,
        RemoteExecError::Timeout {
            host: "web-1".to_string(),
            timeout_ms: 20,
        }
    );
}

#[tokio::test]
async fn test_sessions_per_host_are_bounded() {
    let primary = ScriptedTransport::new("ssh", vec![], Behavior::Sleep(Duration::from_millis(20)));
    let exec = Arc::new(executor(primary.clone(), None, 2));

    let mut tasks = Vec::new();
    for _ in 0..6 {
        let exec = exec.clone();
        tasks.push(tokio::spawn(async move {
            exec.run("web-1", &pull(), &options(0)).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(primary.calls(), 6);
    assert!(primary.max_in_flight.load(Ordering::SeqCst) <= 2);
}
