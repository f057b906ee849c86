//! Settings file management

use std::collections::HashMap;
use std::path::PathBuf;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::errors::PlaneError;
use crate::filesys::file::File;
use crate::logs::LogLevel;

/// Control plane settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON log lines
    #[serde(default)]
    pub log_json: bool,

    /// Also write daily-rotated log files under the storage dir
    #[serde(default)]
    pub log_to_file: bool,

    /// Root of the storage layout
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    #[serde(default)]
    pub server: ServerSettings,

    /// How long a demoted slot stays in grace before cleanup
    #[serde(default = "default_grace_period")]
    pub grace_period_secs: u64,

    /// Enable the grace cleanup worker
    #[serde(default = "default_true")]
    pub enable_cleanup_worker: bool,

    /// Cleanup worker interval
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    /// Upper bound on the remote phase of one operation
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_secs: u64,

    /// Internal retries on registry version conflicts
    #[serde(default = "default_conflict_retries")]
    pub conflict_retries: u32,

    /// Registry prefixed to bare `version` deploys
    #[serde(default)]
    pub image_registry: Option<String>,

    #[serde(default)]
    pub health: HealthSettings,

    #[serde(default)]
    pub executor: ExecutorSettings,

    #[serde(default)]
    pub proxy: ProxySettings,

    /// Deploy targets keyed by environment name
    #[serde(default = "default_environments")]
    pub environments: HashMap<String, EnvironmentSettings>,
}

fn default_true() -> bool {
    true
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("/var/lib/slotplane")
}

fn default_grace_period() -> u64 {
    48 * 60 * 60
}

fn default_cleanup_interval() -> u64 {
    300
}

fn default_operation_timeout() -> u64 {
    600
}

fn default_conflict_retries() -> u32 {
    3
}

fn default_environments() -> HashMap<String, EnvironmentSettings> {
    let mut environments = HashMap::new();
    environments.insert(
        "staging".to_string(),
        EnvironmentSettings {
            host: "localhost".to_string(),
            base_port: 3100,
        },
    );
    environments.insert(
        "production".to_string(),
        EnvironmentSettings {
            host: "localhost".to_string(),
            base_port: 3000,
        },
    );
    environments
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_to_file: false,
            storage_dir: default_storage_dir(),
            server: ServerSettings::default(),
            grace_period_secs: default_grace_period(),
            enable_cleanup_worker: true,
            cleanup_interval_secs: default_cleanup_interval(),
            operation_timeout_secs: default_operation_timeout(),
            conflict_retries: default_conflict_retries(),
            image_registry: None,
            health: HealthSettings::default(),
            executor: ExecutorSettings::default(),
            proxy: ProxySettings::default(),
            environments: default_environments(),
        }
    }
}

impl Settings {
    /// Read settings from `file`, falling back to defaults when it is absent
    pub async fn load(file: &File) -> Result<Self, PlaneError> {
        match file.read_json_opt::<Settings>().await {
            Ok(Some(settings)) => Ok(settings),
            Ok(None) => Ok(Settings::default()),
            Err(e) => Err(PlaneError::ConfigError(format!(
                "failed to read {:?}: {}",
                file.path(),
                e
            ))),
        }
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    7080
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Post-deploy health probe
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSettings {
    #[serde(default = "default_health_path")]
    pub path: String,

    #[serde(default = "default_health_retries")]
    pub retries: u32,

    #[serde(default = "default_health_interval")]
    pub interval_ms: u64,

    /// Per-probe timeout
    #[serde(default = "default_health_timeout")]
    pub timeout_ms: u64,
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_health_retries() -> u32 {
    10
}

fn default_health_interval() -> u64 {
    3000
}

fn default_health_timeout() -> u64 {
    5000
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            path: default_health_path(),
            retries: default_health_retries(),
            interval_ms: default_health_interval(),
            timeout_ms: default_health_timeout(),
        }
    }
}

/// Remote execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutorSettings {
    /// Container runtime binary on the target hosts
    #[serde(default = "default_runtime")]
    pub runtime: String,

    #[serde(default = "default_ssh_user")]
    pub ssh_user: String,

    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,

    /// Concurrent sessions per host
    #[serde(default = "default_max_sessions")]
    pub max_sessions_per_host: usize,

    #[serde(default = "default_command_timeout")]
    pub command_timeout_ms: u64,

    #[serde(default = "default_command_retries")]
    pub retries: u32,

    /// Hosts commands may target. Together with `allowed_networks`; both
    /// empty rejects every host.
    #[serde(default = "default_allowed_hosts")]
    pub allowed_hosts: Vec<String>,

    #[serde(default)]
    pub allowed_networks: Vec<IpNet>,

    /// Read-only HTTP fallback agent, e.g. `http://{host}:7081`
    #[serde(default)]
    pub fallback_url: Option<String>,
}

fn default_runtime() -> String {
    "podman".to_string()
}

fn default_ssh_user() -> String {
    "deploy".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

fn default_max_sessions() -> usize {
    4
}

fn default_command_timeout() -> u64 {
    120_000
}

fn default_command_retries() -> u32 {
    2
}

fn default_allowed_hosts() -> Vec<String> {
    vec!["localhost".to_string()]
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            runtime: default_runtime(),
            ssh_user: default_ssh_user(),
            ssh_port: default_ssh_port(),
            max_sessions_per_host: default_max_sessions(),
            command_timeout_ms: default_command_timeout(),
            retries: default_command_retries(),
            allowed_hosts: default_allowed_hosts(),
            allowed_networks: Vec::new(),
            fallback_url: None,
        }
    }
}

/// Reverse proxy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxySettings {
    /// Directory on the target host holding one site file per route
    #[serde(default = "default_routes_dir")]
    pub routes_dir: String,

    /// Service reloaded after a route file changes
    #[serde(default = "default_reload_service")]
    pub reload_service: String,

    #[serde(default = "default_base_domain")]
    pub base_domain: String,

    /// Site file template; `{domain}` and `{port}` are substituted
    #[serde(default = "default_template")]
    pub template: String,
}

fn default_routes_dir() -> String {
    "/etc/caddy/sites".to_string()
}

fn default_reload_service() -> String {
    "caddy".to_string()
}

fn default_base_domain() -> String {
    "localhost".to_string()
}

fn default_template() -> String {
    "{domain} {\n    reverse_proxy localhost:{port}\n}\n".to_string()
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            routes_dir: default_routes_dir(),
            reload_service: default_reload_service(),
            base_domain: default_base_domain(),
            template: default_template(),
        }
    }
}

/// Where one environment deploys to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentSettings {
    pub host: String,

    /// First port considered when a pair is allocated
    pub base_port: u16,
}
