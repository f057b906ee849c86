//! Application configuration options

use std::time::Duration;

use crate::deploy::orchestrator;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::workers::grace_cleanup;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage layout paths
    pub storage_layout: StorageLayout,

    /// Server configuration
    pub server: ServerOptions,

    /// Enable the grace cleanup worker
    pub enable_cleanup_worker: bool,

    /// Grace cleanup worker options
    pub cleanup_worker: grace_cleanup::Options,

    /// Orchestrator tuning
    pub orchestrator: orchestrator::Options,

    /// Settings the options were derived from
    pub settings: Settings,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self::from_settings(Settings::default())
    }
}

impl AppOptions {
    pub fn from_settings(settings: Settings) -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            storage_layout: StorageLayout::new(settings.storage_dir.clone()),
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            enable_cleanup_worker: settings.enable_cleanup_worker,
            cleanup_worker: grace_cleanup::Options {
                interval: Duration::from_secs(settings.cleanup_interval_secs.max(1)),
            },
            orchestrator: orchestrator::Options::from_settings(&settings),
            settings,
        }
    }
}

/// Lifecycle options for the control plane
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7080,
        }
    }
}
