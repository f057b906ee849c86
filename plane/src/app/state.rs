//! Application state management

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::app::options::AppOptions;
use crate::audit::{AuditRecorder, FileAuditRecorder};
use crate::authn::admin::AccessAdmin;
use crate::authn::resolver::AuthResolver;
use crate::authn::store::AccessStore;
use crate::cache::slots::SlotCache;
use crate::clock::{Clock, SystemClock};
use crate::deploy::orchestrator::{Deps, Orchestrator};
use crate::deploy::records::FileDeploymentStore;
use crate::envstore::FileEnvStore;
use crate::errors::PlaneError;
use crate::registry::file::FileSlotRegistry;
use crate::remote::http::HttpFallback;
use crate::remote::ssh::SshTransport;
use crate::remote::{PooledExecutor, RemoteExecutor, Transport};
use crate::routing::ProxyRouter;
use crate::server::dispatch::ToolDispatcher;

/// Main application state
pub struct AppState {
    /// Teams and credentials
    pub access: Arc<AccessStore>,

    /// Deployment lifecycle
    pub orchestrator: Arc<Orchestrator>,

    /// Team and credential administration
    pub admin: Arc<AccessAdmin>,

    /// Tool endpoint dispatcher
    pub dispatcher: Arc<ToolDispatcher>,

    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Initialize application state
    pub async fn init(options: &AppOptions) -> Result<Self, PlaneError> {
        info!("Initializing application state...");

        let layout = &options.storage_layout;
        layout.setup().await?;
        let settings = &options.settings;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        // 1. Stores
        let access = Arc::new(AccessStore::load(Arc::new(layout.access_file())).await?);
        let registry = Arc::new(FileSlotRegistry::new(layout.registry_dir(), clock.clone()));
        let records = Arc::new(FileDeploymentStore::new(layout.deployments_dir()));
        let audit: Arc<dyn AuditRecorder> = Arc::new(FileAuditRecorder::new(layout.audit_file()));
        let env_store = Arc::new(FileEnvStore::new(layout.env_dir()));

        // 2. Remote execution and routing
        let primary: Arc<dyn Transport> = Arc::new(SshTransport::new(&settings.executor));
        let fallback: Option<Arc<dyn Transport>> = match &settings.executor.fallback_url {
            Some(url) => Some(Arc::new(HttpFallback::new(
                Some(url.clone()),
                Duration::from_millis(settings.health.timeout_ms),
            )?)),
            None => None,
        };
        let executor: Arc<dyn RemoteExecutor> = Arc::new(PooledExecutor::from_settings(
            &settings.executor,
            primary,
            fallback,
        ));
        let router = Arc::new(ProxyRouter::new(
            executor.clone(),
            settings.proxy.clone(),
            options.orchestrator.run_options.clone(),
        ));

        // 3. Services
        let orchestrator = Arc::new(Orchestrator::new(
            options.orchestrator.clone(),
            Deps {
                registry: registry.clone(),
                records,
                executor,
                router,
                env_store,
                audit: audit.clone(),
                cache: Arc::new(SlotCache::default()),
                clock: clock.clone(),
            },
        ));
        let admin = Arc::new(AccessAdmin::new(access.clone(), registry, clock.clone()));
        let dispatcher = Arc::new(ToolDispatcher::new(
            Arc::new(AuthResolver::new(access.clone(), clock.clone())),
            orchestrator.clone(),
            admin.clone(),
            audit,
            clock.clone(),
        ));

        Ok(Self {
            access,
            orchestrator,
            admin,
            dispatcher,
            clock,
        })
    }

    /// Shutdown application state
    pub async fn shutdown(&self) -> Result<(), PlaneError> {
        info!("Shutting down application state...");
        Ok(())
    }
}
