//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::AppState;
use crate::deploy::orchestrator::Orchestrator;
use crate::errors::PlaneError;
use crate::server::serve::serve;
use crate::server::state::ServerState;
use crate::workers::grace_cleanup;

/// Run the control plane until `shutdown_signal` resolves
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), PlaneError> {
    info!("Initializing slotplane...");

    // Create shutdown channel
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    if let Err(e) = init(&options, shutdown_tx.clone(), &mut shutdown_manager).await {
        error!("Failed to start slotplane: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<Arc<AppState>, PlaneError> {
    let app_state = Arc::new(AppState::init(options).await?);
    shutdown_manager.with_app_state(app_state.clone())?;

    init_server(
        options,
        app_state.clone(),
        shutdown_manager,
        shutdown_tx.subscribe(),
    )
    .await?;

    if options.enable_cleanup_worker {
        init_cleanup_worker(
            options.cleanup_worker.clone(),
            app_state.orchestrator.clone(),
            shutdown_manager,
            shutdown_tx.subscribe(),
        )
        .await?;
    }

    Ok(app_state)
}

async fn init_cleanup_worker(
    options: grace_cleanup::Options,
    orchestrator: Arc<Orchestrator>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), PlaneError> {
    info!("Initializing grace cleanup worker...");

    let handle = tokio::spawn(async move {
        grace_cleanup::run(
            &options,
            orchestrator.as_ref(),
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_cleanup_worker_handle(handle)?;
    Ok(())
}

async fn init_server(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), PlaneError> {
    info!("Initializing HTTP server...");

    let server_state = ServerState::new(app_state.dispatcher.clone());
    let handle = serve(&options.server, Arc::new(server_state), async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.with_server_handle(handle)?;
    Ok(())
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    app_state: Option<Arc<AppState>>,
    server_handle: Option<JoinHandle<Result<(), PlaneError>>>,
    cleanup_worker_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            app_state: None,
            server_handle: None,
            cleanup_worker_handle: None,
        }
    }

    pub fn with_app_state(&mut self, state: Arc<AppState>) -> Result<(), PlaneError> {
        if self.app_state.is_some() {
            return Err(PlaneError::ShutdownError("app_state already set".to_string()));
        }
        self.app_state = Some(state);
        Ok(())
    }

    pub fn with_cleanup_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), PlaneError> {
        if self.cleanup_worker_handle.is_some() {
            return Err(PlaneError::ShutdownError(
                "cleanup_worker_handle already set".to_string(),
            ));
        }
        self.cleanup_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), PlaneError>>,
    ) -> Result<(), PlaneError> {
        if self.server_handle.is_some() {
            return Err(PlaneError::ShutdownError("server_handle already set".to_string()));
        }
        self.server_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), PlaneError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.lifecycle_options.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), PlaneError> {
        info!("Shutting down slotplane...");

        // 1. Cleanup worker; an in-flight sweep finishes first
        if let Some(handle) = self.cleanup_worker_handle.take() {
            handle
                .await
                .map_err(|e| PlaneError::ShutdownError(e.to_string()))?;
        }

        // 2. Server drains in-flight requests
        if let Some(handle) = self.server_handle.take() {
            handle
                .await
                .map_err(|e| PlaneError::ShutdownError(e.to_string()))??;
        }

        // 3. App state
        if let Some(app_state) = self.app_state.take() {
            app_state.shutdown().await?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
