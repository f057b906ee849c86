//! Live traffic routing
//!
//! A route maps a public domain to one slot port on a host. Switching a
//! route is the only way a slot receives production traffic.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::errors::RemoteExecError;
use crate::remote::{RemoteCommand, RemoteExecutor, RunOptions};
use crate::storage::settings::ProxySettings;

/// Public name of a (project, environment)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub domain: String,
}

impl Route {
    /// `production` gets the bare project name, every other environment
    /// is suffixed
    pub fn for_pair(project: &str, environment: &str, base_domain: &str) -> Self {
        let domain = if environment == "production" {
            format!("{}.{}", project, base_domain)
        } else {
            format!("{}-{}.{}", project, environment, base_domain)
        };
        Self { domain }
    }
}

#[async_trait]
pub trait TrafficRouter: Send + Sync {
    /// Point `route` at `port` on `host`
    async fn switch(&self, route: &Route, host: &str, port: u16) -> Result<(), RemoteExecError>;

    /// Stop serving `route`
    async fn remove(&self, route: &Route, host: &str) -> Result<(), RemoteExecError>;
}

/// Writes one site file per route on the target host and reloads the proxy
pub struct ProxyRouter {
    executor: Arc<dyn RemoteExecutor>,
    settings: ProxySettings,
    run_options: RunOptions,
}

impl ProxyRouter {
    pub fn new(
        executor: Arc<dyn RemoteExecutor>,
        settings: ProxySettings,
        run_options: RunOptions,
    ) -> Self {
        Self {
            executor,
            settings,
            run_options,
        }
    }

    fn site_path(&self, route: &Route) -> String {
        format!(
            "{}/{}.caddy",
            self.settings.routes_dir.trim_end_matches('/'),
            route.domain
        )
    }

    pub fn render(&self, route: &Route, port: u16) -> String {
        self.settings
            .template
            .replace("{domain}", &route.domain)
            .replace("{port}", &port.to_string())
    }

    async fn reload(&self, host: &str) -> Result<(), RemoteExecError> {
        let reload = RemoteCommand::ReloadService {
            service: self.settings.reload_service.clone(),
        };
        self.executor.run(host, &reload, &self.run_options).await?;
        Ok(())
    }
}

#[async_trait]
impl TrafficRouter for ProxyRouter {
    async fn switch(&self, route: &Route, host: &str, port: u16) -> Result<(), RemoteExecError> {
        let write = RemoteCommand::WriteFile {
            path: self.site_path(route),
            contents: self.render(route, port).into_bytes(),
        };
        self.executor.run(host, &write, &self.run_options).await?;
        self.reload(host).await?;
        info!("Route {} now serves {}:{}", route.domain, host, port);
        Ok(())
    }

    async fn remove(&self, route: &Route, host: &str) -> Result<(), RemoteExecError> {
        let remove = RemoteCommand::RemoveFile {
            path: self.site_path(route),
        };
        self.executor.run(host, &remove, &self.run_options).await?;
        self.reload(host).await?;
        info!("Route {} removed from {}", route.domain, host);
        Ok(())
    }
}
