//! Deployment orchestrator
//!
//! Deploy, Promote, Rollback and Cleanup as transactions over the slot
//! registry and the remote executor. Every operation holds the pair lock
//! from the first registry read to the last registry write. Registry writes
//! are version-checked and retried on conflict after re-reading and
//! re-validating.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use plane_api::models::{
    CleanupParams, DeployParams, HistoryParams, PromoteParams, RollbackParams, StatusParams,
};
use serde::Serialize;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::audit::{build_entry, AuditRecorder, AuditSubject};
use crate::authn::credential::AuthContext;
use crate::authz::permissions::{Action, PermissionGate};
use crate::cache::slots::SlotCache;
use crate::clock::Clock;
use crate::deploy::fsm::SlotEvent;
use crate::deploy::locks::PairLocks;
use crate::deploy::ports::{self, PortAllocator};
use crate::deploy::records::DeploymentStore;
use crate::envstore::EnvStore;
use crate::errors::{PlaneError, RemoteExecError};
use crate::models::audit::ActorKind;
use crate::models::deployment::{DeploymentRecord, DeploymentStatus};
use crate::models::slot::{HealthStatus, ProjectSlots, SlotName, SlotState};
use crate::registry::SlotRegistry;
use crate::remote::command::is_missing_container;
use crate::remote::{ContainerSpec, RemoteCommand, RemoteExecutor, RunOptions};
use crate::routing::{Route, TrafficRouter};
use crate::storage::settings::{EnvironmentSettings, Settings};
use crate::utils::{calc_exp_backoff, validate_image, validate_name, CooldownOptions};

/// Post-deploy health probing
#[derive(Debug, Clone)]
pub struct HealthCheckOptions {
    pub path: String,
    pub retries: u32,
    pub interval: Duration,
    pub timeout: Duration,
}

impl HealthCheckOptions {
    /// Upper bound on a full polling run, probes and pauses included
    pub fn budget(&self) -> Duration {
        let attempts = self.retries.max(1);
        self.timeout * attempts + self.interval * (attempts - 1)
    }
}

impl Default for HealthCheckOptions {
    fn default() -> Self {
        Self {
            path: "/health".to_string(),
            retries: 10,
            interval: Duration::from_secs(3),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Orchestrator options
#[derive(Debug, Clone)]
pub struct Options {
    pub grace_period: chrono::Duration,
    pub operation_timeout: Duration,
    pub conflict_retries: u32,
    pub conflict_cooldown: CooldownOptions,
    pub health: HealthCheckOptions,
    pub run_options: RunOptions,
    pub image_registry: Option<String>,
    pub base_domain: String,

    /// Directory on the target host receiving env files
    pub remote_env_dir: String,

    pub default_container_port: u16,
    pub environments: HashMap<String, EnvironmentSettings>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            grace_period: chrono::Duration::hours(48),
            operation_timeout: Duration::from_secs(600),
            conflict_retries: 3,
            conflict_cooldown: CooldownOptions::default(),
            health: HealthCheckOptions::default(),
            run_options: RunOptions::default(),
            image_registry: None,
            base_domain: "localhost".to_string(),
            remote_env_dir: "/var/lib/slotplane/env".to_string(),
            default_container_port: 3000,
            environments: HashMap::new(),
        }
    }
}

impl Options {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            grace_period: chrono::Duration::seconds(settings.grace_period_secs as i64),
            operation_timeout: Duration::from_secs(settings.operation_timeout_secs),
            conflict_retries: settings.conflict_retries,
            health: HealthCheckOptions {
                path: settings.health.path.clone(),
                retries: settings.health.retries,
                interval: Duration::from_millis(settings.health.interval_ms),
                timeout: Duration::from_millis(settings.health.timeout_ms),
            },
            run_options: RunOptions {
                timeout: Duration::from_millis(settings.executor.command_timeout_ms),
                retries: settings.executor.retries,
            },
            image_registry: settings.image_registry.clone(),
            base_domain: settings.proxy.base_domain.clone(),
            environments: settings.environments.clone(),
            ..Default::default()
        }
    }
}

/// Collaborators of the orchestrator
#[derive(Clone)]
pub struct Deps {
    pub registry: Arc<dyn SlotRegistry>,
    pub records: Arc<dyn DeploymentStore>,
    pub executor: Arc<dyn RemoteExecutor>,
    pub router: Arc<dyn TrafficRouter>,
    pub env_store: Arc<dyn EnvStore>,
    pub audit: Arc<dyn AuditRecorder>,
    pub cache: Arc<SlotCache>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployResult {
    pub deployment_id: String,
    pub slot: SlotName,
    pub port: u16,
    pub host: String,
    pub image: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromoteResult {
    pub active_slot: SlotName,
    pub port: u16,
    pub route: String,
    pub grace_slot: Option<SlotName>,
    pub grace_expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackResult {
    pub active_slot: SlotName,
    pub port: u16,
    pub route: String,
    pub demoted_slot: Option<SlotName>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResult {
    pub cleaned: Vec<SlotName>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveSlot {
    pub slot: SlotName,
    pub container: String,
    pub status: String,
    pub degraded: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResult {
    pub slots: ProjectSlots,
    pub stale: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub live: Option<Vec<LiveSlot>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotListResult {
    pub projects: Vec<ProjectSlots>,
    pub stale: bool,
}

/// How far the remote phase of a deploy got
#[derive(Debug, Default)]
struct DeployProgress {
    old_removed: bool,
    started: bool,
}

pub struct Orchestrator {
    options: Options,
    deps: Deps,
    locks: PairLocks,
    ports: PortAllocator,
}

impl Orchestrator {
    pub fn new(options: Options, deps: Deps) -> Self {
        Self {
            options,
            deps,
            locks: PairLocks::default(),
            ports: PortAllocator::default(),
        }
    }

    pub fn registry(&self) -> &Arc<dyn SlotRegistry> {
        &self.deps.registry
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.deps.clock
    }

    fn route(&self, slots: &ProjectSlots) -> Route {
        Route::for_pair(&slots.project_name, &slots.environment, &self.options.base_domain)
    }

    /// Deploy a version into the non-live slot
    pub async fn deploy(
        &self,
        auth: &AuthContext,
        params: DeployParams,
    ) -> Result<DeployResult, PlaneError> {
        let span = info_span!("deploy", project = %params.project, environment = %params.environment);
        self.deploy_inner(auth, params).instrument(span).await
    }

    async fn deploy_inner(
        &self,
        auth: &AuthContext,
        params: DeployParams,
    ) -> Result<DeployResult, PlaneError> {
        PermissionGate::authorize_project(auth, Action::DeployCreate, &params.project)?;
        validate_pair(&params.project, &params.environment)?;
        let image = self.resolve_image(&params)?;
        let environment = self
            .options
            .environments
            .get(&params.environment)
            .cloned()
            .ok_or_else(|| {
                PlaneError::Validation(format!("unknown environment: {}", params.environment))
            })?;

        let _pair = self.locks.acquire(&params.project, &params.environment).await;

        // 1. Read the pair, creating it with fresh ports on first deploy
        let slots = self
            .load_or_create(auth, &params.project, &params.environment, &environment)
            .await?;

        // 2. Pick the target slot
        let target = deploy_target(&slots);
        let current = slots.slot(target);
        if current.state == SlotState::Deployed && current.health_status == HealthStatus::Unhealthy
        {
            warn!(
                "Replacing unhealthy {} slot of {} (version {:?})",
                target,
                slots.key(),
                current.version
            );
        }
        let had_container = !current.is_empty();

        // 3. Open the deployment record
        let mut record = DeploymentRecord::pending(
            &slots.project_name,
            &slots.environment,
            target,
            params.version.clone(),
            &image,
            &auth.credential_id,
            self.deps.clock.now(),
        );
        self.deps.records.save(&record).await?;
        info!(
            "Deploying {} to {} slot of {} (deployment {})",
            image,
            target,
            slots.key(),
            record.id
        );

        let mut labels = BTreeMap::new();
        labels.insert("slotplane.project".to_string(), slots.project_name.clone());
        labels.insert("slotplane.environment".to_string(), slots.environment.clone());
        labels.insert("slotplane.slot".to_string(), target.to_string());
        labels.insert("slotplane.deployment".to_string(), record.id.clone());
        let spec = ContainerSpec {
            name: slots.container_name(target),
            image: image.clone(),
            host_port: slots.slot(target).port,
            container_port: params
                .container_port
                .unwrap_or(self.options.default_container_port),
            env_file: None,
            labels,
        };

        // 4. Remote phase, bounded by the operation timeout
        let mut progress = DeployProgress {
            old_removed: false,
            started: false,
        };
        let remote = tokio::time::timeout(
            self.options.operation_timeout,
            self.remote_deploy(&slots, spec.clone(), &mut progress, &mut record),
        )
        .await;

        match remote {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(self
                    .abort_deploy(&slots, target, had_container, &progress, &mut record, e)
                    .await);
            }
            Err(_) => {
                let e = PlaneError::RemoteExec(RemoteExecError::Timeout {
                    host: slots.host.clone(),
                    timeout_ms: self.options.operation_timeout.as_millis() as u64,
                });
                return Err(self
                    .abort_deploy(&slots, target, had_container, &progress, &mut record, e)
                    .await);
            }
        }

        // 5. Track the started container before probing it
        let now = self.deps.clock.now();
        let event = SlotEvent::Deploy {
            version: params.version.clone(),
            image: image.clone(),
            deployed_by: auth.credential_id.clone(),
            deployed_at: now,
            health: if params.skip_healthcheck {
                HealthStatus::Healthy
            } else {
                HealthStatus::Unknown
            },
        };
        let written = self
            .update_pair(&slots.project_name, &slots.environment, |pair| {
                pair.slot_mut(target).process(event.clone())
            })
            .await;

        if let Err(e) = written {
            error!(
                "Registry write failed after starting {}: {}",
                spec.name, e
            );
            self.compensate(&slots.host, &spec.name).await;
            record.finish(Some(e.to_string()), self.deps.clock.now());
            self.save_record(&record).await;
            return Err(e);
        }

        // 6. Health check, bounded by its own budget; a timeout is a failed check
        let health = if params.skip_healthcheck {
            debug!("Skipping health check for {}", spec.name);
            Ok(())
        } else {
            let health = self
                .check_health(&slots.host, spec.host_port, &mut record)
                .await;
            let status = match &health {
                Ok(()) => HealthStatus::Healthy,
                Err(_) => HealthStatus::Unhealthy,
            };
            if let Err(e) = self.set_health(&slots, target, status).await {
                error!("Failed to store health of {} slot of {}: {}", target, slots.key(), e);
                record.finish(Some(e.to_string()), self.deps.clock.now());
                self.save_record(&record).await;
                return Err(e);
            }
            health
        };

        // 7. Close the record
        if let Err(reason) = health {
            warn!("Health check failed for {} slot of {}: {}", target, slots.key(), reason);
            record.finish(Some(reason.clone()), self.deps.clock.now());
            self.save_record(&record).await;
            return Err(PlaneError::HealthCheckFailed {
                slot: target.to_string(),
                port: spec.host_port,
                reason,
            });
        }

        record.finish(None, self.deps.clock.now());
        self.save_record(&record).await;
        info!(
            "Deployed {} to {} slot of {} on port {}",
            image,
            target,
            slots.key(),
            spec.host_port
        );

        // 8. Preview
        Ok(DeployResult {
            deployment_id: record.id,
            slot: target,
            port: spec.host_port,
            host: slots.host.clone(),
            image,
        })
    }

    /// Remote steps of a deploy up to a started container; any error aborts
    async fn remote_deploy(
        &self,
        slots: &ProjectSlots,
        mut spec: ContainerSpec,
        progress: &mut DeployProgress,
        record: &mut DeploymentRecord,
    ) -> Result<(), PlaneError> {
        let host = slots.host.as_str();

        // 1. Ship the env snapshot
        if let Some(contents) = self
            .deps
            .env_store
            .current(&slots.project_name, &slots.environment)
            .await?
        {
            let path = format!(
                "{}/{}.env",
                self.options.remote_env_dir.trim_end_matches('/'),
                spec.name
            );
            let command = RemoteCommand::WriteFile {
                path: path.clone(),
                contents: contents.into_bytes(),
            };
            self.step(record, "write-env", host, &command).await?;
            spec.env_file = Some(path);
        }

        // 2. Pull image
        let pull = RemoteCommand::PullImage {
            image: spec.image.clone(),
        };
        self.step(record, "pull", host, &pull).await?;

        // 3. Replace whatever runs in the slot
        let started = Instant::now();
        let removed = self.stop_and_remove(host, &spec.name).await;
        record.push_step(
            "remove-previous",
            removed.as_ref().map(|_| ()).map_err(|e| e.to_string()),
            started.elapsed().as_millis() as u64,
            self.deps.clock.now(),
        );
        removed?;
        progress.old_removed = true;

        // 4. Start the new container
        let run = RemoteCommand::RunContainer(spec.clone());
        self.step(record, "run", host, &run).await?;
        progress.started = true;
        record.status = DeploymentStatus::Running;
        self.save_record(record).await;
        Ok(())
    }

    async fn check_health(
        &self,
        host: &str,
        port: u16,
        record: &mut DeploymentRecord,
    ) -> Result<(), String> {
        let started = Instant::now();
        let budget = self.options.health.budget();
        let health = match tokio::time::timeout(budget, self.wait_healthy(host, port)).await {
            Ok(health) => health,
            Err(_) => Err(format!(
                "health check timed out after {}ms",
                budget.as_millis()
            )),
        };
        record.push_step(
            "health-check",
            health.clone(),
            started.elapsed().as_millis() as u64,
            self.deps.clock.now(),
        );
        health
    }

    async fn step(
        &self,
        record: &mut DeploymentRecord,
        name: &str,
        host: &str,
        command: &RemoteCommand,
    ) -> Result<(), PlaneError> {
        let started = Instant::now();
        let result = self
            .deps
            .executor
            .run(host, command, &self.options.run_options)
            .await;
        record.push_step(
            name,
            result.as_ref().map(|_| ()).map_err(|e| e.to_string()),
            started.elapsed().as_millis() as u64,
            self.deps.clock.now(),
        );
        result?;
        Ok(())
    }

    /// Probe until healthy or out of retries
    async fn wait_healthy(&self, host: &str, port: u16) -> Result<(), String> {
        let probe = RemoteCommand::HttpProbe {
            port,
            path: self.options.health.path.clone(),
        };
        let options = RunOptions {
            timeout: self.options.health.timeout,
            retries: 0,
        };

        let attempts = self.options.health.retries.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match self.deps.executor.run(host, &probe, &options).await {
                Ok(_) => {
                    debug!("Port {} healthy after {} attempt(s)", port, attempt);
                    return Ok(());
                }
                Err(e) => {
                    debug!("Health probe {}/{} on port {} failed: {}", attempt, attempts, port, e);
                    last_error = e.to_string();
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.options.health.interval).await;
            }
        }
        Err(format!(
            "not healthy after {} attempt(s): {}",
            attempts, last_error
        ))
    }

    /// Stop and remove a container; a missing container is not an error
    async fn stop_and_remove(&self, host: &str, name: &str) -> Result<(), PlaneError> {
        let commands = [
            RemoteCommand::StopContainer {
                name: name.to_string(),
            },
            RemoteCommand::RemoveContainer {
                name: name.to_string(),
            },
        ];
        for command in &commands {
            match self
                .deps
                .executor
                .run(host, command, &self.options.run_options)
                .await
            {
                Ok(_) => {}
                Err(RemoteExecError::CommandFailed { stderr, .. }) if is_missing_container(&stderr) => {
                    debug!("Container {} not present on {}", name, host);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Best-effort removal of a container this operation started. Returns
    /// whether the container is gone.
    async fn compensate(&self, host: &str, name: &str) -> bool {
        match self.stop_and_remove(host, name).await {
            Ok(()) => {
                info!("Removed {} from {} after failed deploy", name, host);
                true
            }
            Err(e) => {
                error!("Failed to remove {} from {} after failed deploy: {}", name, host, e);
                false
            }
        }
    }

    async fn abort_deploy(
        &self,
        slots: &ProjectSlots,
        target: SlotName,
        had_container: bool,
        progress: &DeployProgress,
        record: &mut DeploymentRecord,
        err: PlaneError,
    ) -> PlaneError {
        warn!("Deploy to {} slot of {} failed: {}", target, slots.key(), err);

        // Until the old container is gone the slot still holds it
        if !progress.old_removed {
            record.finish(Some(err.to_string()), self.deps.clock.now());
            self.save_record(record).await;
            return err;
        }

        let cleared = self
            .compensate(&slots.host, &slots.container_name(target))
            .await;
        if !cleared {
            error!(
                "{} slot of {} left untouched: a container may still run under {}",
                target,
                slots.key(),
                slots.container_name(target)
            );
        }

        if had_container && cleared {
            if let Err(e) = self.clear_slot(slots, target).await {
                error!("Failed to clear {} slot of {}: {}", target, slots.key(), e);
            }
        }

        record.finish(Some(err.to_string()), self.deps.clock.now());
        self.save_record(record).await;
        err
    }

    /// Switch live traffic to the inactive slot
    pub async fn promote(
        &self,
        auth: &AuthContext,
        params: PromoteParams,
    ) -> Result<PromoteResult, PlaneError> {
        let span = info_span!("promote", project = %params.project, environment = %params.environment);
        self.promote_inner(auth, params).instrument(span).await
    }

    async fn promote_inner(
        &self,
        auth: &AuthContext,
        params: PromoteParams,
    ) -> Result<PromoteResult, PlaneError> {
        PermissionGate::authorize_project(auth, Action::DeployPromote, &params.project)?;
        validate_pair(&params.project, &params.environment)?;

        let _pair = self.locks.acquire(&params.project, &params.environment).await;
        let slots = self
            .owned_pair(auth, &params.project, &params.environment)
            .await?;

        let target = promote_target(&slots)?;
        check_promotable(&slots, target, params.force)?;
        let previous = slots.active_slot;
        let route = self.route(&slots);
        let port = slots.slot(target).port;

        // 1. Traffic first; a failed switch leaves the registry untouched
        self.deps.router.switch(&route, &slots.host, port).await?;

        // 2. Flip the pair
        let expires_at = self.deps.clock.now() + self.options.grace_period;
        let force = params.force;
        let written = self
            .update_pair(&slots.project_name, &slots.environment, |pair| {
                if pair.active_slot != previous {
                    return Err(PlaneError::InvalidTransition(format!(
                        "live slot of {} changed during promote",
                        pair.key()
                    )));
                }
                check_promotable(pair, target, force)?;
                pair.slot_mut(target).process(SlotEvent::Promote)?;
                if let Some(prev) = previous {
                    pair.slot_mut(prev).process(SlotEvent::Demote { expires_at })?;
                }
                pair.active_slot = Some(target);
                Ok(())
            })
            .await;

        if let Err(e) = written {
            self.restore_route(&slots, &route, previous).await;
            return Err(e);
        }

        // 3. Annotate the promoted deployment
        self.annotate(&slots.project_name, &slots.environment, |r| {
            r.slot == target && r.status == DeploymentStatus::Success
        }, |r, now| {
            r.promoted_at = Some(now);
            r.promoted_by = Some(auth.credential_id.clone());
        })
        .await;

        info!(
            "Promoted {} slot of {} (port {}), previous: {:?}",
            target,
            slots.key(),
            port,
            previous
        );
        Ok(PromoteResult {
            active_slot: target,
            port,
            route: route.domain,
            grace_slot: previous,
            grace_expires_at: previous.map(|_| expires_at),
        })
    }

    /// Switch live traffic back to the grace slot
    pub async fn rollback(
        &self,
        auth: &AuthContext,
        params: RollbackParams,
    ) -> Result<RollbackResult, PlaneError> {
        let span = info_span!("rollback", project = %params.project, environment = %params.environment);
        self.rollback_inner(auth, params).instrument(span).await
    }

    async fn rollback_inner(
        &self,
        auth: &AuthContext,
        params: RollbackParams,
    ) -> Result<RollbackResult, PlaneError> {
        PermissionGate::authorize_project(auth, Action::DeployRollback, &params.project)?;
        validate_pair(&params.project, &params.environment)?;

        let _pair = self.locks.acquire(&params.project, &params.environment).await;
        let slots = self
            .owned_pair(auth, &params.project, &params.environment)
            .await?;

        let no_grace = || PlaneError::NoGraceSlot {
            project: params.project.clone(),
            environment: params.environment.clone(),
        };
        let grace = slots.grace_slot().ok_or_else(no_grace)?;
        let demoted = slots.active_slot;
        let route = self.route(&slots);
        let port = slots.slot(grace).port;

        // 1. Traffic back to the grace slot
        self.deps.router.switch(&route, &slots.host, port).await?;

        // 2. Flip the pair
        let written = self
            .update_pair(&slots.project_name, &slots.environment, |pair| {
                if pair.slot(grace).state != SlotState::Grace || pair.active_slot != demoted {
                    return Err(no_grace());
                }
                pair.slot_mut(grace).process(SlotEvent::Restore)?;
                if let Some(active) = demoted {
                    pair.slot_mut(active).process(SlotEvent::Retire)?;
                }
                pair.active_slot = Some(grace);
                Ok(())
            })
            .await;

        if let Err(e) = written {
            self.restore_route(&slots, &route, demoted).await;
            return Err(e);
        }

        // 3. Annotate the deployment that was live
        if let Some(active) = demoted {
            let reason = params.reason.clone();
            self.annotate(&slots.project_name, &slots.environment, |r| {
                r.slot == active && r.promoted_at.is_some() && r.rolled_back_at.is_none()
            }, |r, now| {
                r.rolled_back_at = Some(now);
                r.rolled_back_by = Some(auth.credential_id.clone());
                r.rollback_reason = reason.clone();
            })
            .await;
        }

        info!(
            "Rolled back {} to {} slot (port {}), reason: {:?}",
            slots.key(),
            grace,
            port,
            params.reason
        );
        Ok(RollbackResult {
            active_slot: grace,
            port,
            route: route.domain,
            demoted_slot: demoted,
        })
    }

    /// Point the route back where it was after a failed registry write
    async fn restore_route(&self, slots: &ProjectSlots, route: &Route, previous: Option<SlotName>) {
        let restored = match previous {
            Some(prev) => {
                self.deps
                    .router
                    .switch(route, &slots.host, slots.slot(prev).port)
                    .await
            }
            None => self.deps.router.remove(route, &slots.host).await,
        };
        match restored {
            Ok(()) => warn!("Restored route {} after failed registry write", route.domain),
            Err(e) => error!(
                "Route {} left pointing at a slot the registry does not consider live: {}",
                route.domain, e
            ),
        }
    }

    /// Retire grace slots past their window (any grace slot with `force`)
    pub async fn cleanup(
        &self,
        auth: &AuthContext,
        params: CleanupParams,
    ) -> Result<CleanupResult, PlaneError> {
        PermissionGate::authorize_project(auth, Action::SlotCleanup, &params.project)?;
        validate_pair(&params.project, &params.environment)?;

        let span = info_span!("cleanup", project = %params.project, environment = %params.environment);
        async {
            let _pair = self.locks.acquire(&params.project, &params.environment).await;
            let slots = self
                .owned_pair(auth, &params.project, &params.environment)
                .await?;
            self.cleanup_pair(slots, params.force).await
        }
        .instrument(span)
        .await
    }

    /// Cleanup run by the scheduler: no credential, no gate, audited as the
    /// scheduler. Returns an empty result when nothing was due.
    pub async fn cleanup_as_scheduler(
        &self,
        project: &str,
        environment: &str,
    ) -> Result<CleanupResult, PlaneError> {
        let started = Instant::now();
        let _pair = self.locks.acquire(project, environment).await;

        let slots = self
            .read_pair(project, environment)
            .await?
            .ok_or_else(|| PlaneError::NotFound(format!("no slots for {}/{}", project, environment)))?;
        let team_id = slots.team_id.clone();
        let outcome = self.cleanup_pair(slots, false).await;

        let acted = match &outcome {
            Ok(result) => !result.cleaned.is_empty(),
            Err(_) => true,
        };
        if acted {
            let entry = build_entry(
                Action::SlotCleanup.as_str(),
                AuditSubject {
                    actor: ActorKind::Scheduler,
                    team_id: Some(team_id),
                    credential_id: None,
                    resource: "slots".to_string(),
                    resource_id: format!("{}/{}", project, environment),
                },
                &outcome,
                started.elapsed().as_millis() as u64,
                self.deps.clock.now(),
            );
            if let Err(e) = self.deps.audit.record(entry).await {
                error!("Failed to record scheduler cleanup of {}/{}: {}", project, environment, e);
            }
        }
        outcome
    }

    async fn cleanup_pair(
        &self,
        slots: ProjectSlots,
        force: bool,
    ) -> Result<CleanupResult, PlaneError> {
        let now = self.deps.clock.now();
        let due: Vec<SlotName> = SlotName::ALL
            .into_iter()
            .filter(|name| {
                let slot = slots.slot(*name);
                slot.state == SlotState::Grace
                    && (force || slot.grace_expires_at.map(|t| t <= now).unwrap_or(false))
            })
            .collect();

        if due.is_empty() {
            debug!("Nothing to clean up for {}", slots.key());
            return Ok(CleanupResult::default());
        }

        let mut cleaned = Vec::with_capacity(due.len());
        for name in due {
            self.stop_and_remove(&slots.host, &slots.container_name(name))
                .await?;
            self.clear_slot(&slots, name).await?;
            cleaned.push(name);
        }

        info!("Retired {:?} slot(s) of {}", cleaned, slots.key());
        Ok(CleanupResult { cleaned })
    }

    /// Slot state of one pair; the last-known copy when the registry is down
    pub async fn status(
        &self,
        auth: &AuthContext,
        params: StatusParams,
    ) -> Result<StatusResult, PlaneError> {
        PermissionGate::authorize_project(auth, Action::SlotStatus, &params.project)?;
        validate_pair(&params.project, &params.environment)?;

        let (slots, stale, cached_at) = match self
            .read_pair(&params.project, &params.environment)
            .await
        {
            Ok(Some(slots)) => (slots, false, None),
            Ok(None) => return Err(not_found(&params.project, &params.environment)),
            Err(PlaneError::RegistryUnavailable(reason)) => {
                match self.deps.cache.get(&params.project, &params.environment) {
                    Some(entry) => {
                        warn!(
                            "Registry unavailable ({}), serving cached {}",
                            reason,
                            entry.slots.key()
                        );
                        (entry.slots, true, Some(entry.cached_at))
                    }
                    None => return Err(PlaneError::RegistryUnavailable(reason)),
                }
            }
            Err(e) => return Err(e),
        };
        check_owner(auth, &slots)?;

        let live = if params.live {
            Some(self.inspect(&slots).await)
        } else {
            None
        };

        Ok(StatusResult {
            slots,
            stale,
            cached_at,
            live,
        })
    }

    async fn inspect(&self, slots: &ProjectSlots) -> Vec<LiveSlot> {
        let mut live = Vec::new();
        for name in SlotName::ALL {
            if slots.slot(name).is_empty() {
                continue;
            }
            let container = slots.container_name(name);
            let command = RemoteCommand::InspectContainer {
                name: container.clone(),
            };
            let (status, degraded) = match self
                .deps
                .executor
                .run(&slots.host, &command, &self.options.run_options)
                .await
            {
                Ok(output) => (output.stdout.trim().to_string(), output.degraded),
                Err(RemoteExecError::CommandFailed { stderr, .. }) if is_missing_container(&stderr) => {
                    ("missing".to_string(), false)
                }
                Err(e) => (format!("unknown ({})", e.kind()), false),
            };
            live.push(LiveSlot {
                slot: name,
                container,
                status,
                degraded,
            });
        }
        live
    }

    /// Every pair of the caller's team visible to the credential
    pub async fn list(&self, auth: &AuthContext) -> Result<SlotListResult, PlaneError> {
        PermissionGate::authorize(auth, Action::SlotList)?;

        let (projects, stale) = match self.deps.registry.list_by_team(&auth.team_id).await {
            Ok(projects) => {
                let now = self.deps.clock.now();
                for pair in &projects {
                    self.deps.cache.insert(pair.clone(), now);
                }
                (projects, false)
            }
            Err(PlaneError::RegistryUnavailable(reason)) => {
                warn!("Registry unavailable ({}), listing cached slots", reason);
                (self.deps.cache.list_by_team(&auth.team_id), true)
            }
            Err(e) => return Err(e),
        };

        Ok(SlotListResult {
            projects: projects
                .into_iter()
                .filter(|p| auth.allows_project(&p.project_name))
                .collect(),
            stale,
        })
    }

    /// Deployment records of one pair, newest first
    pub async fn history(
        &self,
        auth: &AuthContext,
        params: HistoryParams,
    ) -> Result<Vec<DeploymentRecord>, PlaneError> {
        PermissionGate::authorize_project(auth, Action::DeployHistory, &params.project)?;
        validate_pair(&params.project, &params.environment)?;
        self.owned_pair(auth, &params.project, &params.environment)
            .await?;

        let limit = params.limit.unwrap_or(20).clamp(1, 200);
        self.deps
            .records
            .list(&params.project, &params.environment, limit)
            .await
    }

    /// Read a pair and refresh the cache
    async fn read_pair(
        &self,
        project: &str,
        environment: &str,
    ) -> Result<Option<ProjectSlots>, PlaneError> {
        let slots = self.deps.registry.get(project, environment).await?;
        if let Some(slots) = &slots {
            self.deps.cache.insert(slots.clone(), self.deps.clock.now());
        }
        Ok(slots)
    }

    /// Read a pair the caller's team owns
    async fn owned_pair(
        &self,
        auth: &AuthContext,
        project: &str,
        environment: &str,
    ) -> Result<ProjectSlots, PlaneError> {
        let slots = self
            .read_pair(project, environment)
            .await?
            .ok_or_else(|| not_found(project, environment))?;
        check_owner(auth, &slots)?;
        Ok(slots)
    }

    async fn load_or_create(
        &self,
        auth: &AuthContext,
        project: &str,
        environment: &str,
        target: &EnvironmentSettings,
    ) -> Result<ProjectSlots, PlaneError> {
        if let Some(slots) = self.read_pair(project, environment).await? {
            check_owner(auth, &slots)?;
            return Ok(slots);
        }

        let _alloc = self.ports.lock().await;
        let existing = self.deps.registry.list_all().await?;
        if existing
            .iter()
            .any(|p| p.project_name == project && p.team_id != auth.team_id)
        {
            return Err(PlaneError::PermissionDenied(format!(
                "project {} belongs to another team",
                project
            )));
        }

        let (blue, green) = ports::allocate(&existing, &target.host, target.base_port)?;
        let fresh = ProjectSlots::new(
            project,
            environment,
            &auth.team_id,
            &target.host,
            blue,
            green,
            self.deps.clock.now(),
        );
        let stored = self.deps.registry.upsert(fresh).await?;
        self.deps.cache.insert(stored.clone(), self.deps.clock.now());
        info!(
            "Created {} on {} with ports {}/{}",
            stored.key(),
            stored.host,
            blue,
            green
        );
        Ok(stored)
    }

    /// Re-read, apply, write; retried on version conflicts
    async fn update_pair<F>(
        &self,
        project: &str,
        environment: &str,
        mut apply: F,
    ) -> Result<ProjectSlots, PlaneError>
    where
        F: FnMut(&mut ProjectSlots) -> Result<(), PlaneError> + Send,
    {
        let mut attempt = 0;
        loop {
            let mut slots = self
                .deps
                .registry
                .get(project, environment)
                .await?
                .ok_or_else(|| not_found(project, environment))?;
            apply(&mut slots)?;

            match self.deps.registry.upsert(slots).await {
                Ok(stored) => {
                    self.deps.cache.insert(stored.clone(), self.deps.clock.now());
                    return Ok(stored);
                }
                Err(PlaneError::SlotConflict { .. }) if attempt < self.options.conflict_retries => {
                    let delay = calc_exp_backoff(&self.options.conflict_cooldown, attempt);
                    warn!(
                        "Version conflict on {}/{}, retrying in {:?}",
                        project, environment, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn set_health(
        &self,
        slots: &ProjectSlots,
        slot: SlotName,
        health: HealthStatus,
    ) -> Result<(), PlaneError> {
        let stored = self
            .deps
            .registry
            .update_slot_health(&slots.project_name, &slots.environment, slot, health)
            .await?;
        self.deps.cache.insert(stored, self.deps.clock.now());
        Ok(())
    }

    /// Mark a slot whose container is gone as empty
    async fn clear_slot(&self, slots: &ProjectSlots, slot: SlotName) -> Result<(), PlaneError> {
        let stored = self
            .deps
            .registry
            .update_slot_state(&slots.project_name, &slots.environment, slot, SlotState::Empty)
            .await?;
        self.deps.cache.insert(stored, self.deps.clock.now());
        Ok(())
    }

    /// Update the newest record matching `select`
    async fn annotate<S, U>(&self, project: &str, environment: &str, select: S, update: U)
    where
        S: Fn(&DeploymentRecord) -> bool + Send,
        U: FnOnce(&mut DeploymentRecord, DateTime<Utc>) + Send,
    {
        let records = match self.deps.records.list(project, environment, 200).await {
            Ok(records) => records,
            Err(e) => {
                warn!("Failed to read deployment history of {}/{}: {}", project, environment, e);
                return;
            }
        };
        if let Some(mut record) = records.into_iter().find(|r| select(r)) {
            update(&mut record, self.deps.clock.now());
            self.save_record(&record).await;
        }
    }

    async fn save_record(&self, record: &DeploymentRecord) {
        if let Err(e) = self.deps.records.save(record).await {
            warn!("Failed to save deployment record {}: {}", record.id, e);
        }
    }

    fn resolve_image(&self, params: &DeployParams) -> Result<String, PlaneError> {
        let image = match (&params.image, &params.version) {
            (Some(image), _) => image.clone(),
            (None, Some(version)) => {
                validate_image(version).map_err(PlaneError::Validation)?;
                match &self.options.image_registry {
                    Some(registry) => format!(
                        "{}/{}:{}",
                        registry.trim_end_matches('/'),
                        params.project,
                        version
                    ),
                    None => format!("{}:{}", params.project, version),
                }
            }
            (None, None) => {
                return Err(PlaneError::Validation(
                    "either version or image is required".to_string(),
                ))
            }
        };
        validate_image(&image).map_err(PlaneError::Validation)?;
        Ok(image)
    }
}

fn validate_pair(project: &str, environment: &str) -> Result<(), PlaneError> {
    validate_name("project", project).map_err(PlaneError::Validation)?;
    validate_name("environment", environment).map_err(PlaneError::Validation)
}

fn not_found(project: &str, environment: &str) -> PlaneError {
    PlaneError::NotFound(format!("no slots for {}/{}", project, environment))
}

fn check_owner(auth: &AuthContext, slots: &ProjectSlots) -> Result<(), PlaneError> {
    if slots.team_id != auth.team_id {
        return Err(PlaneError::PermissionDenied(format!(
            "{} belongs to another team",
            slots.key()
        )));
    }
    Ok(())
}

/// The non-live slot; on a pair with nothing live, the slot already holding
/// a deploy, else blue
pub fn deploy_target(slots: &ProjectSlots) -> SlotName {
    if let Some(inactive) = slots.inactive_slot() {
        return inactive;
    }
    SlotName::ALL
        .into_iter()
        .find(|name| slots.slot(*name).state == SlotState::Deployed)
        .unwrap_or(SlotName::Blue)
}

fn promote_target(slots: &ProjectSlots) -> Result<SlotName, PlaneError> {
    if let Some(inactive) = slots.inactive_slot() {
        return Ok(inactive);
    }
    SlotName::ALL
        .into_iter()
        .find(|name| slots.slot(*name).state == SlotState::Deployed)
        .ok_or_else(|| PlaneError::NotReady(format!("nothing deployed in {}", slots.key())))
}

fn check_promotable(slots: &ProjectSlots, target: SlotName, force: bool) -> Result<(), PlaneError> {
    let slot = slots.slot(target);
    if slot.state != SlotState::Deployed {
        return Err(PlaneError::NotReady(format!(
            "{} slot of {} is {}",
            target,
            slots.key(),
            slot.state
        )));
    }
    if !force && slot.health_status != HealthStatus::Healthy {
        return Err(PlaneError::NotReady(format!(
            "{} slot of {} is not healthy ({:?})",
            target,
            slots.key(),
            slot.health_status
        )));
    }
    Ok(())
}
