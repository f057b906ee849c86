//! Orchestrator tests: deploy, promote, rollback and cleanup against fakes

use std::sync::Arc;
use std::time::Duration;

use plane_api::models::{CleanupParams, HistoryParams, RollbackParams, StatusParams};

use slotplane::authn::credential::Role;
use slotplane::deploy::orchestrator::Orchestrator;
use slotplane::errors::{PlaneError, RemoteExecError};
use slotplane::models::audit::ActorKind;
use slotplane::models::deployment::DeploymentStatus;
use slotplane::models::slot::{HealthStatus, SlotName, SlotState};
use slotplane::filesys::dir::Dir;
use slotplane::registry::file::FileSlotRegistry;
use slotplane::registry::memory::MemorySlotRegistry;
use slotplane::remote::RemoteCommand;
use slotplane::workers::grace_cleanup;

use crate::support::{
    auth, auth_for, deploy_params, promote_params, test_clock, test_options, FlakyRegistry,
    Harness,
};

const ROUTE: &str = "checkout-staging.apps.test";

fn rollback_params() -> RollbackParams {
    RollbackParams {
        project: "checkout".to_string(),
        environment: "staging".to_string(),
        reason: Some("error spike".to_string()),
    }
}

fn cleanup_params(force: bool) -> CleanupParams {
    CleanupParams {
        project: "checkout".to_string(),
        environment: "staging".to_string(),
        force,
    }
}

fn status_params(live: bool) -> StatusParams {
    StatusParams {
        project: "checkout".to_string(),
        environment: "staging".to_string(),
        live,
    }
}

/// v1 live on blue, v2 live on green, blue in grace
async fn scenario_b(h: &Harness) {
    let member = auth(Role::Member);
    h.orchestrator
        .deploy(&member, deploy_params("checkout", "staging", "v1"))
        .await
        .unwrap();
    h.orchestrator
        .promote(&member, promote_params("checkout", "staging"))
        .await
        .unwrap();
    h.clock.advance(chrono::Duration::minutes(5));
    h.orchestrator
        .deploy(&member, deploy_params("checkout", "staging", "v2"))
        .await
        .unwrap();
    h.orchestrator
        .promote(&member, promote_params("checkout", "staging"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_first_deploy_and_promote() {
    let h = Harness::new();
    let member = auth(Role::Member);

    let deployed = h
        .orchestrator
        .deploy(&member, deploy_params("checkout", "staging", "v1"))
        .await
        .unwrap();
    assert_eq!(deployed.slot, SlotName::Blue);
    assert_eq!(deployed.port, 4000);
    assert_eq!(deployed.image, "registry.local/checkout:v1");

    let pair = h.pair("checkout", "staging").await;
    assert_eq!(pair.blue.state, SlotState::Deployed);
    assert_eq!(pair.blue.health_status, HealthStatus::Healthy);
    assert_eq!(pair.green.state, SlotState::Empty);
    assert_eq!(pair.green.port, 4001);
    assert_eq!(pair.active_slot, None);
    assert_eq!(h.router.port_of(ROUTE), None);

    let promoted = h
        .orchestrator
        .promote(&member, promote_params("checkout", "staging"))
        .await
        .unwrap();
    assert_eq!(promoted.active_slot, SlotName::Blue);
    assert_eq!(promoted.grace_slot, None);

    let pair = h.pair("checkout", "staging").await;
    assert_eq!(pair.blue.state, SlotState::Active);
    assert_eq!(pair.active_slot, Some(SlotName::Blue));
    assert_eq!(h.router.port_of(ROUTE), Some(4000));
    assert!(pair.check_invariants().is_ok());
}

#[tokio::test]
async fn test_second_promote_puts_previous_in_grace() {
    let h = Harness::new();
    scenario_b(&h).await;

    let pair = h.pair("checkout", "staging").await;
    assert_eq!(pair.active_slot, Some(SlotName::Green));
    assert_eq!(pair.green.state, SlotState::Active);
    assert_eq!(pair.green.version.as_deref(), Some("v2"));
    assert_eq!(pair.blue.state, SlotState::Grace);
    assert_eq!(
        pair.blue.grace_expires_at,
        Some(h.clock_now() + chrono::Duration::hours(48))
    );
    assert_eq!(h.router.port_of(ROUTE), Some(4001));
    assert!(pair.check_invariants().is_ok());
}

#[tokio::test]
async fn test_rollback_within_grace_window() {
    let h = Harness::new();
    scenario_b(&h).await;
    h.clock.advance(chrono::Duration::hours(1));

    let rolled = h
        .orchestrator
        .rollback(&auth(Role::Member), rollback_params())
        .await
        .unwrap();
    assert_eq!(rolled.active_slot, SlotName::Blue);
    assert_eq!(rolled.demoted_slot, Some(SlotName::Green));

    let pair = h.pair("checkout", "staging").await;
    assert_eq!(pair.active_slot, Some(SlotName::Blue));
    assert_eq!(pair.blue.state, SlotState::Active);
    assert_eq!(pair.blue.grace_expires_at, None);
    // Demoted, not emptied
    assert_eq!(pair.green.state, SlotState::Deployed);
    assert_eq!(pair.green.version.as_deref(), Some("v2"));
    assert_eq!(h.router.port_of(ROUTE), Some(4000));

    // The v2 record carries the rollback annotation
    let history = h
        .orchestrator
        .history(
            &auth(Role::Viewer),
            HistoryParams {
                project: "checkout".to_string(),
                environment: "staging".to_string(),
                limit: None,
            },
        )
        .await
        .unwrap();
    let v2 = history
        .iter()
        .find(|r| r.version.as_deref() == Some("v2"))
        .unwrap();
    assert!(v2.promoted_at.is_some());
    assert!(v2.rolled_back_at.is_some());
    assert_eq!(v2.rollback_reason.as_deref(), Some("error spike"));

    // Promote again goes forward to green
    let promoted = h
        .orchestrator
        .promote(&auth(Role::Member), promote_params("checkout", "staging"))
        .await
        .unwrap();
    assert_eq!(promoted.active_slot, SlotName::Green);
    assert_eq!(h.router.port_of(ROUTE), Some(4001));
}

#[tokio::test]
async fn test_scheduler_retires_expired_grace_slot() {
    let h = Harness::new();
    scenario_b(&h).await;

    // Not due yet
    let report = grace_cleanup::sweep(&h.orchestrator).await;
    assert_eq!(report.cleaned, 0);
    assert_eq!(h.pair("checkout", "staging").await.blue.state, SlotState::Grace);

    h.clock.advance(chrono::Duration::hours(49));
    let report = grace_cleanup::sweep(&h.orchestrator).await;
    assert_eq!(report, grace_cleanup::SweepReport { cleaned: 1, failed: 0 });

    let pair = h.pair("checkout", "staging").await;
    assert_eq!(pair.blue.state, SlotState::Empty);
    assert_eq!(pair.blue.port, 4000);
    assert_eq!(pair.green.state, SlotState::Active);
    assert!(h.executor.commands().contains(&RemoteCommand::RemoveContainer {
        name: "checkout-staging-blue".to_string()
    }));

    let entry = h
        .audit
        .entries()
        .into_iter()
        .find(|e| e.actor == ActorKind::Scheduler)
        .unwrap();
    assert_eq!(entry.action, "slot.cleanup");
    assert!(entry.success);
    assert_eq!(entry.credential_id, None);
    assert_eq!(entry.resource_id, "checkout/staging");

    let err = h
        .orchestrator
        .rollback(&auth(Role::Member), rollback_params())
        .await
        .unwrap_err();
    assert!(matches!(err, PlaneError::NoGraceSlot { .. }));

    // A second sweep finds nothing and writes nothing
    let audited = h.audit.entries().len();
    assert_eq!(grace_cleanup::sweep(&h.orchestrator).await.cleaned, 0);
    assert_eq!(h.audit.entries().len(), audited);
}

#[tokio::test]
async fn test_role_boundaries() {
    let h = Harness::new();

    let err = h
        .orchestrator
        .deploy(&auth(Role::Viewer), deploy_params("checkout", "staging", "v1"))
        .await
        .unwrap_err();
    assert!(matches!(err, PlaneError::PermissionDenied(_)));
    assert!(h.executor.commands().is_empty());

    scenario_b(&h).await;

    let err = h
        .orchestrator
        .cleanup(&auth(Role::Member), cleanup_params(true))
        .await
        .unwrap_err();
    assert!(matches!(err, PlaneError::PermissionDenied(_)));

    let status = h
        .orchestrator
        .status(&auth(Role::Viewer), status_params(false))
        .await
        .unwrap();
    assert!(!status.stale);
    assert_eq!(status.slots.active_slot, Some(SlotName::Green));
}

#[tokio::test]
async fn test_other_team_cannot_touch_pair() {
    let h = Harness::new();
    scenario_b(&h).await;
    let outsider = auth_for("team-2", Role::Owner);

    let err = h
        .orchestrator
        .status(&outsider, status_params(false))
        .await
        .unwrap_err();
    assert!(matches!(err, PlaneError::PermissionDenied(_)));

    let err = h
        .orchestrator
        .promote(&outsider, promote_params("checkout", "staging"))
        .await
        .unwrap_err();
    assert!(matches!(err, PlaneError::PermissionDenied(_)));

    // A new environment of a project owned elsewhere
    let err = h
        .orchestrator
        .deploy(&outsider, deploy_params("checkout", "production", "v1"))
        .await
        .unwrap_err();
    assert!(matches!(err, PlaneError::PermissionDenied(_)));

    let listed = h.orchestrator.list(&outsider).await.unwrap();
    assert!(listed.projects.is_empty());
}

#[tokio::test]
async fn test_project_restricted_credential() {
    let h = Harness::new();
    scenario_b(&h).await;

    let mut restricted = auth(Role::Admin);
    restricted.projects = vec!["billing".to_string()];

    let err = h
        .orchestrator
        .rollback(&restricted, rollback_params())
        .await
        .unwrap_err();
    assert!(matches!(err, PlaneError::PermissionDenied(_)));

    let listed = h.orchestrator.list(&restricted).await.unwrap();
    assert!(listed.projects.is_empty());
    let listed = h.orchestrator.list(&auth(Role::Viewer)).await.unwrap();
    assert_eq!(listed.projects.len(), 1);
}

#[tokio::test]
async fn test_cleanup_is_idempotent() {
    let h = Harness::new();
    scenario_b(&h).await;
    let admin = auth(Role::Admin);

    // Window not elapsed and not forced
    let result = h
        .orchestrator
        .cleanup(&admin, cleanup_params(false))
        .await
        .unwrap();
    assert!(result.cleaned.is_empty());

    // Already gone from the host is fine
    h.executor.set_missing(true);
    let result = h
        .orchestrator
        .cleanup(&admin, cleanup_params(true))
        .await
        .unwrap();
    assert_eq!(result.cleaned, vec![SlotName::Blue]);

    let version = h.pair("checkout", "staging").await.version;
    let result = h
        .orchestrator
        .cleanup(&admin, cleanup_params(true))
        .await
        .unwrap();
    assert!(result.cleaned.is_empty());
    assert_eq!(h.pair("checkout", "staging").await.version, version);
}

#[tokio::test]
async fn test_failed_health_check_leaves_unhealthy_deployed_slot() {
    let h = Harness::new();
    h.executor.set_unhealthy(4000);
    let member = auth(Role::Member);

    let err = h
        .orchestrator
        .deploy(&member, deploy_params("checkout", "staging", "v1"))
        .await
        .unwrap_err();
    match err {
        PlaneError::HealthCheckFailed { slot, port, .. } => {
            assert_eq!(slot, "blue");
            assert_eq!(port, 4000);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(h.executor.count("http-probe"), 2);

    let pair = h.pair("checkout", "staging").await;
    assert_eq!(pair.blue.state, SlotState::Deployed);
    assert_eq!(pair.blue.health_status, HealthStatus::Unhealthy);

    let records = h.records_for("checkout", "staging").await;
    assert_eq!(records[0].status, DeploymentStatus::Failed);

    // Promotion refuses an unhealthy slot unless forced
    let err = h
        .orchestrator
        .promote(&member, promote_params("checkout", "staging"))
        .await
        .unwrap_err();
    assert!(matches!(err, PlaneError::NotReady(_)));

    let mut forced = promote_params("checkout", "staging");
    forced.force = true;
    let promoted = h.orchestrator.promote(&member, forced).await.unwrap();
    assert_eq!(promoted.active_slot, SlotName::Blue);
}

#[tokio::test]
async fn test_skip_healthcheck_marks_healthy() {
    let h = Harness::new();
    h.executor.set_unhealthy(4000);
    let mut params = deploy_params("checkout", "staging", "v1");
    params.skip_healthcheck = true;

    h.orchestrator
        .deploy(&auth(Role::Member), params)
        .await
        .unwrap();
    assert_eq!(h.executor.count("http-probe"), 0);
    assert_eq!(
        h.pair("checkout", "staging").await.blue.health_status,
        HealthStatus::Healthy
    );
}

#[tokio::test]
async fn test_pull_failure_leaves_slot_untouched() {
    let h = Harness::new();
    scenario_b(&h).await;
    let member = auth(Role::Member);
    // Blue is in grace; the next deploy targets it
    let before = h.pair("checkout", "staging").await;
    let stops = h.executor.count("stop");

    h.executor.fail(
        "pull",
        RemoteExecError::CommandFailed {
            host: "localhost".to_string(),
            exit_code: 1,
            stderr: "manifest unknown".to_string(),
        },
    );
    let err = h
        .orchestrator
        .deploy(&member, deploy_params("checkout", "staging", "v3"))
        .await
        .unwrap_err();
    assert!(matches!(err, PlaneError::RemoteExec(RemoteExecError::CommandFailed { .. })));

    assert_eq!(h.executor.count("stop"), stops);
    let after = h.pair("checkout", "staging").await;
    assert_eq!(after.blue, before.blue);
    assert_eq!(after.version, before.version);
}

#[tokio::test]
async fn test_run_failure_compensates_and_clears_slot() {
    let h = Harness::new();
    let member = auth(Role::Member);
    h.orchestrator
        .deploy(&member, deploy_params("checkout", "staging", "v1"))
        .await
        .unwrap();
    h.clock.advance(chrono::Duration::minutes(1));

    h.executor.fail(
        "run",
        RemoteExecError::CommandFailed {
            host: "localhost".to_string(),
            exit_code: 125,
            stderr: "port is already allocated".to_string(),
        },
    );
    let err = h
        .orchestrator
        .deploy(&member, deploy_params("checkout", "staging", "v2"))
        .await
        .unwrap_err();
    assert!(matches!(err, PlaneError::RemoteExec(_)));

    // The old blue container was removed before the failed start
    let pair = h.pair("checkout", "staging").await;
    assert_eq!(pair.blue.state, SlotState::Empty);
    assert!(pair.check_invariants().is_ok());

    let labels = h.executor.labels();
    let tail: Vec<&str> = labels[labels.len() - 2..].to_vec();
    assert_eq!(tail, vec!["stop", "remove"]);

    let records = h.records_for("checkout", "staging").await;
    assert_eq!(records[0].status, DeploymentStatus::Failed);
    assert_eq!(records[0].version.as_deref(), Some("v2"));
}

#[tokio::test]
async fn test_failed_stop_keeps_grace_slot() {
    let h = Harness::new();
    scenario_b(&h).await;
    let member = auth(Role::Member);
    let before = h.pair("checkout", "staging").await;
    let removes = h.executor.count("remove");

    h.executor.fail(
        "stop",
        RemoteExecError::ConnectionUnavailable {
            host: "localhost".to_string(),
            reason: "broken pipe".to_string(),
        },
    );
    let err = h
        .orchestrator
        .deploy(&member, deploy_params("checkout", "staging", "v3"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PlaneError::RemoteExec(RemoteExecError::ConnectionUnavailable { .. })
    ));

    // The old container was never removed, so it is neither compensated nor forgotten
    assert_eq!(h.executor.count("remove"), removes);
    assert_eq!(h.executor.count("run"), 2);
    let after = h.pair("checkout", "staging").await;
    assert_eq!(after.blue.state, SlotState::Grace);
    assert_eq!(after.blue, before.blue);

    h.executor.clear_failures();
    let rolled_back = h
        .orchestrator
        .rollback(&member, rollback_params())
        .await
        .unwrap();
    assert_eq!(rolled_back.active_slot, SlotName::Blue);
}

#[tokio::test]
async fn test_slow_health_check_outlives_operation_timeout() {
    let mut options = test_options();
    options.operation_timeout = Duration::from_millis(200);
    options.health.retries = 50;
    options.health.interval = Duration::from_millis(10);
    let h = Harness::with_options(options);
    h.executor.set_unhealthy(4000);

    let err = h
        .orchestrator
        .deploy(&auth(Role::Member), deploy_params("checkout", "staging", "v1"))
        .await
        .unwrap_err();
    assert!(matches!(err, PlaneError::HealthCheckFailed { .. }));
    assert_eq!(h.executor.count("http-probe"), 50);
    assert_eq!(h.executor.count("remove"), 1);

    let pair = h.pair("checkout", "staging").await;
    assert_eq!(
        (pair.blue.state, pair.blue.health_status),
        (SlotState::Deployed, HealthStatus::Unhealthy)
    );
}

#[tokio::test]
async fn test_health_budget_elapsed_is_failed_check() {
    let mut options = test_options();
    options.health.retries = 3;
    options.health.interval = Duration::from_millis(1);
    options.health.timeout = Duration::from_millis(1);
    let h = Harness::with_options(options);
    h.executor.set_delay(Duration::from_millis(30));

    let err = h
        .orchestrator
        .deploy(&auth(Role::Member), deploy_params("checkout", "staging", "v1"))
        .await
        .unwrap_err();
    match err {
        PlaneError::HealthCheckFailed { reason, .. } => assert!(reason.contains("timed out")),
        other => panic!("unexpected error: {other}"),
    }

    let pair = h.pair("checkout", "staging").await;
    assert_eq!(pair.blue.state, SlotState::Deployed);
    assert_eq!(pair.blue.health_status, HealthStatus::Unhealthy);
    let records = h.records_for("checkout", "staging").await;
    assert_eq!(records[0].status, DeploymentStatus::Failed);
}

#[tokio::test]
async fn test_unreadable_pair_blocks_port_allocation() {
    let tmp = tempfile::tempdir().unwrap();
    let clock = test_clock();
    let registry = Arc::new(FileSlotRegistry::new(Dir::new(tmp.path()), clock.clone()));
    let h = Harness::with_registry(clock, registry, test_options());

    std::fs::create_dir_all(tmp.path().join("billing")).unwrap();
    std::fs::write(tmp.path().join("billing").join("staging.json"), b"not json").unwrap();

    let err = h
        .orchestrator
        .deploy(&auth(Role::Member), deploy_params("checkout", "staging", "v1"))
        .await
        .unwrap_err();
    assert!(matches!(err, PlaneError::RegistryUnavailable(_)));
    assert!(h.executor.commands().is_empty());
}

#[tokio::test]
async fn test_operation_timeout() {
    let mut options = test_options();
    options.operation_timeout = Duration::from_millis(50);
    let h = Harness::with_options(options);
    h.executor.set_delay(Duration::from_millis(200));

    let err = h
        .orchestrator
        .deploy(&auth(Role::Member), deploy_params("checkout", "staging", "v1"))
        .await
        .unwrap_err();
    assert!(matches!(err, PlaneError::RemoteExec(RemoteExecError::Timeout { .. })));
    assert_eq!(err.kind(), "RemoteTimeout");

    // Nothing was removed or started, so nothing is compensated
    assert_eq!(h.executor.labels(), vec!["pull"]);
    assert_eq!(h.pair("checkout", "staging").await.blue.state, SlotState::Empty);
}

#[tokio::test]
async fn test_env_snapshot_is_shipped() {
    let h = Harness::new();
    h.env_store.set("checkout", "staging", "DATABASE_URL=postgres://db\n");

    h.orchestrator
        .deploy(&auth(Role::Member), deploy_params("checkout", "staging", "v1"))
        .await
        .unwrap();

    let commands = h.executor.commands();
    assert!(matches!(
        &commands[0],
        RemoteCommand::WriteFile { path, contents }
            if path.ends_with("checkout-staging-blue.env")
                && contents == b"DATABASE_URL=postgres://db\n"
    ));
    let spec = commands
        .iter()
        .find_map(|c| match c {
            RemoteCommand::RunContainer(spec) => Some(spec.clone()),
            _ => None,
        })
        .unwrap();
    assert!(spec.env_file.unwrap().ends_with("checkout-staging-blue.env"));
    assert_eq!(spec.host_port, 4000);
    assert_eq!(spec.labels["slotplane.slot"], "blue");
}

#[tokio::test]
async fn test_concurrent_deploys_are_serialized() {
    let h = Harness::new();
    h.executor.set_delay(Duration::from_millis(5));
    let member = auth(Role::Member);

    let first = {
        let orchestrator: Arc<Orchestrator> = h.orchestrator.clone();
        let member = member.clone();
        tokio::spawn(async move {
            orchestrator
                .deploy(&member, deploy_params("checkout", "staging", "v1"))
                .await
        })
    };
    let second = {
        let orchestrator = h.orchestrator.clone();
        let member = member.clone();
        tokio::spawn(async move {
            orchestrator
                .deploy(&member, deploy_params("checkout", "staging", "v2"))
                .await
        })
    };

    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();
    assert_eq!(h.executor.max_in_flight(), 1);

    // One pair, one set of ports
    let pair = h.pair("checkout", "staging").await;
    assert_eq!((pair.blue.port, pair.green.port), (4000, 4001));
    assert_eq!(pair.blue.state, SlotState::Deployed);
    assert_eq!(pair.green.state, SlotState::Empty);
}

#[tokio::test]
async fn test_new_pairs_get_distinct_ports() {
    let h = Harness::new();
    let member = auth(Role::Member);
    h.orchestrator
        .deploy(&member, deploy_params("checkout", "staging", "v1"))
        .await
        .unwrap();
    let billing = h
        .orchestrator
        .deploy(&member, deploy_params("billing", "staging", "v1"))
        .await
        .unwrap();
    assert_eq!(billing.port, 4002);
    let production = h
        .orchestrator
        .deploy(&member, deploy_params("billing", "production", "v1"))
        .await
        .unwrap();
    assert_eq!(production.port, 5000);
}

#[tokio::test]
async fn test_registry_conflicts_are_retried() {
    let clock = test_clock();
    let registry = Arc::new(FlakyRegistry::new(clock.clone()));
    let h = Harness::with_registry(clock, registry.clone(), test_options());
    let member = auth(Role::Member);

    h.orchestrator
        .deploy(&member, deploy_params("checkout", "staging", "v1"))
        .await
        .unwrap();

    registry.conflict_next(2);
    h.orchestrator
        .promote(&member, promote_params("checkout", "staging"))
        .await
        .unwrap();
    assert_eq!(h.pair("checkout", "staging").await.active_slot, Some(SlotName::Blue));
}

#[tokio::test]
async fn test_exhausted_conflicts_restore_route() {
    let clock = test_clock();
    let registry = Arc::new(FlakyRegistry::new(clock.clone()));
    let h = Harness::with_registry(clock, registry.clone(), test_options());
    let member = auth(Role::Member);

    h.orchestrator
        .deploy(&member, deploy_params("checkout", "staging", "v1"))
        .await
        .unwrap();

    registry.conflict_next(100);
    let err = h
        .orchestrator
        .promote(&member, promote_params("checkout", "staging"))
        .await
        .unwrap_err();
    assert!(matches!(err, PlaneError::SlotConflict { .. }));
    assert_eq!(err.status_code(), http::StatusCode::CONFLICT);

    // Nothing was live before, so the route is withdrawn again
    assert_eq!(h.router.switches(), vec![(ROUTE.to_string(), 4000)]);
    assert_eq!(h.router.port_of(ROUTE), None);
    registry.conflict_next(0);
    assert_eq!(h.pair("checkout", "staging").await.active_slot, None);
}

#[tokio::test]
async fn test_failed_switch_leaves_registry_untouched() {
    let h = Harness::new();
    let member = auth(Role::Member);
    h.orchestrator
        .deploy(&member, deploy_params("checkout", "staging", "v1"))
        .await
        .unwrap();
    let before = h.pair("checkout", "staging").await;

    h.router.set_failing(true);
    let err = h
        .orchestrator
        .promote(&member, promote_params("checkout", "staging"))
        .await
        .unwrap_err();
    assert!(matches!(err, PlaneError::RemoteExec(_)));
    assert_eq!(h.pair("checkout", "staging").await, before);
}

#[tokio::test]
async fn test_status_serves_stale_copy_when_registry_is_down() {
    let clock = test_clock();
    let registry = Arc::new(MemorySlotRegistry::new(clock.clone()));
    let h = Harness::with_registry(clock, registry.clone(), test_options());
    scenario_b(&h).await;

    let fresh = h
        .orchestrator
        .status(&auth(Role::Viewer), status_params(true))
        .await
        .unwrap();
    assert!(!fresh.stale);
    let live = fresh.live.unwrap();
    assert_eq!(live.len(), 2);
    assert!(live.iter().all(|l| l.status == "running"));

    registry.set_available(false);
    let stale = h
        .orchestrator
        .status(&auth(Role::Viewer), status_params(false))
        .await
        .unwrap();
    assert!(stale.stale);
    assert!(stale.cached_at.is_some());
    assert_eq!(stale.slots.active_slot, Some(SlotName::Green));

    let listed = h.orchestrator.list(&auth(Role::Viewer)).await.unwrap();
    assert!(listed.stale);
    assert_eq!(listed.projects.len(), 1);

    // Mutations never run on a stale copy
    let err = h
        .orchestrator
        .rollback(&auth(Role::Member), rollback_params())
        .await
        .unwrap_err();
    assert!(matches!(err, PlaneError::RegistryUnavailable(_)));
    assert_eq!(err.status_code(), http::StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_validation_errors() {
    let h = Harness::new();
    let member = auth(Role::Member);

    let mut params = deploy_params("checkout", "staging", "v1");
    params.version = None;
    assert!(matches!(
        h.orchestrator.deploy(&member, params).await.unwrap_err(),
        PlaneError::Validation(_)
    ));

    assert!(matches!(
        h.orchestrator
            .deploy(&member, deploy_params("Bad Name", "staging", "v1"))
            .await
            .unwrap_err(),
        PlaneError::Validation(_)
    ));

    assert!(matches!(
        h.orchestrator
            .deploy(&member, deploy_params("checkout", "qa", "v1"))
            .await
            .unwrap_err(),
        PlaneError::Validation(_)
    ));

    assert!(matches!(
        h.orchestrator
            .status(&member, status_params(false))
            .await
            .unwrap_err(),
        PlaneError::NotFound(_)
    ));
    assert!(h.executor.commands().is_empty());
}
