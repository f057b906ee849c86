//! HTTP surface tests

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use tower::ServiceExt;

use slotplane::app::bootstrap::bootstrap_with;
use slotplane::audit::{AuditRecorder, MemoryAuditRecorder};
use slotplane::authn::admin::AccessAdmin;
use slotplane::authn::credential::{Role, Scopes};
use slotplane::authn::resolver::AuthResolver;
use slotplane::authn::store::{AccessStore, NewCredential};
use slotplane::clock::Clock;
use slotplane::errors::PlaneError;
use slotplane::models::audit::{ActorKind, AuditLogEntry, AuditQuery};
use slotplane::server::dispatch::ToolDispatcher;
use slotplane::server::serve::router;
use slotplane::server::state::ServerState;

use crate::support::Harness;

struct TestServer {
    app: axum::Router,
    audit: Arc<MemoryAuditRecorder>,
    owner_token: SecretString,
    viewer_token: SecretString,
}

async fn create_test_server() -> TestServer {
    let audit = Arc::new(MemoryAuditRecorder::default());
    let (app, owner_token, viewer_token) = build_app(audit.clone()).await;
    TestServer {
        app,
        audit,
        owner_token,
        viewer_token,
    }
}

/// Router over a fresh team with an owner and a viewer token
async fn build_app(audit: Arc<dyn AuditRecorder>) -> (axum::Router, SecretString, SecretString) {
    let harness = Harness::new();
    let clock: Arc<dyn Clock> = harness.clock.clone();
    let now = clock.now();

    let store = Arc::new(AccessStore::in_memory());
    let (team, _, owner_token) = bootstrap_with(&store, "acme", now).await.unwrap();
    let (_, viewer_token) = store
        .issue(
            NewCredential {
                team_id: team.id.clone(),
                name: "readonly".to_string(),
                role: Role::Viewer,
                scopes: Scopes::All,
                projects: Vec::new(),
                expires_at: None,
            },
            now,
        )
        .await
        .unwrap();

    let dispatcher = Arc::new(ToolDispatcher::new(
        Arc::new(AuthResolver::new(store.clone(), clock.clone())),
        harness.orchestrator.clone(),
        Arc::new(AccessAdmin::new(store, harness.registry.clone(), clock.clone())),
        audit,
        clock,
    ));

    (
        router(Arc::new(ServerState::new(dispatcher))),
        owner_token,
        viewer_token,
    )
}

/// Audit log whose disk is gone
struct BrokenAudit;

#[async_trait]
impl AuditRecorder for BrokenAudit {
    async fn record(&self, _entry: AuditLogEntry) -> Result<(), PlaneError> {
        Err(PlaneError::IoError(std::io::Error::other(
            "no space left on device",
        )))
    }

    async fn list(&self, _query: &AuditQuery) -> Result<Vec<AuditLogEntry>, PlaneError> {
        Ok(Vec::new())
    }
}

fn tool_request(token: Option<&SecretString>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/tool")
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token.expose_secret()));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn call(app: &axum::Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_health_endpoint() {
    let server = create_test_server().await;
    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();

    let (status, body) = call(&server.app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "slotplane");
}

#[tokio::test]
async fn test_missing_credential_is_unauthorized() {
    let server = create_test_server().await;

    let (status, body) = call(&server.app, tool_request(None, r#"{"tool":"slot.list"}"#)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["kind"], "AuthInvalid");

    // Rejected before dispatch, so nothing is audited
    assert!(server.audit.entries().is_empty());
}

#[tokio::test]
async fn test_unknown_token_is_unauthorized() {
    let server = create_test_server().await;
    let bogus = SecretString::from("sp_not-a-real-token".to_string());

    let (status, _) = call(&server.app, tool_request(Some(&bogus), r#"{"tool":"slot.list"}"#)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_slot_list_with_owner_token() {
    let server = create_test_server().await;

    let (status, body) = call(
        &server.app,
        tool_request(Some(&server.owner_token), r#"{"tool":"slot.list"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["projects"], serde_json::json!([]));
}

#[tokio::test]
async fn test_viewer_cannot_deploy() {
    let server = create_test_server().await;
    let body = r#"{"tool":"deploy.create","params":{"project":"checkout","environment":"staging","image":"checkout","version":"v1"}}"#;

    let (status, response) = call(&server.app, tool_request(Some(&server.viewer_token), body)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(response["error"]["kind"], "PermissionDenied");

    // Denials are audited synchronously for mutating tools
    let entries = server.audit.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, "deploy.create");
    assert_eq!(entries[0].actor, ActorKind::Credential);
    assert!(!entries[0].success);
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let server = create_test_server().await;

    let (status, body) = call(&server.app, tool_request(Some(&server.owner_token), "{not json")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], "ValidationError");

    let (status, _) = call(
        &server.app,
        tool_request(Some(&server.owner_token), r#"{"tool":"deploy.destroy","params":{}}"#),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_api_key_header_is_accepted() {
    let server = create_test_server().await;
    let request = Request::builder()
        .method("POST")
        .uri("/api/tool")
        .header("x-api-key", server.owner_token.expose_secret())
        .body(Body::from(r#"{"tool":"team.info"}"#))
        .unwrap();

    let (status, body) = call(&server.app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["team"]["name"], "acme");
}

#[tokio::test]
async fn test_unaudited_change_is_not_reported_as_success() {
    let (app, owner_token, _) = build_app(Arc::new(BrokenAudit)).await;
    let body = r#"{"tool":"token.create","params":{"name":"ci","role":"viewer"}}"#;

    let (status, response) = call(&app, tool_request(Some(&owner_token), body)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response["success"], false);
    assert_eq!(response["error"]["kind"], "Internal");

    // Read-only tools are audited in the background and still answer
    let (status, _) = call(&app, tool_request(Some(&owner_token), r#"{"tool":"slot.list"}"#)).await;
    assert_eq!(status, StatusCode::OK);
}
