//! HttpIdentityBroker against a small axum stand-in for the broker's REST API.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use wsm_orchestrator::iam::{
    BearerToken, BrokerResourceRef, BrokerResourceType, HttpIdentityBroker, IdentityBroker, PolicyDocument,
    ServiceIdentity, ACTION_READ,
};
use wsm_orchestrator::{ErrorKind, OrchestratorError};

type Policies = BTreeMap<String, BTreeSet<String>>;

#[derive(Clone, Default)]
struct FakeBroker {
    resources: Arc<Mutex<HashMap<(String, String), Policies>>>,
}

fn caller(headers: &HeaderMap) -> Option<&'static str> {
    match headers.get("authorization").and_then(|v| v.to_str().ok()) {
        Some("Bearer alice-token") => Some("alice@example.com"),
        Some("Bearer service-token") => Some("wsm@service.iam"),
        _ => None,
    }
}

async fn user_info(headers: HeaderMap) -> impl IntoResponse {
    match caller(&headers) {
        Some(email) => (
            StatusCode::OK,
            Json(json!({ "userEmail": email, "userSubjectId": format!("subject-{}", email) })),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "user not found").into_response(),
    }
}

async fn create_resource(
    State(broker): State<FakeBroker>,
    Path(resource_type): Path<String>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let resource_id = body["resourceId"].as_str().unwrap_or_default().to_string();
    let mut policies = Policies::new();
    if let Some(entries) = body["policies"].as_object() {
        for (role, entry) in entries {
            let members = entry["memberEmails"]
                .as_array()
                .map(|emails| emails.iter().filter_map(|e| e.as_str().map(String::from)).collect())
                .unwrap_or_default();
            policies.insert(role.clone(), members);
        }
    }

    let mut resources = broker.resources.lock().unwrap();
    let key = (resource_type, resource_id);
    if resources.contains_key(&key) {
        return StatusCode::CONFLICT;
    }
    resources.insert(key, policies);
    StatusCode::NO_CONTENT
}

async fn delete_resource(
    State(broker): State<FakeBroker>,
    Path((resource_type, resource_id)): Path<(String, String)>,
) -> StatusCode {
    match broker.resources.lock().unwrap().remove(&(resource_type, resource_id)) {
        Some(_) => StatusCode::NO_CONTENT,
        None => StatusCode::NOT_FOUND,
    }
}

async fn list_policies(
    State(broker): State<FakeBroker>,
    Path((resource_type, resource_id)): Path<(String, String)>,
) -> impl IntoResponse {
    if resource_id == "flaky" {
        return (StatusCode::SERVICE_UNAVAILABLE, "try later").into_response();
    }
    let resources = broker.resources.lock().unwrap();
    let Some(policies) = resources.get(&(resource_type, resource_id)) else {
        return (StatusCode::NOT_FOUND, "no such resource").into_response();
    };
    let entries: Vec<Value> = policies
        .iter()
        .map(|(role, members)| {
            json!({
                "policyName": role,
                "policy": { "memberEmails": members, "roles": [role], "actions": [] }
            })
        })
        .collect();
    Json(entries).into_response()
}

async fn add_member(
    State(broker): State<FakeBroker>,
    Path((resource_type, resource_id, role, email)): Path<(String, String, String, String)>,
) -> StatusCode {
    let mut resources = broker.resources.lock().unwrap();
    match resources.get_mut(&(resource_type, resource_id)) {
        Some(policies) => {
            policies.entry(role).or_default().insert(email);
            StatusCode::NO_CONTENT
        }
        None => StatusCode::NOT_FOUND,
    }
}

async fn remove_member(
    State(broker): State<FakeBroker>,
    Path((resource_type, resource_id, role, email)): Path<(String, String, String, String)>,
) -> StatusCode {
    let mut resources = broker.resources.lock().unwrap();
    if let Some(policies) = resources.get_mut(&(resource_type, resource_id)) {
        if let Some(members) = policies.get_mut(&role) {
            members.remove(&email);
        }
    }
    StatusCode::NO_CONTENT
}

async fn check_action(
    State(broker): State<FakeBroker>,
    headers: HeaderMap,
    Path((resource_type, resource_id, _action)): Path<(String, String, String)>,
) -> impl IntoResponse {
    let Some(email) = caller(&headers) else {
        return (StatusCode::UNAUTHORIZED, "").into_response();
    };
    let resources = broker.resources.lock().unwrap();
    let allowed = resources
        .get(&(resource_type, resource_id))
        .is_some_and(|policies| policies.values().any(|members| members.contains(email)));
    Json(allowed).into_response()
}

async fn sync_group(Path((resource_type, resource_id, role)): Path<(String, String, String)>) -> impl IntoResponse {
    Json(json!({ "email": format!("{}-{}-{}@groups.example", resource_type, resource_id, role) }))
}

async fn start_broker() -> String {
    let app = Router::new()
        .route("/register/user/v2/self/info", get(user_info))
        .route("/api/resources/v2/{resource_type}", post(create_resource))
        .route(
            "/api/resources/v2/{resource_type}/{resource_id}",
            axum::routing::delete(delete_resource),
        )
        .route("/api/resources/v2/{resource_type}/{resource_id}/policies", get(list_policies))
        .route(
            "/api/resources/v2/{resource_type}/{resource_id}/policies/{role}/memberEmails/{email}",
            put(add_member).delete(remove_member),
        )
        .route(
            "/api/resources/v2/{resource_type}/{resource_id}/action/{action}",
            get(check_action),
        )
        .route(
            "/api/google/v1/resource/{resource_type}/{resource_id}/{role}/sync",
            post(sync_group),
        )
        .with_state(FakeBroker::default());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn workspace_ref(id: &str) -> BrokerResourceRef {
    BrokerResourceRef {
        resource_type: BrokerResourceType::Workspace,
        resource_id: id.to_string(),
    }
}

#[tokio::test]
async fn test_user_info_and_service_identity() {
    let broker = HttpIdentityBroker::new(&start_broker().await).unwrap();

    let alice = broker
        .user_info(&BearerToken::new("alice-token"))
        .await
        .unwrap()
        .expect("known user");
    assert_eq!(alice.user_email, "alice@example.com");

    // An unknown user is None, not an error.
    assert!(broker
        .user_info(&BearerToken::new("stranger"))
        .await
        .unwrap()
        .is_none());

    let service = ServiceIdentity::initialize(&broker, BearerToken::new("service-token"))
        .await
        .unwrap();
    assert_eq!(service.email(), "wsm@service.iam");
}

#[tokio::test]
async fn test_resource_policy_round_trip() {
    let broker = HttpIdentityBroker::new(&start_broker().await).unwrap();
    let token = BearerToken::new("service-token");
    let target = workspace_ref("ws-1");

    let mut policies = PolicyDocument::new();
    policies.add_member("owner", "alice@example.com");
    policies.declare("reader");
    broker.create_resource(&token, &target, &policies, None).await.unwrap();

    // Conflict on create is success.
    broker.create_resource(&token, &target, &policies, None).await.unwrap();

    broker
        .add_user_to_policy(&token, &target, "reader", "bob@example.com")
        .await
        .unwrap();
    let listed = broker.list_resource_policies(&token, &target).await.unwrap();
    assert!(listed.members("owner").contains("alice@example.com"));
    assert!(listed.members("reader").contains("bob@example.com"));

    broker
        .remove_user_from_policy(&token, &target, "reader", "bob@example.com")
        .await
        .unwrap();
    let listed = broker.list_resource_policies(&token, &target).await.unwrap();
    assert!(listed.has_role("reader"));
    assert!(listed.members("reader").is_empty());

    assert!(broker
        .resource_permission(&BearerToken::new("alice-token"), &target, ACTION_READ)
        .await
        .unwrap());

    let group = broker.sync_policy_to_group(&token, &target, "owner").await.unwrap();
    assert!(group.ends_with("@groups.example"));

    broker.delete_resource(&token, &target).await.unwrap();
    // Not-found on delete is success.
    broker.delete_resource(&token, &target).await.unwrap();
    assert!(matches!(
        broker.list_resource_policies(&token, &target).await,
        Err(OrchestratorError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_status_classification() {
    let broker = HttpIdentityBroker::new(&start_broker().await).unwrap();
    let token = BearerToken::new("service-token");

    let err = broker
        .list_resource_policies(&token, &workspace_ref("flaky"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RetryableRemote);
    assert!(err.is_retryable());

    // Nothing listening: transport failures are retryable too.
    let unreachable = HttpIdentityBroker::new("http://127.0.0.1:9").unwrap();
    let err = unreachable.user_info(&token).await.unwrap_err();
    assert!(err.is_retryable());
}
