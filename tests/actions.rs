//! Action boundary and HTTP router tests

use conclave::actions::{ActionHandler, ActionRequest};
use conclave::config::AppConfig;
use conclave::dispatch::testing::ScriptedExecutor;
use conclave::dispatch::Orchestrator;
use serde_json::{json, Value};
use std::sync::Arc;

fn handler() -> ActionHandler {
    let orchestrator =
        Orchestrator::new(AppConfig::default(), Arc::new(ScriptedExecutor::new())).unwrap();
    ActionHandler::new(Arc::new(orchestrator))
}

async fn call(handler: &ActionHandler, action: &str, data: Value) -> Value {
    let response = handler.handle(ActionRequest::new(action, data)).await;
    serde_json::to_value(response).unwrap()
}

async fn register(handler: &ActionHandler, id: &str, capabilities: &[&str], priority: i32) {
    let body = call(
        handler,
        "register-agent",
        json!({ "id": id, "capabilities": capabilities, "priority": priority }),
    )
    .await;
    assert_eq!(body["success"], true, "register failed: {}", body);
}

#[tokio::test]
async fn test_register_and_execute_task() {
    let handler = handler();
    register(&handler, "analyst", &["analysis"], 7).await;
    register(&handler, "writer", &["generation"], 5).await;

    let body = call(
        &handler,
        "execute-task",
        json!({ "task": { "type": "analysis", "requiredCapabilities": ["analysis"] } }),
    )
    .await;

    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["workerId"], "analyst");

    let agent = call(&handler, "get-agent", json!({ "id": "analyst" })).await;
    assert_eq!(agent["data"]["performance"]["totalTasks"], 1);
}

#[tokio::test]
async fn test_no_eligible_worker_reports_code() {
    let handler = handler();
    register(&handler, "writer", &["generation"], 5).await;

    let body = call(
        &handler,
        "execute-task",
        json!({ "task": { "type": "analysis", "requiredCapabilities": ["analysis"] } }),
    )
    .await;

    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "no_eligible_worker");
}

#[tokio::test]
async fn test_unknown_action_and_bad_payload() {
    let handler = handler();

    let body = call(&handler, "summon-demon", Value::Null).await;
    assert_eq!(body["code"], "unknown_action");

    let body = call(&handler, "execute-sequential", json!({ "tasks": 3 })).await;
    assert_eq!(body["code"], "invalid_payload");
}

#[tokio::test]
async fn test_hierarchical_unknown_master() {
    let handler = handler();
    register(&handler, "w", &[], 5).await;

    let body = call(
        &handler,
        "execute-hierarchical",
        json!({ "masterId": "boss", "tasks": [{ "type": "t" }] }),
    )
    .await;
    assert_eq!(body["code"], "unknown_master");
}

#[tokio::test]
async fn test_group_lifecycle() {
    let handler = handler();
    for id in ["a", "b", "c"] {
        register(&handler, id, &[], 5).await;
    }

    let created = call(
        &handler,
        "create-agent-group",
        json!({ "groupId": "team", "members": ["a", "b", "c", "ghost"] }),
    )
    .await;
    assert_eq!(created["success"], true);
    assert_eq!(created["data"]["members"].as_array().unwrap().len(), 3);

    let report = call(
        &handler,
        "execute-collaborative",
        json!({ "groupId": "team", "task": { "id": "doc", "type": "analysis" } }),
    )
    .await;
    assert_eq!(report["success"], true, "collaboration failed: {}", report);
    assert_eq!(report["data"]["groupId"], "team");

    let consensus = call(
        &handler,
        "execute-consensus",
        json!({ "groupId": "team", "task": { "id": "vote", "type": "review" } }),
    )
    .await;
    assert_eq!(consensus["success"], true);

    let groups = call(&handler, "list-groups", Value::Null).await;
    assert_eq!(groups["data"].as_array().unwrap().len(), 1);

    let disbanded = call(&handler, "disband-group", json!({ "groupId": "team" })).await;
    assert_eq!(disbanded["success"], true);

    let missing = call(&handler, "disband-group", json!({ "groupId": "team" })).await;
    assert_eq!(missing["code"], "not_found");
}

#[tokio::test]
async fn test_stats_and_pools() {
    let handler = handler();
    register(&handler, "w", &[], 5).await;

    let tasks = json!({ "tasks": [{ "type": "a" }, { "type": "b" }] });
    let body = call(&handler, "execute-parallel", tasks).await;
    assert_eq!(body["data"]["results"].as_array().unwrap().len(), 2);

    let stats = call(&handler, "get-stats", Value::Null).await;
    assert_eq!(stats["data"]["system"]["totalTasksProcessed"], 2);
    assert_eq!(stats["data"]["pools"], json!(["primary"]));

    let pools = call(&handler, "get-pool-stats", json!({ "pool": "primary" })).await;
    assert_eq!(pools["data"]["kind"], "native");

    let run = call(
        &handler,
        "run-pool-task",
        json!({ "pool": "primary", "workerId": "w", "task": { "type": "x" } }),
    )
    .await;
    assert_eq!(run["data"]["success"], true);
}

#[tokio::test]
async fn test_reset_history_on_reregister() {
    let handler = handler();
    register(&handler, "w", &[], 5).await;
    call(&handler, "execute-task", json!({ "task": { "type": "t" } })).await;

    register(&handler, "w", &[], 6).await;
    let agent = call(&handler, "get-agent", json!({ "id": "w" })).await;
    assert_eq!(agent["data"]["performance"]["totalTasks"], 1);
    assert_eq!(agent["data"]["worker"]["priority"], 6);

    let body = call(
        &handler,
        "register-agent",
        json!({ "id": "w", "priority": 6, "resetHistory": true }),
    )
    .await;
    assert_eq!(body["success"], true);

    let agent = call(&handler, "get-agent", json!({ "id": "w" })).await;
    assert_eq!(agent["data"]["performance"]["totalTasks"], 0);
    assert_eq!(agent["data"]["successRate"], 0.0);
}

#[tokio::test]
async fn test_zero_capacity_registration_rejected() {
    let handler = handler();
    let body = call(
        &handler,
        "register-agent",
        json!({ "id": "z", "maxConcurrency": 0 }),
    )
    .await;
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "invalid_request");

    let agents = call(&handler, "list-agents", Value::Null).await;
    assert!(agents["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_priority_distributed_and_intelligent_actions() {
    let handler = handler();
    register(&handler, "a", &[], 5).await;
    register(&handler, "b", &[], 5).await;

    let body = call(
        &handler,
        "execute-priority",
        json!({ "tasks": [
            { "id": "low", "type": "t", "priority": 1 },
            { "id": "high", "type": "t", "priority": 9 },
            { "id": "urgent", "type": "t", "critical": true },
        ] }),
    )
    .await;
    assert_eq!(body["data"]["strategy"], "priority");
    let order: Vec<&str> = body["data"]["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["taskId"].as_str().unwrap())
        .collect();
    assert_eq!(order, vec!["urgent", "high", "low"]);

    let body = call(
        &handler,
        "execute-distributed",
        json!({ "tasks": [{ "type": "x" }, { "type": "y" }, { "type": "z" }] }),
    )
    .await;
    assert_eq!(body["data"]["strategy"], "distributed");
    let workers: Vec<&str> = body["data"]["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["workerId"].as_str().unwrap())
        .collect();
    assert_eq!(workers, vec!["a", "b", "a"]);

    let body = call(
        &handler,
        "execute-intelligent",
        json!({ "workflow": {
            "tasks": [
                { "type": "t", "data": { "durationMs": 10 } },
                { "type": "t", "data": { "durationMs": 20 } },
            ],
            "constraints": { "limitedResources": true },
        } }),
    )
    .await;
    assert_eq!(body["success"], true, "intelligent failed: {}", body);
    assert_eq!(body["data"]["requested"], "intelligent");
    assert_eq!(body["data"]["strategy"], "sequential");
    assert_eq!(body["data"]["totalDurationMs"], 30);

    let body = call(&handler, "execute-intelligent", json!({ "workflow": { "tasks": 3 } })).await;
    assert_eq!(body["code"], "invalid_payload");
}

#[tokio::test]
async fn test_history_returns_latest_results() {
    let handler = handler();
    register(&handler, "w", &[], 5).await;
    for id in ["first", "second", "third"] {
        call(&handler, "execute-task", json!({ "task": { "id": id, "type": "t" } })).await;
    }

    let all = call(&handler, "get-history", Value::Null).await;
    assert_eq!(all["data"].as_array().unwrap().len(), 3);

    let latest = call(&handler, "get-history", json!({ "limit": 2 })).await;
    let ids: Vec<&str> = latest["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["taskId"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["second", "third"]);
}

#[tokio::test]
async fn test_inbox_read_and_drain() {
    let handler = handler();
    for id in ["a", "b"] {
        register(&handler, id, &[], 5).await;
    }
    call(
        &handler,
        "create-agent-group",
        json!({ "groupId": "pair", "members": ["a", "b"] }),
    )
    .await;
    let report = call(
        &handler,
        "execute-collaborative",
        json!({ "groupId": "pair", "task": { "id": "doc", "type": "analysis" } }),
    )
    .await;
    assert_eq!(report["success"], true, "collaboration failed: {}", report);

    let inbox_len = |body: &Value| body["data"].as_array().unwrap().len();
    let mut waiting = 0;
    for id in ["a", "b"] {
        let peek = call(&handler, "get-inbox", json!({ "groupId": "pair", "workerId": id })).await;
        let drained = call(
            &handler,
            "get-inbox",
            json!({ "groupId": "pair", "workerId": id, "drain": true }),
        )
        .await;
        assert_eq!(inbox_len(&peek), inbox_len(&drained));
        waiting += inbox_len(&drained);

        let after = call(&handler, "get-inbox", json!({ "groupId": "pair", "workerId": id })).await;
        assert_eq!(inbox_len(&after), 0);
    }
    assert!(waiting > 0);

    let missing = call(
        &handler,
        "get-inbox",
        json!({ "groupId": "pair", "workerId": "ghost" }),
    )
    .await;
    assert_eq!(missing["code"], "not_found");
}

#[cfg(feature = "api")]
mod http {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use conclave::api::ApiServer;
    use conclave::config::ApiConfig;
    use tower::ServiceExt;

    fn server(handler: &ActionHandler) -> ApiServer {
        ApiServer::new(ApiConfig::default(), Arc::clone(handler.orchestrator()))
    }

    async fn post(server: &ApiServer, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri("/api")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = server.router().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_post_action() {
        let handler = handler();
        register(&handler, "w", &[], 5).await;
        let server = server(&handler);

        let (status, body) = post(
            &server,
            json!({ "action": "execute-task", "data": { "task": { "type": "t" } } }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["workerId"], "w");
    }

    #[tokio::test]
    async fn test_failure_is_500() {
        let handler = handler();
        let server = server(&handler);

        let (status, body) = post(
            &server,
            json!({ "action": "execute-task", "data": { "task": { "type": "t" } } }),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("No eligible worker"));
    }

    #[tokio::test]
    async fn test_health() {
        let handler = handler();
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = server(&handler).router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
