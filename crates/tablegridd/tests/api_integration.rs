//! End-to-end API tests.
//!
//! Drives the assembled router with `oneshot` requests while the reconcile
//! worker runs against an in-memory flow transport.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use serde_json::{json, Value};
use tokio::sync::watch;
use tower::ServiceExt;

use tablegrid_api::ApiState;
use tablegrid_flows::{FlowEntry, FlowSnapshot, InstalledFlow, MemoryTransport};
use tablegrid_state::PipelineStore;
use tablegridd::{assemble, DaemonConfig};

const SW: &str = "00:00:00:00:00:00:00:01";

struct TestDaemon {
    router: Router,
    state: ApiState,
    transport: MemoryTransport,
    _shutdown: watch::Sender<bool>,
}

fn owner_flow(owner: &str, group: &str, table_id: u8, cookie: u64) -> FlowEntry {
    FlowEntry {
        owner: Some(owner.into()),
        table_id,
        table_group: Some(group.into()),
        cookie,
        priority: Some(100),
        match_fields: Some(json!({"in_port": 1})),
        ..Default::default()
    }
}

fn start(config: DaemonConfig, flows: Vec<FlowEntry>) -> TestDaemon {
    let snapshot: FlowSnapshot = [(
        SW.to_string(),
        flows.into_iter().map(InstalledFlow::from).collect(),
    )]
    .into_iter()
    .collect();
    let transport = MemoryTransport::with_snapshot(snapshot);
    let store = PipelineStore::open_in_memory().unwrap();
    let daemon = assemble(&config, store, Arc::new(transport.clone()));
    let router = daemon.router();
    let (shutdown, shutdown_rx) = watch::channel(false);
    let (state, _worker) = daemon.spawn_worker(shutdown_rx);
    TestDaemon {
        router,
        state,
        transport,
        _shutdown: shutdown,
    }
}

fn quick_config() -> DaemonConfig {
    let mut config = DaemonConfig::default();
    config.retry.max_attempts = 1;
    config
}

async fn call(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let body = match body {
        Some(value) => Body::from(serde_json::to_vec(&value).unwrap()),
        None => Body::empty(),
    };
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body)
        .unwrap();
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn create_pipeline(router: &Router, doc: Value) -> String {
    let (status, body) = call(router, Method::POST, "/api/v1/pipeline", Some(doc)).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["data"]["id"].as_str().unwrap().to_string()
}

async fn wait_for_status(router: &Router, id: &str, expected: &str) {
    let uri = format!("/api/v1/pipeline/{id}");
    for _ in 0..200 {
        let (_, body) = call(router, Method::GET, &uri, None).await;
        if body["data"]["status"] == json!(expected) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("pipeline {id} never reached {expected}");
}

fn relocation_doc() -> Value {
    json!({"multi_table": [
        {"table_id": 0, "napps_table_groups": {"coloring": ["base"]},
         "table_miss_flow": {"priority": 0, "instructions": [{"instruction_type": "goto_table", "table_id": 2}]}},
        {"table_id": 2, "napps_table_groups": {"mef_eline": ["evpl", "epl"]}}
    ]})
}

#[tokio::test]
async fn pipeline_crud_roundtrip() {
    let d = start(quick_config(), Vec::new());

    let id = create_pipeline(&d.router, relocation_doc()).await;
    let (status, body) = call(&d.router, Method::GET, &format!("/api/v1/pipeline/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], json!("disabled"));
    assert_eq!(body["data"]["multi_table"][1]["table_id"], json!(2));

    let (status, body) = call(&d.router, Method::GET, "/api/v1/pipeline?status=disabled", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["pipelines"].as_array().unwrap().len(), 1);

    let (status, _) = call(&d.router, Method::DELETE, &format!("/api/v1/pipeline/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = call(&d.router, Method::GET, &format!("/api/v1/pipeline/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], json!(false));
}

#[tokio::test]
async fn invalid_documents_list_every_issue() {
    let d = start(quick_config(), Vec::new());
    let doc = json!({"multi_table": [
        {"table_id": 1, "napps_table_groups": {"coloring": ["base"]}},
        {"table_id": 1, "napps_table_groups": {"coloring": ["base"]}}
    ]});
    let (status, body) = call(&d.router, Method::POST, "/api/v1/pipeline", Some(doc)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let paths: Vec<&str> = body["issues"]
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["path"].as_str().unwrap())
        .collect();
    assert!(paths.len() >= 2, "{paths:?}");

    let (_, body) = call(&d.router, Method::GET, "/api/v1/pipeline", None).await;
    assert!(body["data"]["pipelines"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn enable_waits_for_owner_then_relocates_flows() {
    let d = start(
        quick_config(),
        vec![
            owner_flow("mef_eline", "evpl", 0, 0x11),
            owner_flow("sdntrace", "base", 0, 0x22),
        ],
    );
    call(&d.router, Method::PUT, "/api/v1/owners/mef_eline", None).await;
    let id = create_pipeline(&d.router, relocation_doc()).await;

    let (status, body) =
        call(&d.router, Method::POST, &format!("/api/v1/pipeline/{id}/enable"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], json!("enabling"));
    assert_eq!(body["data"]["announcement"]["awaiting"], json!(["mef_eline"]));

    let (_, body) = call(&d.router, Method::GET, "/api/v1/layout", None).await;
    assert_eq!(body["data"]["layout"]["mef_eline"]["evpl"], json!(2));

    // Nothing moves until the owner acknowledges.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(d.transport.dispatched().await.is_empty());

    let (_, body) = call(&d.router, Method::POST, "/api/v1/owners/mef_eline/ack", None).await;
    assert_eq!(body["data"]["outcome"], json!("triggered"));
    wait_for_status(&d.router, &id, "enabled").await;

    let flows = d.transport.flows_on(SW).await;
    assert!(flows
        .iter()
        .any(|f| f.owner.as_deref() == Some("mef_eline") && f.table_id == 2));
    assert!(flows
        .iter()
        .any(|f| f.owner.as_deref() == Some("sdntrace") && f.table_id == 0));
    assert!(flows
        .iter()
        .any(|f| f.owner.as_deref() == Some("of_multi_table") && f.table_id == 0));
}

#[tokio::test]
async fn disable_returns_to_default_layout() {
    let d = start(quick_config(), vec![owner_flow("mef_eline", "evpl", 0, 0x11)]);
    let id = create_pipeline(&d.router, relocation_doc()).await;

    call(&d.router, Method::POST, &format!("/api/v1/pipeline/{id}/enable"), None).await;
    wait_for_status(&d.router, &id, "enabled").await;

    let (status, body) =
        call(&d.router, Method::POST, &format!("/api/v1/pipeline/{id}/disable"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["previous_status"], json!("enabled"));
    wait_for_status(&d.router, &id, "disabled").await;

    let flows = d.transport.flows_on(SW).await;
    assert_eq!(flows.len(), 1, "{flows:?}");
    assert_eq!(flows[0].table_id, 0);

    // Disabling again is a no-op.
    let (status, body) =
        call(&d.router, Method::POST, &format!("/api/v1/pipeline/{id}/disable"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], json!("disabled"));
}

#[tokio::test]
async fn empty_default_layout_disable_dispatches_nothing() {
    let mut config = quick_config();
    config.default_pipeline = Some(Vec::new());
    let d = start(config, Vec::new());
    let id = create_pipeline(
        &d.router,
        json!({"multi_table": [{"table_id": 0, "napps_table_groups": {"coloring": ["base"]}}]}),
    )
    .await;

    call(&d.router, Method::POST, &format!("/api/v1/pipeline/{id}/enable"), None).await;
    wait_for_status(&d.router, &id, "enabled").await;
    call(&d.router, Method::POST, &format!("/api/v1/pipeline/{id}/disable"), None).await;
    wait_for_status(&d.router, &id, "disabled").await;

    assert!(d.transport.dispatched().await.is_empty());
}

#[tokio::test]
async fn second_enable_conflicts_while_first_is_pending() {
    let d = start(quick_config(), Vec::new());
    call(&d.router, Method::PUT, "/api/v1/owners/coloring", None).await;
    let first = create_pipeline(&d.router, relocation_doc()).await;
    let second = create_pipeline(&d.router, relocation_doc()).await;

    let (status, _) =
        call(&d.router, Method::POST, &format!("/api/v1/pipeline/{first}/enable"), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) =
        call(&d.router, Method::POST, &format!("/api/v1/pipeline/{second}/enable"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], json!(false));

    let (status, _) =
        call(&d.router, Method::DELETE, &format!("/api/v1/pipeline/{first}"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn enable_conflicts_while_another_is_enabled() {
    let d = start(quick_config(), Vec::new());
    let first = create_pipeline(&d.router, relocation_doc()).await;
    let second = create_pipeline(&d.router, relocation_doc()).await;

    call(&d.router, Method::POST, &format!("/api/v1/pipeline/{first}/enable"), None).await;
    wait_for_status(&d.router, &first, "enabled").await;

    let (status, body) =
        call(&d.router, Method::POST, &format!("/api/v1/pipeline/{second}/enable"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], json!(false));
    wait_for_status(&d.router, &first, "enabled").await;
    wait_for_status(&d.router, &second, "disabled").await;

    call(&d.router, Method::POST, &format!("/api/v1/pipeline/{first}/disable"), None).await;
    wait_for_status(&d.router, &first, "disabled").await;
    let (status, _) =
        call(&d.router, Method::POST, &format!("/api/v1/pipeline/{second}/enable"), None).await;
    assert_eq!(status, StatusCode::OK);
    wait_for_status(&d.router, &second, "enabled").await;
}

#[tokio::test]
async fn flow_error_for_owned_cookie_marks_enabling_error() {
    let d = start(quick_config(), Vec::new());
    let id = create_pipeline(&d.router, relocation_doc()).await;
    call(&d.router, Method::POST, &format!("/api/v1/pipeline/{id}/enable"), None).await;
    wait_for_status(&d.router, &id, "enabled").await;

    let cookie = d
        .state
        .engine
        .miss_flows()
        .codec()
        .cookie_for(SW)
        .unwrap();
    let foreign = json!({"flow": {"cookie": 0x22, "table_id": 0}});
    let (_, body) = call(&d.router, Method::POST, "/api/v1/flow_errors", Some(foreign)).await;
    assert_eq!(body["data"]["outcome"], json!("not_owned"));

    let owned = json!({"flow": {"cookie": cookie, "table_id": 0, "owner": "of_multi_table"}});
    let (status, body) = call(&d.router, Method::POST, "/api/v1/flow_errors", Some(owned)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["outcome"], json!("marked_error"));
    wait_for_status(&d.router, &id, "enabling_error").await;
}

#[tokio::test]
async fn pipelines_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = quick_config();
    config.data_dir = dir.path().to_path_buf();

    let id = {
        let store = PipelineStore::open(&config.db_path()).unwrap();
        let daemon = assemble(&config, store, Arc::new(MemoryTransport::new()));
        create_pipeline(&daemon.router(), relocation_doc()).await
    };

    let store = PipelineStore::open(&config.db_path()).unwrap();
    let daemon = assemble(&config, store, Arc::new(MemoryTransport::new()));
    let (status, body) = call(
        &daemon.router(),
        Method::GET,
        &format!("/api/v1/pipeline/{id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], json!(id));
}
