//! HTTP flow transport.
//!
//! Talks to the flow-manager and topology REST APIs with a pooled hyper
//! client. Every request is bounded by `request_timeout`; connection
//! failures, timeouts and 5xx responses surface as transient errors.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{header, Method, Request};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{TransportError, TransportResult};
use crate::transport::FlowTransport;
use crate::types::{FlowDelete, FlowEntry, FlowSnapshot, SwitchId};

/// Where the flow manager and topology APIs live.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FlowManagerConfig {
    pub url: String,
    pub topology_url: String,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for FlowManagerConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8181/api/kytos/flow_manager".to_string(),
            topology_url: "http://localhost:8181/api/kytos/topology".to_string(),
            request_timeout: Duration::from_secs(20),
        }
    }
}

#[derive(Deserialize)]
struct SwitchesResponse {
    switches: BTreeMap<SwitchId, Value>,
}

pub struct HttpFlowTransport {
    client: Client<HttpConnector, Full<Bytes>>,
    config: FlowManagerConfig,
}

impl HttpFlowTransport {
    pub fn new(config: FlowManagerConfig) -> Self {
        let client = Client::builder(TokioExecutor::new()).build_http();
        Self { client, config }
    }

    pub fn config(&self) -> &FlowManagerConfig {
        &self.config
    }

    fn flows_uri(&self, switch: &str) -> TransportResult<String> {
        if switch.is_empty() || !switch.chars().all(|c| c.is_ascii_hexdigit() || c == ':') {
            return Err(TransportError::InvalidSwitchId(switch.to_string()));
        }
        Ok(format!("{}/v2/flows/{switch}", self.config.url.trim_end_matches('/')))
    }

    async fn send(&self, method: Method, uri: String, body: Option<Value>) -> TransportResult<Bytes> {
        let payload = match body {
            Some(value) => Bytes::from(
                serde_json::to_vec(&value).map_err(|e| TransportError::Decode(e.to_string()))?,
            ),
            None => Bytes::new(),
        };
        let request = Request::builder()
            .method(method.clone())
            .uri(&uri)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::USER_AGENT, "tablegrid/0.1")
            .body(Full::new(payload))
            .map_err(|e| TransportError::Request(format!("{method} {uri}: {e}")))?;

        let timeout = self.config.request_timeout;
        let client = &self.client;
        let exchange = async move {
            let response = client
                .request(request)
                .await
                .map_err(|e| TransportError::Request(e.to_string()))?;
            let status = response.status();
            let bytes = response
                .into_body()
                .collect()
                .await
                .map_err(|e| TransportError::Request(e.to_string()))?
                .to_bytes();
            Ok::<_, TransportError>((status, bytes))
        };
        let (status, bytes) = tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| {
                TransportError::Request(format!("{method} {uri} timed out after {timeout:?}"))
            })??;

        debug!(%method, %uri, status = status.as_u16(), "flow manager request");
        if status.is_server_error() {
            return Err(TransportError::Server {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }
        if !status.is_success() {
            return Err(TransportError::Client {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }
        Ok(bytes)
    }
}

#[async_trait]
impl FlowTransport for HttpFlowTransport {
    async fn installed_flows(&self) -> TransportResult<FlowSnapshot> {
        let uri = format!(
            "{}/v2/stored_flows?state=installed",
            self.config.url.trim_end_matches('/')
        );
        let bytes = self.send(Method::GET, uri, None).await?;
        serde_json::from_slice(&bytes).map_err(|e| TransportError::Decode(e.to_string()))
    }

    async fn switches(&self) -> TransportResult<Vec<SwitchId>> {
        let uri = format!("{}/v3/switches", self.config.topology_url.trim_end_matches('/'));
        let bytes = self.send(Method::GET, uri, None).await?;
        let parsed: SwitchesResponse =
            serde_json::from_slice(&bytes).map_err(|e| TransportError::Decode(e.to_string()))?;
        Ok(parsed.switches.into_keys().collect())
    }

    async fn install(&self, switch: &str, flows: &[FlowEntry]) -> TransportResult<()> {
        let uri = self.flows_uri(switch)?;
        self.send(Method::POST, uri, Some(json!({"flows": flows, "force": true})))
            .await?;
        Ok(())
    }

    async fn delete(&self, switch: &str, flows: &[FlowDelete]) -> TransportResult<()> {
        let uri = self.flows_uri(switch)?;
        self.send(Method::DELETE, uri, Some(json!({"flows": flows, "force": true})))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::extract::{Path, RawQuery, State};
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use tokio::sync::Mutex;

    type Seen = Arc<Mutex<Vec<(String, String, Value)>>>;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn transport(base: &str) -> HttpFlowTransport {
        HttpFlowTransport::new(FlowManagerConfig {
            url: format!("{base}/flow_manager"),
            topology_url: format!("{base}/topology"),
            request_timeout: Duration::from_secs(2),
        })
    }

    async fn stored_flows(RawQuery(query): RawQuery) -> (StatusCode, Json<Value>) {
        if query.as_deref() != Some("state=installed") {
            return (StatusCode::BAD_REQUEST, Json(json!({})));
        }
        (
            StatusCode::OK,
            Json(json!({
                "00:00:00:00:00:00:00:01": [
                    {"flow": {"owner": "mef_eline", "table_id": 0, "table_group": "evpl", "cookie": 5}}
                ]
            })),
        )
    }

    async fn record_install(
        State(seen): State<Seen>,
        Path(dpid): Path<String>,
        Json(body): Json<Value>,
    ) -> StatusCode {
        seen.lock().await.push(("POST".into(), dpid, body));
        StatusCode::ACCEPTED
    }

    async fn record_delete(
        State(seen): State<Seen>,
        Path(dpid): Path<String>,
        Json(body): Json<Value>,
    ) -> StatusCode {
        seen.lock().await.push(("DELETE".into(), dpid, body));
        StatusCode::ACCEPTED
    }

    #[tokio::test]
    async fn snapshot_is_fetched_and_decoded() {
        let base = serve(Router::new().route("/flow_manager/v2/stored_flows", get(stored_flows))).await;
        let snapshot = transport(&base).installed_flows().await.unwrap();
        let flows = &snapshot["00:00:00:00:00:00:00:01"];
        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].flow.cookie, 5);
    }

    #[tokio::test]
    async fn server_errors_are_transient() {
        let router = Router::new().route(
            "/flow_manager/v2/stored_flows",
            get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "busy") }),
        );
        let base = serve(router).await;
        let err = transport(&base).installed_flows().await.unwrap_err();
        assert!(matches!(err, TransportError::Server { status: 503, .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn undecodable_body_is_not_transient() {
        let router = Router::new().route(
            "/flow_manager/v2/stored_flows",
            get(|| async { "not json" }),
        );
        let base = serve(router).await;
        let err = transport(&base).installed_flows().await.unwrap_err();
        assert!(matches!(err, TransportError::Decode(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn install_and_delete_post_force_batches() {
        let seen: Seen = Arc::default();
        let router = Router::new()
            .route(
                "/flow_manager/v2/flows/{dpid}",
                post(record_install).delete(record_delete),
            )
            .with_state(seen.clone());
        let base = serve(router).await;
        let t = transport(&base);

        let flow = FlowEntry {
            owner: Some("of_multi_table".into()),
            table_id: 1,
            table_group: Some("base".into()),
            cookie: 9,
            priority: Some(0),
            ..Default::default()
        };
        t.install("00:00:00:00:00:00:00:01", &[flow]).await.unwrap();
        let delete = FlowDelete {
            cookie: 9,
            cookie_mask: u64::MAX,
            table_id: 1,
            match_fields: None,
            owner: None,
        };
        t.delete("00:00:00:00:00:00:00:01", &[delete]).await.unwrap();

        let seen = seen.lock().await;
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, "POST");
        assert_eq!(seen[0].1, "00:00:00:00:00:00:00:01");
        assert_eq!(seen[0].2["force"], json!(true));
        assert_eq!(seen[0].2["flows"][0]["table_group"], json!("base"));
        assert_eq!(seen[1].0, "DELETE");
        assert_eq!(seen[1].2["flows"][0]["cookie_mask"], json!(u64::MAX));
    }

    #[tokio::test]
    async fn switches_are_listed_from_topology() {
        let router = Router::new().route(
            "/topology/v3/switches",
            get(|| async {
                Json(json!({"switches": {
                    "00:00:00:00:00:00:00:01": {"enabled": true},
                    "00:00:00:00:00:00:00:02": {"enabled": true}
                }}))
            }),
        );
        let base = serve(router).await;
        let switches = transport(&base).switches().await.unwrap();
        assert_eq!(
            switches,
            vec!["00:00:00:00:00:00:00:01", "00:00:00:00:00:00:00:02"]
        );
    }

    #[tokio::test]
    async fn connection_refused_is_transient() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let err = transport(&format!("http://{addr}"))
            .installed_flows()
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Request(_)));
    }

    #[tokio::test]
    async fn slow_responses_time_out() {
        let router = Router::new().route(
            "/flow_manager/v2/stored_flows",
            get(|| async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Json(json!({}))
            }),
        );
        let base = serve(router).await;
        let mut config = transport(&base).config().clone();
        config.request_timeout = Duration::from_millis(50);
        let err = HttpFlowTransport::new(config)
            .installed_flows()
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Request(_)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn bad_switch_id_never_leaves_the_process() {
        let t = transport("http://127.0.0.1:9");
        let err = t.install("not a dpid", &[]).await.unwrap_err();
        assert!(matches!(err, TransportError::InvalidSwitchId(_)));
    }
}
