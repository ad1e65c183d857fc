use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use enricher_gatewayclient::{GatewayClient, GatewayClientConfig};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

#[derive(Debug, Clone)]
pub(crate) struct RecordedArtifact {
    pub ptr: String,
    pub content: Vec<u8>,
    pub content_type: String,
    pub retention: String,
    pub labels: BTreeMap<String, String>,
    pub max_bytes_header: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct RecordedRun {
    pub workflow_id: String,
    pub idempotency_key: Option<String>,
    pub payload: serde_json::Value,
    pub run_id: String,
}

#[derive(Debug, Default)]
pub(crate) struct MockGatewayState {
    pub artifacts: Vec<RecordedArtifact>,
    pub runs: Vec<RecordedRun>,
    keyed_runs: HashMap<(String, String), String>,
}

#[derive(Clone, Default)]
pub(crate) struct SharedGateway(Arc<Mutex<MockGatewayState>>);

impl SharedGateway {
    pub fn lock(&self) -> std::sync::LockResult<std::sync::MutexGuard<'_, MockGatewayState>> {
        self.0.lock()
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

async fn put_artifact(
    State(state): State<SharedGateway>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let content = STANDARD
        .decode(body["content_base64"].as_str().unwrap_or("").as_bytes())
        .map_err(|_| (StatusCode::BAD_REQUEST, "invalid base64".to_string()))?;
    let labels = serde_json::from_value::<BTreeMap<String, String>>(body["labels"].clone())
        .unwrap_or_default();

    let mut gw = state.lock().expect("mock lock");
    let ptr = format!("gw-art-{}", gw.artifacts.len() + 1);
    let size = content.len();
    gw.artifacts.push(RecordedArtifact {
        ptr: ptr.clone(),
        content,
        content_type: body["content_type"].as_str().unwrap_or("").to_string(),
        retention: body["retention"].as_str().unwrap_or("").to_string(),
        labels,
        max_bytes_header: header_str(&headers, "X-Max-Artifact-Bytes"),
    });

    Ok(Json(serde_json::json!({ "artifact_ptr": ptr, "size_bytes": size })))
}

async fn get_artifact(
    State(state): State<SharedGateway>,
    Path(ptr): Path<String>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let gw = state.lock().expect("mock lock");
    let artifact = gw
        .artifacts
        .iter()
        .find(|a| a.ptr == ptr)
        .ok_or((StatusCode::NOT_FOUND, "artifact not found".to_string()))?;

    Ok(Json(serde_json::json!({
        "artifact_ptr": artifact.ptr,
        "content_base64": STANDARD.encode(&artifact.content),
        "metadata": { "content_type": artifact.content_type },
    })))
}

async fn start_run(
    State(state): State<SharedGateway>,
    Path(workflow_id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<serde_json::Value>,
) -> Json<serde_json::Value> {
    let idempotency_key = header_str(&headers, "Idempotency-Key");
    let mut gw = state.lock().expect("mock lock");

    if let Some(key) = idempotency_key.as_ref()
        && let Some(run_id) = gw.keyed_runs.get(&(workflow_id.clone(), key.clone()))
    {
        return Json(serde_json::json!({ "run_id": run_id }));
    }

    let run_id = format!("run-{}", gw.runs.len() + 1);
    if let Some(key) = idempotency_key.clone() {
        gw.keyed_runs
            .insert((workflow_id.clone(), key), run_id.clone());
    }
    gw.runs.push(RecordedRun {
        workflow_id,
        idempotency_key,
        payload,
        run_id: run_id.clone(),
    });

    Json(serde_json::json!({ "run_id": run_id }))
}

pub(crate) async fn spawn_server(
    app: Router,
) -> (SocketAddr, oneshot::Sender<()>, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind should succeed");
    let addr = listener.local_addr().expect("local_addr should succeed");

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await;
    });

    (addr, shutdown_tx, handle)
}

/// Gateway double that honours `Idempotency-Key` per workflow.
pub(crate) async fn spawn_mock_gateway(
    state: SharedGateway,
) -> (SocketAddr, oneshot::Sender<()>, tokio::task::JoinHandle<()>) {
    let app = Router::new()
        .route("/api/v1/artifacts", post(put_artifact))
        .route("/api/v1/artifacts/{ptr}", get(get_artifact))
        .route("/api/v1/workflows/{workflow_id}/runs", post(start_run))
        .with_state(state);
    spawn_server(app).await
}

pub(crate) fn gateway_client(base_url: &str) -> GatewayClient {
    GatewayClient::new(GatewayClientConfig {
        base_url: base_url.to_string(),
        api_key: None,
        timeout: Duration::from_secs(2),
    })
    .expect("gateway client should build")
}
