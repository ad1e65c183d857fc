use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use enricher_contracts::PostResult;
use enricher_contracts::pointer::LocalPointer;
use enricher_gatewayclient::{GatewayClient, GatewayClientConfig, GatewayClientError};
use enricher_store::{Store, StoreError};
use serde::Serialize;

use crate::config::{IngesterConfig, StartupError};
use crate::notify::Notifier;
use crate::pipeline::normalize::{IntakeDefaults, normalize_body};
use crate::pipeline::{Dispatcher, PipelineError};

const IDEMPOTENCY_HEADERS: [&str; 2] = ["Idempotency-Key", "X-Idempotency-Key"];
const IDEMPOTENCY_QUERY_PARAMS: [&str; 2] = ["idempotency_key", "idempotency-key"];

#[derive(Clone)]
pub struct AppState {
    config: IngesterConfig,
    dispatcher: Dispatcher,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

pub async fn router(config: IngesterConfig) -> Result<Router, StartupError> {
    let gateway = GatewayClient::new(GatewayClientConfig {
        base_url: config.gateway_url.clone(),
        api_key: config.gateway_api_key.clone(),
        timeout: config.gateway_timeout,
    })
    .map_err(|err| StartupError {
        code: "ERR_INVALID_CONFIG",
        message: format!("ENRICHER_GATEWAY_URL: {}", err),
    })?;

    let store = match config.store_url.as_deref() {
        Some(url) => Some(
            Store::connect(url, config.store_ttl, config.store_timeout)
                .await
                .map_err(|err| StartupError {
                    code: "ERR_STORE_UNAVAILABLE",
                    message: err.to_string(),
                })?,
        ),
        None => None,
    };

    let notifier = Notifier::new(config.notify_timeout).map_err(|err| StartupError {
        code: "ERR_NOTIFY_CLIENT",
        message: err.to_string(),
    })?;

    if let Some(store) = store.as_ref() {
        tracing::info!(scheme = store.scheme(), "ingester.result_store_enabled");
    }

    let dispatcher = Dispatcher::new(&config, gateway, store, notifier);
    let state = AppState { config, dispatcher };

    Ok(Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/webhook/mock", post(webhook_mock))
        .route("/webhook/pagerduty", post(webhook_pagerduty))
        .route("/v1/results/{ptr}", get(get_result))
        .route("/v1/artifacts/{ptr}", get(get_artifact))
        .with_state(state))
}

async fn healthz() -> &'static str {
    "ok"
}

async fn metrics() -> impl IntoResponse {
    match crate::metrics::render() {
        Ok((body, content_type)) => {
            let mut headers = HeaderMap::new();
            if let Ok(value) = HeaderValue::from_str(content_type.as_str()) {
                headers.insert(header::CONTENT_TYPE, value);
            }
            (headers, body).into_response()
        }
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

#[derive(Debug, Serialize)]
struct DispatchResponse {
    run_id: String,
    incident_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    result_ptr: Option<String>,
}

async fn webhook_mock(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
    body: Bytes,
) -> Result<Json<DispatchResponse>, ApiError> {
    intake(&state, "mock", "/webhook/mock", &headers, &uri, &body).await
}

async fn webhook_pagerduty(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
    body: Bytes,
) -> Result<Json<DispatchResponse>, ApiError> {
    intake(&state, "pagerduty", "/webhook/pagerduty", &headers, &uri, &body).await
}

async fn intake(
    state: &AppState,
    system: &'static str,
    route: &'static str,
    headers: &HeaderMap,
    uri: &Uri,
    body: &[u8],
) -> Result<Json<DispatchResponse>, ApiError> {
    let request_started = Instant::now();

    let outcome = async {
        let defaults = IntakeDefaults {
            destination_mode: &state.config.default_destination_mode,
            slack_webhook_url: state.config.slack_webhook_url.as_deref(),
        };
        let input = normalize_body(body, system, &defaults)
            .inspect_err(|_| crate::metrics::inc_pipeline_failure("normalize"))?;
        let idempotency_key = idempotency_key_from_request(headers, uri.query());

        // Dropping the dispatch future cancels every in-flight outbound call.
        tokio::time::timeout(
            state.config.request_timeout,
            state.dispatcher.dispatch(input, idempotency_key.as_deref()),
        )
        .await
        .map_err(|_| {
            crate::metrics::inc_pipeline_failure("deadline");
            PipelineError::Deadline
        })?
    }
    .await;

    let handler_result = match outcome {
        Ok(dispatched) => Ok(Json(DispatchResponse {
            run_id: dispatched.run_id,
            incident_id: dispatched.incident_id,
            result_ptr: dispatched.result_ptr,
        })),
        Err(err) => {
            tracing::warn!(route, source = system, error = %err, "ingester.intake_failed");
            Err(pipeline_error(&err))
        }
    };

    observe(route, "POST", request_started, &handler_result);
    handler_result
}

async fn get_result(
    State(state): State<AppState>,
    Path(ptr): Path<String>,
) -> Result<Json<PostResult>, ApiError> {
    let request_started = Instant::now();

    let handler_result = match state.dispatcher.store() {
        None => Err(json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "ERR_STORE_UNAVAILABLE",
            "result store is not configured",
            false,
        )),
        Some(store) => match LocalPointer::parse(&ptr) {
            Ok(local) if local.scheme() != store.scheme() => Err(json_error(
                StatusCode::BAD_REQUEST,
                "ERR_INVALID_PARAMS",
                format!(
                    "pointer scheme {} is not served by the {} store",
                    local.scheme(),
                    store.scheme()
                ),
                false,
            )),
            _ => store
                .get_context_json::<PostResult>(&ptr)
                .await
                .map(Json)
                .map_err(|err| pipeline_error(&PipelineError::Store(err))),
        },
    };

    observe("/v1/results/{ptr}", "GET", request_started, &handler_result);
    handler_result
}

async fn get_artifact(
    State(state): State<AppState>,
    Path(ptr): Path<String>,
) -> Result<Response, ApiError> {
    let request_started = Instant::now();

    let handler_result = match state.dispatcher.gateway().get_artifact(&ptr).await {
        Ok(fetched) => {
            let content_type = fetched
                .metadata
                .get("content_type")
                .and_then(|v| v.as_str())
                .and_then(|v| HeaderValue::from_str(v).ok())
                .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
            let mut headers = HeaderMap::new();
            headers.insert(header::CONTENT_TYPE, content_type);
            Ok((headers, fetched.content).into_response())
        }
        Err(GatewayClientError::Gateway { status, .. }) if status == StatusCode::NOT_FOUND => {
            Err(json_error(
                StatusCode::NOT_FOUND,
                "ERR_NOT_FOUND",
                "artifact not found",
                false,
            ))
        }
        Err(err) => Err(pipeline_error(&PipelineError::Gateway(err))),
    };

    observe("/v1/artifacts/{ptr}", "GET", request_started, &handler_result);
    handler_result
}

/// First non-blank of: `Idempotency-Key` header, `X-Idempotency-Key`
/// header, `idempotency_key` query param, `idempotency-key` query param.
pub fn idempotency_key_from_request(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    let from_headers = IDEMPOTENCY_HEADERS.iter().find_map(|name| {
        headers
            .get(*name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(|v| v.to_string())
    });
    if from_headers.is_some() {
        return from_headers;
    }

    let query = query?;
    IDEMPOTENCY_QUERY_PARAMS.iter().find_map(|name| {
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

fn pipeline_error(err: &PipelineError) -> ApiError {
    match err {
        PipelineError::Validation(message) => json_error(
            StatusCode::BAD_REQUEST,
            "ERR_INVALID_PARAMS",
            message.clone(),
            false,
        ),
        PipelineError::PolicyDenied(message) => json_error(
            StatusCode::FORBIDDEN,
            "ERR_POLICY_DENIED",
            message.clone(),
            false,
        ),
        PipelineError::Gateway(err) => json_error(
            StatusCode::BAD_GATEWAY,
            "ERR_GATEWAY",
            err.to_string(),
            err.is_retryable(),
        ),
        PipelineError::Store(StoreError::NotFound) => json_error(
            StatusCode::NOT_FOUND,
            "ERR_NOT_FOUND",
            "result not found",
            false,
        ),
        PipelineError::Store(err @ (StoreError::Pointer(_) | StoreError::InvalidArgument(_))) => {
            json_error(
                StatusCode::BAD_REQUEST,
                "ERR_INVALID_PARAMS",
                err.to_string(),
                false,
            )
        }
        PipelineError::Store(err) => json_error(
            StatusCode::BAD_GATEWAY,
            "ERR_STORE_UNAVAILABLE",
            err.to_string(),
            true,
        ),
        PipelineError::Summarize(err) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "ERR_SUMMARIZER",
            err.to_string(),
            false,
        ),
        PipelineError::Notify(err) => json_error(
            StatusCode::BAD_GATEWAY,
            "ERR_NOTIFY_FAILED",
            err.to_string(),
            true,
        ),
        PipelineError::Encode(err) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "ERR_INTERNAL",
            err.to_string(),
            false,
        ),
        PipelineError::Deadline => json_error(
            StatusCode::GATEWAY_TIMEOUT,
            "ERR_TIMEOUT",
            "request deadline exceeded",
            true,
        ),
    }
}

fn observe<T>(route: &str, method: &str, started: Instant, result: &Result<T, ApiError>) {
    let status = match result {
        Ok(_) => StatusCode::OK,
        Err((status, _)) => *status,
    };
    crate::metrics::observe_http_request(route, method, status.as_u16(), started.elapsed());
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: String,
    message: String,
    retryable: bool,
}

fn json_error(
    status: StatusCode,
    code: impl Into<String>,
    message: impl Into<String>,
    retryable: bool,
) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            code: code.into(),
            message: message.into(),
            retryable,
        }),
    )
}
