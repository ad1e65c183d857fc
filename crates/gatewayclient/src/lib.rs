use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

pub const API_KEY_HEADER: &str = "X-API-Key";
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";
pub const MAX_ARTIFACT_BYTES_HEADER: &str = "X-Max-Artifact-Bytes";

#[derive(Debug)]
pub enum GatewayClientError {
    InvalidBaseUrl(String),
    Timeout,
    Http(reqwest::Error),
    Encode(serde_json::Error),
    Gateway {
        status: StatusCode,
        method: Method,
        path: String,
        message: String,
    },
    ResponseSchema(String),
    Decode(String),
}

impl GatewayClientError {
    /// Whether a caller-level retry could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayClientError::Timeout | GatewayClientError::Http(_) => true,
            GatewayClientError::Gateway { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            _ => false,
        }
    }
}

impl std::fmt::Display for GatewayClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayClientError::InvalidBaseUrl(message) => {
                write!(f, "invalid gateway base url: {}", message)
            }
            GatewayClientError::Timeout => write!(f, "gateway request timed out"),
            GatewayClientError::Http(err) => write!(f, "gateway request failed: {}", err),
            GatewayClientError::Encode(err) => write!(f, "marshal request: {}", err),
            GatewayClientError::Gateway {
                method,
                path,
                message,
                ..
            } => write!(f, "gateway {} {}: {}", method, path, message),
            GatewayClientError::ResponseSchema(message) => {
                write!(f, "gateway response schema mismatch: {}", message)
            }
            GatewayClientError::Decode(message) => write!(f, "decode artifact: {}", message),
        }
    }
}

impl std::error::Error for GatewayClientError {}

impl From<reqwest::Error> for GatewayClientError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            GatewayClientError::Timeout
        } else {
            GatewayClientError::Http(value)
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayClientConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

pub struct PutArtifactRequest<'a> {
    pub content: &'a [u8],
    pub content_type: &'a str,
    pub retention: &'a str,
    pub labels: &'a BTreeMap<String, String>,
    /// Ceiling advertised to the gateway; 0 means unbounded. Enforcement is remote.
    pub max_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub artifact_ptr: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchedArtifact {
    pub artifact_ptr: String,
    pub content: Vec<u8>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Serialize)]
struct PutArtifactBody<'a> {
    content_base64: String,
    content_type: &'a str,
    retention: &'a str,
    labels: &'a BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct PutArtifactResponse {
    #[serde(default)]
    artifact_ptr: String,
    #[serde(default)]
    size_bytes: u64,
}

#[derive(Deserialize)]
struct GetArtifactResponse {
    #[serde(default)]
    artifact_ptr: String,
    #[serde(default)]
    content_base64: String,
    #[serde(default)]
    metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Deserialize)]
struct StartRunResponse {
    #[serde(default)]
    run_id: String,
}

/// Typed client for the remote artifact store and workflow scheduler.
/// Cheap to clone; clones share one connection pool.
#[derive(Clone)]
pub struct GatewayClient {
    base_url: Url,
    api_key: Option<String>,
    http: reqwest::Client,
}

impl GatewayClient {
    pub fn new(config: GatewayClientConfig) -> Result<Self, GatewayClientError> {
        let base_url = Url::parse(config.base_url.trim())
            .map_err(|err| GatewayClientError::InvalidBaseUrl(err.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(GatewayClientError::InvalidBaseUrl(
                "url cannot be used as a base".to_string(),
            ));
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(GatewayClientError::Http)?;

        Ok(Self {
            base_url,
            api_key: config
                .api_key
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty()),
            http,
        })
    }

    pub async fn put_artifact(
        &self,
        req: PutArtifactRequest<'_>,
    ) -> Result<StoredArtifact, GatewayClientError> {
        let body = PutArtifactBody {
            content_base64: STANDARD.encode(req.content),
            content_type: req.content_type.trim(),
            retention: req.retention.trim(),
            labels: req.labels,
        };

        let mut headers = Vec::new();
        if req.max_bytes > 0 {
            headers.push((MAX_ARTIFACT_BYTES_HEADER, req.max_bytes.to_string()));
        }

        let resp: PutArtifactResponse = self
            .send_json(Method::POST, &["api", "v1", "artifacts"], Some(&body), &headers)
            .await?;

        if resp.artifact_ptr.is_empty() {
            return Err(GatewayClientError::ResponseSchema(
                "artifact ptr missing from response".to_string(),
            ));
        }

        Ok(StoredArtifact {
            artifact_ptr: resp.artifact_ptr,
            size_bytes: resp.size_bytes,
        })
    }

    /// `ptr` is passed back verbatim as a single escaped path segment.
    pub async fn get_artifact(&self, ptr: &str) -> Result<FetchedArtifact, GatewayClientError> {
        let resp: GetArtifactResponse = self
            .send_json(Method::GET, &["api", "v1", "artifacts", ptr], None::<&()>, &[])
            .await?;

        let content = STANDARD
            .decode(resp.content_base64.as_bytes())
            .map_err(|err| GatewayClientError::Decode(err.to_string()))?;

        Ok(FetchedArtifact {
            artifact_ptr: resp.artifact_ptr,
            content,
            metadata: resp.metadata.unwrap_or_default(),
        })
    }

    /// The gateway is the idempotency authority: replays with the same key
    /// must resolve to the same run.
    pub async fn start_run<P: Serialize + ?Sized>(
        &self,
        workflow_id: &str,
        payload: &P,
        idempotency_key: Option<&str>,
    ) -> Result<String, GatewayClientError> {
        let mut headers = Vec::new();
        if let Some(key) = idempotency_key.map(|k| k.trim()).filter(|k| !k.is_empty()) {
            headers.push((IDEMPOTENCY_KEY_HEADER, key.to_string()));
        }

        let resp: StartRunResponse = self
            .send_json(
                Method::POST,
                &["api", "v1", "workflows", workflow_id, "runs"],
                Some(payload),
                &headers,
            )
            .await?;

        if resp.run_id.is_empty() {
            return Err(GatewayClientError::ResponseSchema(
                "run_id missing from response".to_string(),
            ));
        }
        Ok(resp.run_id)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, GatewayClientError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                GatewayClientError::InvalidBaseUrl("url cannot be used as a base".to_string())
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send_json<B, T>(
        &self,
        method: Method,
        segments: &[&str],
        body: Option<&B>,
        headers: &[(&'static str, String)],
    ) -> Result<T, GatewayClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.endpoint(segments)?;
        let path = url.path().to_string();
        let started = Instant::now();

        let mut builder = self.http.request(method.clone(), url);
        if let Some(body) = body {
            let data = serde_json::to_vec(body).map_err(GatewayClientError::Encode)?;
            builder = builder.header(CONTENT_TYPE, "application/json").body(data);
        }
        if let Some(api_key) = self.api_key.as_deref() {
            builder = builder.header(API_KEY_HEADER, api_key);
        }
        for (name, value) in headers {
            builder = builder.header(*name, value.as_str());
        }

        let resp = builder.send().await?;
        let status = resp.status();
        let bytes = resp.bytes().await?;

        tracing::debug!(
            method = %method,
            path = %path,
            status = status.as_u16(),
            latency_ms = started.elapsed().as_millis() as u64,
            "gateway.request"
        );

        if !status.is_success() {
            let text = String::from_utf8_lossy(&bytes).trim().to_string();
            let message = if text.is_empty() {
                status.to_string()
            } else {
                text
            };
            return Err(GatewayClientError::Gateway {
                status,
                method,
                path,
                message,
            });
        }

        serde_json::from_slice::<T>(&bytes)
            .map_err(|err| GatewayClientError::ResponseSchema(err.to_string()))
    }
}
