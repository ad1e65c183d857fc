use std::time::Instant;

use enricher_contracts::{EvidenceBundle, IncidentInput, PostResult, Summary};
use enricher_gatewayclient::{GatewayClient, GatewayClientError};
use enricher_policy::PolicyConstraints;
use enricher_store::{Store, StoreError};
use serde_json::{Map, Value};
use tracing::Instrument;

use crate::config::IngesterConfig;
use crate::notify::{Notifier, NotifyError};
use crate::summarizer::{self, SummarizeError, SummaryProvider};

pub mod delivery;
pub mod evidence;
pub mod normalize;

#[derive(Debug)]
pub enum PipelineError {
    Validation(String),
    PolicyDenied(String),
    Gateway(GatewayClientError),
    Store(StoreError),
    Summarize(SummarizeError),
    Notify(NotifyError),
    Encode(serde_json::Error),
    Deadline,
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::Validation(message) => write!(f, "{}", message),
            PipelineError::PolicyDenied(message) => write!(f, "policy denied: {}", message),
            PipelineError::Gateway(err) => write!(f, "{}", err),
            PipelineError::Store(err) => write!(f, "{}", err),
            PipelineError::Summarize(err) => write!(f, "{}", err),
            PipelineError::Notify(err) => write!(f, "{}", err),
            PipelineError::Encode(err) => write!(f, "failed to encode payload: {}", err),
            PipelineError::Deadline => write!(f, "request deadline exceeded"),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<GatewayClientError> for PipelineError {
    fn from(value: GatewayClientError) -> Self {
        PipelineError::Gateway(value)
    }
}

impl From<StoreError> for PipelineError {
    fn from(value: StoreError) -> Self {
        PipelineError::Store(value)
    }
}

impl From<SummarizeError> for PipelineError {
    fn from(value: SummarizeError) -> Self {
        PipelineError::Summarize(value)
    }
}

impl From<NotifyError> for PipelineError {
    fn from(value: NotifyError) -> Self {
        PipelineError::Notify(value)
    }
}

/// Terminal outcome of one incident dispatch.
#[derive(Debug, Clone)]
pub struct Dispatched {
    pub run_id: String,
    pub incident_id: String,
    pub result_ptr: Option<String>,
    pub post: PostResult,
}

/// Runs normalized incidents through evidence, summary, delivery and
/// workflow dispatch. Cheap to clone; all handles are shared.
#[derive(Clone)]
pub struct Dispatcher {
    gateway: GatewayClient,
    store: Option<Store>,
    notifier: Notifier,
    policy: Option<PolicyConstraints>,
    provider: SummaryProvider,
    workflow_id: String,
    retention: String,
}

impl Dispatcher {
    pub fn new(
        config: &IngesterConfig,
        gateway: GatewayClient,
        store: Option<Store>,
        notifier: Notifier,
    ) -> Self {
        Self {
            gateway,
            store,
            notifier,
            policy: config.policy.clone(),
            provider: config.summary_provider,
            workflow_id: config.workflow_id.clone(),
            retention: config.artifact_retention.clone(),
        }
    }

    pub fn gateway(&self) -> &GatewayClient {
        &self.gateway
    }

    pub fn store(&self) -> Option<&Store> {
        self.store.as_ref()
    }

    pub async fn dispatch(
        &self,
        input: IncidentInput,
        idempotency_key: Option<&str>,
    ) -> Result<Dispatched, PipelineError> {
        let span = tracing::info_span!(
            "pipeline.run",
            incident_id = %input.incident_id,
            source = %input.source.system,
            mode = %input.destination.mode,
            run_id = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );
        let started = Instant::now();

        async move {
            let result = self.run_stages(&input, idempotency_key).await;
            if let Ok(dispatched) = &result {
                tracing::Span::current().record("run_id", dispatched.run_id.as_str());
            }
            record_outcome(started, &result);
            result
        }
        .instrument(span)
        .await
    }

    async fn run_stages(
        &self,
        input: &IncidentInput,
        idempotency_key: Option<&str>,
    ) -> Result<Dispatched, PipelineError> {
        let policy = self.policy.as_ref();
        let max_bytes = enricher_policy::max_artifact_bytes(policy);

        let collected = evidence::collect(
            &self.gateway,
            self.store.as_ref(),
            input,
            &self.retention,
            max_bytes,
        )
        .await
        .inspect_err(|err| stage_failed("evidence", err))?;

        let mut summary = self
            .summarize(&collected.bundle, enricher_policy::redaction_level(policy))
            .await
            .inspect_err(|err| stage_failed("summary", err))?;

        let target = delivery::DeliveryTarget {
            gateway: &self.gateway,
            notifier: &self.notifier,
            policy,
            retention: &self.retention,
            max_bytes,
        };
        let post = delivery::deliver(&target, input, &mut summary)
            .await
            .inspect_err(|err| stage_failed("delivery", err))?;

        let payload = run_payload(
            input,
            &collected.bundle,
            &summary,
            &post,
            collected.context_ptr.as_deref(),
        )?;
        let run_id = self
            .start_run(&input.incident_id, &payload, idempotency_key)
            .await
            .inspect_err(|err| stage_failed("workflow", err))?;

        let result_ptr = match &self.store {
            Some(store) => Some(
                store
                    .put_result_json(&run_id, &post)
                    .await
                    .map_err(PipelineError::from)
                    .inspect_err(|err| {
                        crate::metrics::inc_pipeline_failure("result");
                        tracing::warn!(
                            run_id = %run_id,
                            error = %err,
                            "ingester.result_persist_failed"
                        );
                    })?,
            ),
            None => None,
        };

        tracing::info!(
            incident_id = %input.incident_id,
            run_id = %run_id,
            mode = %post.mode,
            "ingester.run_dispatched"
        );

        Ok(Dispatched {
            run_id,
            incident_id: input.incident_id.clone(),
            result_ptr,
            post,
        })
    }

    async fn summarize(
        &self,
        bundle: &EvidenceBundle,
        redaction_level: &str,
    ) -> Result<Summary, PipelineError> {
        let span = tracing::info_span!(
            "summary.generate",
            incident_id = %bundle.incident_id,
            provider = self.provider.as_str(),
            latency_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );
        let started = Instant::now();

        async {
            let result = summarizer::summarize(self.provider, bundle, redaction_level)
                .await
                .map_err(PipelineError::from);
            record_outcome(started, &result);
            result
        }
        .instrument(span)
        .await
    }

    async fn start_run(
        &self,
        incident_id: &str,
        payload: &Map<String, Value>,
        idempotency_key: Option<&str>,
    ) -> Result<String, PipelineError> {
        let span = tracing::info_span!(
            "workflow.start_run",
            incident_id = %incident_id,
            workflow_id = %self.workflow_id,
            idempotent = idempotency_key.is_some(),
            latency_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );
        let started = Instant::now();

        async {
            let result = self
                .gateway
                .start_run(&self.workflow_id, payload, idempotency_key)
                .await
                .map_err(PipelineError::from);
            record_outcome(started, &result);
            result
        }
        .instrument(span)
        .await
    }
}

/// Workflow input: the sanitized incident record at the top level plus the
/// products of each stage.
pub fn run_payload(
    input: &IncidentInput,
    bundle: &EvidenceBundle,
    summary: &Summary,
    post: &PostResult,
    context_ptr: Option<&str>,
) -> Result<Map<String, Value>, PipelineError> {
    let safe = input.without_notification_secrets();
    let mut payload = match serde_json::to_value(&safe).map_err(PipelineError::Encode)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };

    payload.insert(
        "evidence".to_string(),
        serde_json::to_value(bundle).map_err(PipelineError::Encode)?,
    );
    payload.insert(
        "summary".to_string(),
        serde_json::to_value(summary).map_err(PipelineError::Encode)?,
    );
    payload.insert(
        "delivery".to_string(),
        serde_json::to_value(post).map_err(PipelineError::Encode)?,
    );
    if let Some(ptr) = context_ptr {
        payload.insert("context_ptr".to_string(), Value::String(ptr.to_string()));
    }

    Ok(payload)
}

pub(crate) fn record_outcome<T, E>(started: Instant, result: &Result<T, E>) {
    let span = tracing::Span::current();
    span.record("latency_ms", started.elapsed().as_millis() as u64);
    span.record("outcome", if result.is_ok() { "ok" } else { "error" });
}

fn stage_failed(stage: &'static str, err: &PipelineError) {
    crate::metrics::inc_pipeline_failure(stage);
    tracing::warn!(stage, error = %err, "ingester.stage_failed");
}
