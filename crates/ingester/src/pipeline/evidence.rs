use std::collections::BTreeMap;
use std::time::Instant;

use enricher_contracts::{EvidenceBundle, EvidenceItem, IncidentInput, utc_timestamp_now};
use enricher_gatewayclient::{GatewayClient, PutArtifactRequest};
use enricher_store::Store;
use serde_json::{Map, Value};
use tracing::Instrument;

use super::{PipelineError, record_outcome};

pub const EVIDENCE_KIND: &str = "incident.raw";
const EVIDENCE_TITLE: &str = "incident payload";
const JSON_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Clone)]
pub struct Collected {
    pub bundle: EvidenceBundle,
    /// Set when a store is configured and the normalized context was written.
    pub context_ptr: Option<String>,
}

pub async fn collect(
    gateway: &GatewayClient,
    store: Option<&Store>,
    input: &IncidentInput,
    retention: &str,
    max_bytes: u64,
) -> Result<Collected, PipelineError> {
    let span = tracing::info_span!(
        "evidence.collect",
        incident_id = %input.incident_id,
        artifact_ptr = tracing::field::Empty,
        bytes = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );
    let started = Instant::now();

    async move {
        let result = collect_inner(gateway, store, input, retention, max_bytes).await;
        if let Ok(collected) = &result
            && let Some(item) = collected.bundle.evidence.first()
        {
            let span = tracing::Span::current();
            span.record("artifact_ptr", item.artifact_ptr.as_deref().unwrap_or(""));
            span.record("bytes", item.bytes.unwrap_or(0));
        }
        record_outcome(started, &result);
        result
    }
    .instrument(span)
    .await
}

async fn collect_inner(
    gateway: &GatewayClient,
    store: Option<&Store>,
    input: &IncidentInput,
    retention: &str,
    max_bytes: u64,
) -> Result<Collected, PipelineError> {
    let safe = input.without_notification_secrets();
    let payload = serde_json::to_vec(&safe).map_err(PipelineError::Encode)?;

    let labels = BTreeMap::from([
        ("kind".to_string(), "incident".to_string()),
        ("incident_id".to_string(), input.incident_id.clone()),
    ]);
    let stored = gateway
        .put_artifact(PutArtifactRequest {
            content: &payload,
            content_type: JSON_CONTENT_TYPE,
            retention,
            labels: &labels,
            max_bytes,
        })
        .await?;

    let normalized_context = normalized_context(input);
    let context_ptr = match store {
        Some(store) => Some(
            store
                .put_context_json(&input.incident_id, &normalized_context)
                .await?,
        ),
        None => None,
    };

    Ok(Collected {
        bundle: EvidenceBundle {
            incident_id: input.incident_id.clone(),
            evidence: vec![EvidenceItem {
                kind: EVIDENCE_KIND.to_string(),
                title: Some(EVIDENCE_TITLE.to_string()),
                artifact_ptr: Some(stored.artifact_ptr),
                content_type: Some(JSON_CONTENT_TYPE.to_string()),
                bytes: Some(stored.size_bytes),
            }],
            normalized_context,
            collected_at: utc_timestamp_now(),
        },
        context_ptr,
    })
}

fn normalized_context(input: &IncidentInput) -> Map<String, Value> {
    let mut context = Map::new();
    context.insert("title".to_string(), Value::String(input.title.clone()));
    context.insert("severity".to_string(), Value::String(input.severity.clone()));
    context.insert(
        "source".to_string(),
        Value::String(input.source.system.clone()),
    );
    context
}

#[cfg(test)]
mod tests {
    use super::*;

    use enricher_contracts::{Destination, SourceInfo};

    use crate::test_support::{SharedGateway, gateway_client, spawn_mock_gateway};

    fn input() -> IncidentInput {
        IncidentInput {
            incident_id: "inc-1".to_string(),
            title: "db down".to_string(),
            severity: "sev1".to_string(),
            source: SourceInfo {
                system: "pagerduty".to_string(),
                url: Some("https://pd/incidents/1".to_string()),
            },
            raw: None,
            destination: Destination {
                mode: "slack".to_string(),
                slack_webhook_url: Some("https://hooks.internal/T0/secret".to_string()),
            },
        }
    }

    #[tokio::test]
    async fn collect_uploads_sanitized_record_with_labels_and_ceiling() {
        let state = SharedGateway::default();
        let (addr, shutdown, task) = spawn_mock_gateway(state.clone()).await;
        let gateway = gateway_client(&format!("http://{}", addr));

        let collected = collect(&gateway, None, &input(), "audit", 4096)
            .await
            .expect("collect should succeed");

        shutdown.send(()).ok();
        let _ = task.await;

        let gw = state.lock().expect("mock lock");
        assert_eq!(gw.artifacts.len(), 1);
        let artifact = &gw.artifacts[0];
        assert_eq!(artifact.retention, "audit");
        assert_eq!(artifact.max_bytes_header.as_deref(), Some("4096"));
        assert_eq!(artifact.labels.len(), 2);

        let uploaded: IncidentInput =
            serde_json::from_slice(&artifact.content).expect("upload should be an incident");
        assert_eq!(uploaded.incident_id, "inc-1");
        assert!(uploaded.destination.slack_webhook_url.is_none());

        let bundle = collected.bundle;
        assert_eq!(bundle.incident_id, "inc-1");
        assert_eq!(bundle.evidence.len(), 1);
        let item = &bundle.evidence[0];
        assert_eq!(item.kind, EVIDENCE_KIND);
        assert_eq!(item.title.as_deref(), Some("incident payload"));
        assert_eq!(item.artifact_ptr.as_deref(), Some(artifact.ptr.as_str()));
        assert_eq!(item.bytes, Some(artifact.content.len() as u64));
        assert_eq!(bundle.normalized_context["title"], "db down");
        assert_eq!(bundle.normalized_context["severity"], "sev1");
        assert_eq!(bundle.normalized_context["source"], "pagerduty");
        assert_eq!(bundle.collected_at.len(), "2024-01-01T00:00:00Z".len());
        assert!(bundle.collected_at.ends_with('Z'));
        assert!(collected.context_ptr.is_none());
    }

    #[tokio::test]
    async fn collect_writes_context_when_store_is_configured() {
        let state = SharedGateway::default();
        let (addr, shutdown, task) = spawn_mock_gateway(state).await;
        let gateway = gateway_client(&format!("http://{}", addr));
        let store = Store::in_memory(None);

        let collected = collect(&gateway, Some(&store), &input(), "audit", 0)
            .await
            .expect("collect should succeed");

        shutdown.send(()).ok();
        let _ = task.await;

        let ptr = collected.context_ptr.expect("context should be stored");
        assert_eq!(ptr, "memory://ctx:inc-1");
        let context: Map<String, Value> = store
            .get_context_json(&ptr)
            .await
            .expect("context should load");
        assert_eq!(context, collected.bundle.normalized_context);
    }
}
