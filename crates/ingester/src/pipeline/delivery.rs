use std::collections::BTreeMap;
use std::time::Instant;

use enricher_contracts::{
    IncidentInput, MODE_ARTIFACT, MODE_SLACK, PostResult, Summary, utc_timestamp_now,
};
use enricher_gatewayclient::{GatewayClient, PutArtifactRequest};
use enricher_policy::PolicyConstraints;
use tracing::Instrument;

use super::{PipelineError, record_outcome};
use crate::notify::Notifier;

pub struct DeliveryTarget<'a> {
    pub gateway: &'a GatewayClient,
    pub notifier: &'a Notifier,
    pub policy: Option<&'a PolicyConstraints>,
    pub retention: &'a str,
    pub max_bytes: u64,
}

/// Posts the summary to the incident's destination. In artifact mode the
/// uploaded pointer is recorded on `summary`.
pub async fn deliver(
    target: &DeliveryTarget<'_>,
    input: &IncidentInput,
    summary: &mut Summary,
) -> Result<PostResult, PipelineError> {
    let mode = input.destination.mode.trim();
    let span = tracing::info_span!(
        "delivery.post",
        incident_id = %input.incident_id,
        mode = %mode,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );
    let started = Instant::now();

    async move {
        let result = match mode {
            MODE_ARTIFACT => deliver_artifact(target, input, summary).await,
            MODE_SLACK => deliver_slack(target, input, summary).await,
            other => Err(PipelineError::Validation(format!(
                "unsupported destination mode: {}",
                other
            ))),
        };
        record_outcome(started, &result);
        result
    }
    .instrument(span)
    .await
}

async fn deliver_artifact(
    target: &DeliveryTarget<'_>,
    input: &IncidentInput,
    summary: &mut Summary,
) -> Result<PostResult, PipelineError> {
    let content = serde_json::to_vec(summary).map_err(PipelineError::Encode)?;
    let labels = BTreeMap::from([
        ("kind".to_string(), "summary".to_string()),
        ("incident_id".to_string(), input.incident_id.clone()),
    ]);

    let stored = target
        .gateway
        .put_artifact(PutArtifactRequest {
            content: &content,
            content_type: "application/json",
            retention: target.retention,
            labels: &labels,
            max_bytes: target.max_bytes,
        })
        .await?;

    summary.artifact_ptr = Some(stored.artifact_ptr.clone());

    Ok(PostResult {
        incident_id: input.incident_id.clone(),
        mode: MODE_ARTIFACT.to_string(),
        slack: None,
        artifact_ptr: Some(stored.artifact_ptr),
        posted_at: Some(utc_timestamp_now()),
    })
}

async fn deliver_slack(
    target: &DeliveryTarget<'_>,
    input: &IncidentInput,
    summary: &Summary,
) -> Result<PostResult, PipelineError> {
    let webhook_url = input
        .destination
        .slack_webhook_url
        .as_deref()
        .map(|s| s.trim())
        .unwrap_or("");

    let allowed = enricher_policy::host_allowed(target.policy, webhook_url)
        .map_err(|err| PipelineError::Validation(err.to_string()))?;
    if !allowed {
        crate::metrics::inc_policy_denial();
        tracing::warn!(
            incident_id = %input.incident_id,
            "ingester.webhook_host_denied"
        );
        return Err(PipelineError::PolicyDenied(
            "webhook host is not in the network allowlist".to_string(),
        ));
    }

    // Unconstrained policy admits anything, including a blank url.
    if webhook_url.is_empty() {
        return Err(PipelineError::Validation(
            "slack destination requires a webhook url".to_string(),
        ));
    }

    let slack = target
        .notifier
        .post_webhook(webhook_url, &summary.summary_markdown)
        .await?;

    Ok(PostResult {
        incident_id: input.incident_id.clone(),
        mode: MODE_SLACK.to_string(),
        slack: Some(slack),
        artifact_ptr: None,
        posted_at: Some(utc_timestamp_now()),
    })
}
