use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub mod pointer;

pub const MODE_ARTIFACT: &str = "artifact";
pub const MODE_SLACK: &str = "slack";

/// Canonical incident record handed to the enrichment workflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IncidentInput {
    #[serde(default)]
    pub incident_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub severity: String,
    #[serde(default)]
    pub source: SourceInfo,
    /// Verbatim inbound body, kept for audit and never merged into the typed fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Map<String, Value>>,
    #[serde(default)]
    pub destination: Destination,
}

impl IncidentInput {
    pub fn is_canonical(&self) -> bool {
        !self.incident_id.trim().is_empty()
            && !self.source.system.trim().is_empty()
            && !self.destination.mode.trim().is_empty()
    }

    /// Copy of the record with every notification secret removed, including
    /// one echoed back inside the raw payload.
    pub fn without_notification_secrets(&self) -> Self {
        let mut safe = self.clone();
        safe.destination.slack_webhook_url = None;
        if let Some(raw) = safe.raw.as_mut()
            && let Some(Value::Object(destination)) = raw.get_mut("destination")
        {
            destination.remove("slack_webhook_url");
        }
        safe
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    #[serde(default)]
    pub system: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    #[serde(default)]
    pub mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slack_webhook_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_ptr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceBundle {
    pub incident_id: String,
    pub evidence: Vec<EvidenceItem>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub normalized_context: Map<String, Value>,
    pub collected_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub incident_id: String,
    #[serde(rename = "summary_md")]
    pub summary_markdown: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub highlights: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub action_items: Vec<String>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_ptr: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlackResult {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permalink: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostResult {
    pub incident_id: String,
    pub mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slack: Option<SlackResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_ptr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub posted_at: Option<String>,
}

/// Current time as `YYYY-MM-DDTHH:MM:SSZ`.
pub fn utc_timestamp_now() -> String {
    format_utc_timestamp(time::OffsetDateTime::now_utc())
}

pub fn format_utc_timestamp(at: time::OffsetDateTime) -> String {
    let format =
        time::macros::format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]Z");
    at.to_offset(time::UtcOffset::UTC)
        .format(format)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incident_input_parses_partial_bodies_with_defaults() {
        let input: IncidentInput = serde_json::from_value(serde_json::json!({
            "incident_id": "inc-1",
            "title": "db down",
            "severity": "sev1",
            "source": { "system": "pagerduty" },
            "destination": { "mode": "artifact" }
        }))
        .expect("canonical body should parse");

        assert!(input.is_canonical());
        assert_eq!(input.source.url, None);
        assert_eq!(input.destination.slack_webhook_url, None);
        assert!(input.raw.is_none());

        let partial: IncidentInput =
            serde_json::from_value(serde_json::json!({ "title": "disk full" }))
                .expect("partial body should parse");
        assert!(!partial.is_canonical());
    }

    #[test]
    fn without_notification_secrets_strips_typed_and_raw_webhook() {
        let input: IncidentInput = serde_json::from_value(serde_json::json!({
            "incident_id": "inc-1",
            "source": { "system": "mock" },
            "destination": { "mode": "slack", "slack_webhook_url": "https://hooks.internal/x" },
            "raw": {
                "destination": { "mode": "slack", "slack_webhook_url": "https://hooks.internal/x" },
                "note": "kept"
            }
        }))
        .expect("body should parse");

        let safe = input.without_notification_secrets();
        let encoded = serde_json::to_string(&safe).expect("record should serialize");

        assert!(!encoded.contains("hooks.internal"));
        assert_eq!(safe.destination.mode, "slack");
        assert_eq!(
            safe.raw.as_ref().and_then(|raw| raw.get("note")),
            Some(&serde_json::json!("kept"))
        );
        assert_eq!(
            input.destination.slack_webhook_url.as_deref(),
            Some("https://hooks.internal/x")
        );
    }

    #[test]
    fn summary_uses_summary_md_field_name() {
        let summary = Summary {
            incident_id: "inc-1".to_string(),
            summary_markdown: "# db down".to_string(),
            highlights: Vec::new(),
            action_items: vec!["page owner".to_string()],
            confidence: 0.5,
            model: Some("mock".to_string()),
            artifact_ptr: None,
        };

        let value = serde_json::to_value(&summary).expect("summary should serialize");
        assert_eq!(value["summary_md"], "# db down");
        assert!(value.get("highlights").is_none());
        assert!(value.get("artifact_ptr").is_none());
    }

    #[test]
    fn utc_timestamp_has_fixed_second_precision_format() {
        let at = time::OffsetDateTime::from_unix_timestamp(1_700_000_000)
            .expect("timestamp should be valid")
            .replace_nanosecond(123_456_789)
            .expect("nanosecond should be valid");

        assert_eq!(format_utc_timestamp(at), "2023-11-14T22:13:20Z");
        assert_eq!(utc_timestamp_now().len(), "1970-01-01T00:00:00Z".len());
    }
}
