use enricher_contracts::{Destination, IncidentInput, SourceInfo};
use serde_json::{Map, Value};

use super::PipelineError;

/// Values used when an inbound body is not already a canonical record.
#[derive(Debug, Clone, Copy)]
pub struct IntakeDefaults<'a> {
    pub destination_mode: &'a str,
    pub slack_webhook_url: Option<&'a str>,
}

pub fn normalize_body(
    body: &[u8],
    system: &str,
    defaults: &IntakeDefaults<'_>,
) -> Result<IncidentInput, PipelineError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|err| PipelineError::Validation(format!("invalid json: {}", err)))?;
    let Value::Object(raw) = value else {
        return Err(PipelineError::Validation(
            "request body must be a JSON object".to_string(),
        ));
    };

    if let Ok(mut input) = serde_json::from_value::<IncidentInput>(Value::Object(raw.clone()))
        && input.is_canonical()
    {
        if input.raw.is_none() {
            input.raw = Some(raw);
        }
        return Ok(input);
    }

    Ok(synthesize(raw, system, defaults))
}

fn synthesize(raw: Map<String, Value>, system: &str, defaults: &IntakeDefaults<'_>) -> IncidentInput {
    let incident_id = string_field(&raw, "incident_id").unwrap_or_else(generate_incident_id);

    IncidentInput {
        incident_id,
        title: string_field(&raw, "title").unwrap_or_default(),
        severity: string_field(&raw, "severity").unwrap_or_default(),
        source: SourceInfo {
            system: system.to_string(),
            url: string_field(&raw, "url"),
        },
        destination: Destination {
            mode: defaults.destination_mode.to_string(),
            slack_webhook_url: defaults
                .slack_webhook_url
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string()),
        },
        raw: Some(raw),
    }
}

/// `inc-` followed by 12 lowercase hex characters.
pub fn generate_incident_id() -> String {
    format!("inc-{}", hex::encode(rand::random::<[u8; 6]>()))
}

fn string_field(raw: &Map<String, Value>, key: &str) -> Option<String> {
    raw.get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULTS: IntakeDefaults<'static> = IntakeDefaults {
        destination_mode: "artifact",
        slack_webhook_url: None,
    };

    fn is_generated_id(id: &str) -> bool {
        id.strip_prefix("inc-").is_some_and(|hex| {
            hex.len() == 12
                && hex
                    .chars()
                    .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        })
    }

    #[test]
    fn canonical_body_is_kept_and_raw_is_filled() {
        let body = br#"{"incident_id":"inc-1","title":"db down","severity":"sev1","source":{"system":"pagerduty"},"destination":{"mode":"artifact"}}"#;
        let input = normalize_body(body, "mock", &DEFAULTS).expect("body should normalize");

        assert_eq!(input.incident_id, "inc-1");
        assert_eq!(input.title, "db down");
        assert_eq!(input.source.system, "pagerduty");
        assert_eq!(input.destination.mode, "artifact");
        let raw = input.raw.expect("raw should be filled");
        assert_eq!(raw["incident_id"], "inc-1");
        assert_eq!(raw["source"]["system"], "pagerduty");
    }

    #[test]
    fn canonical_body_keeps_explicit_raw() {
        let body = br#"{"incident_id":"inc-2","source":{"system":"pagerduty"},"destination":{"mode":"slack"},"raw":{"vendor":"pd"}}"#;
        let input = normalize_body(body, "mock", &DEFAULTS).expect("body should normalize");

        let raw = input.raw.expect("raw should be kept");
        assert_eq!(raw.len(), 1);
        assert_eq!(raw["vendor"], "pd");
    }

    #[test]
    fn generic_body_is_synthesized_with_intake_defaults() {
        let defaults = IntakeDefaults {
            destination_mode: "slack",
            slack_webhook_url: Some("https://hooks.internal/x"),
        };
        let input = normalize_body(
            br#"{"title":" disk full ","severity":"sev3","url":"https://mon/1","extra":7}"#,
            "mock",
            &defaults,
        )
        .expect("body should normalize");

        assert!(is_generated_id(&input.incident_id), "id {}", input.incident_id);
        assert_eq!(input.title, "disk full");
        assert_eq!(input.severity, "sev3");
        assert_eq!(input.source.system, "mock");
        assert_eq!(input.source.url.as_deref(), Some("https://mon/1"));
        assert_eq!(input.destination.mode, "slack");
        assert_eq!(
            input.destination.slack_webhook_url.as_deref(),
            Some("https://hooks.internal/x")
        );
        assert_eq!(input.raw.expect("raw should be kept")["extra"], 7);
    }

    #[test]
    fn partial_record_is_synthesized_and_keeps_its_incident_id() {
        let input = normalize_body(
            br#"{"incident_id":"  pd-42 ","source":{"system":""},"title":"api 500s"}"#,
            "pagerduty",
            &DEFAULTS,
        )
        .expect("body should normalize");

        assert_eq!(input.incident_id, "pd-42");
        assert_eq!(input.source.system, "pagerduty");
        assert_eq!(input.destination.mode, "artifact");
        assert!(input.is_canonical());
    }

    #[test]
    fn mistyped_fields_fall_back_to_synthesis() {
        let input = normalize_body(
            br#"{"incident_id":17,"title":["x"],"source":{"system":"pd"},"destination":{"mode":"artifact"}}"#,
            "mock",
            &DEFAULTS,
        )
        .expect("body should normalize");

        assert!(is_generated_id(&input.incident_id));
        assert_eq!(input.title, "");
        assert_eq!(input.source.system, "mock");
    }

    #[test]
    fn non_object_bodies_are_validation_errors() {
        for body in [&b"not json"[..], b"[1,2]", b"\"text\"", b""] {
            let err = normalize_body(body, "mock", &DEFAULTS).unwrap_err();
            assert!(matches!(err, PipelineError::Validation(_)));
        }
    }

    #[test]
    fn generated_ids_are_unique_and_well_formed() {
        let a = generate_incident_id();
        let b = generate_incident_id();
        assert!(is_generated_id(&a));
        assert!(is_generated_id(&b));
        assert_ne!(a, b);
    }
}
