use enricher_contracts::{EvidenceBundle, Summary};

const REDACTED: &str = "[redacted]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryProvider {
    Mock,
    OpenAi,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummarizeError {
    UnsupportedProvider(String),
    ProviderNotConfigured(&'static str),
}

impl std::fmt::Display for SummarizeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SummarizeError::UnsupportedProvider(name) => {
                write!(f, "unsupported llm provider: {}", name)
            }
            SummarizeError::ProviderNotConfigured(name) => {
                write!(f, "{} summarizer not configured", name)
            }
        }
    }
}

impl std::error::Error for SummarizeError {}

impl SummaryProvider {
    /// Blank selects the mock provider.
    pub fn from_name(name: &str) -> Result<Self, SummarizeError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "mock" => Ok(SummaryProvider::Mock),
            "openai" => Ok(SummaryProvider::OpenAi),
            _ => Err(SummarizeError::UnsupportedProvider(name.trim().to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SummaryProvider::Mock => "mock",
            SummaryProvider::OpenAi => "openai",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Redaction {
    None,
    Pointers,
    Strict,
}

impl Redaction {
    fn from_level(level: &str) -> Self {
        match level.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Redaction::None,
            "strict" => Redaction::Strict,
            _ => Redaction::Pointers,
        }
    }
}

pub async fn summarize(
    provider: SummaryProvider,
    bundle: &EvidenceBundle,
    redaction_level: &str,
) -> Result<Summary, SummarizeError> {
    match provider {
        SummaryProvider::Mock => Ok(summarize_mock(bundle, redaction_level)),
        SummaryProvider::OpenAi => Err(SummarizeError::ProviderNotConfigured(
            SummaryProvider::OpenAi.as_str(),
        )),
    }
}

fn context_str<'a>(bundle: &'a EvidenceBundle, key: &str) -> Option<&'a str> {
    bundle
        .normalized_context
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
}

fn summarize_mock(bundle: &EvidenceBundle, redaction_level: &str) -> Summary {
    let redaction = Redaction::from_level(redaction_level);

    let title = match redaction {
        Redaction::Strict => REDACTED,
        _ => context_str(bundle, "title").unwrap_or("untitled incident"),
    };
    let severity = context_str(bundle, "severity").unwrap_or("unknown");
    let source = context_str(bundle, "source").unwrap_or("unknown");

    let mut lines = vec![
        format!("*Incident {}*: {}", bundle.incident_id, title),
        format!("- Severity: {}", severity),
        format!("- Source: {}", source),
        format!("- Evidence items: {}", bundle.evidence.len()),
    ];
    for item in &bundle.evidence {
        let label = item.title.as_deref().unwrap_or(item.kind.as_str());
        let reference = match (redaction, item.artifact_ptr.as_deref()) {
            (_, None) => None,
            (Redaction::None, Some(ptr)) => Some(ptr),
            (_, Some(_)) => Some(REDACTED),
        };
        match reference {
            Some(reference) => lines.push(format!("  - {} ({})", label, reference)),
            None => lines.push(format!("  - {}", label)),
        }
    }

    Summary {
        incident_id: bundle.incident_id.clone(),
        summary_markdown: lines.join("\n"),
        highlights: vec![
            format!("severity {}", severity),
            format!("reported by {}", source),
        ],
        action_items: vec![
            "Review the attached incident payload".to_string(),
            "Confirm an owner and post the next status update".to_string(),
        ],
        confidence: 0.5,
        model: Some(SummaryProvider::Mock.as_str().to_string()),
        artifact_ptr: None,
    }
}
