use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use enricher_contracts::{MODE_ARTIFACT, MODE_SLACK};
use enricher_policy::PolicyConstraints;

use crate::summarizer::{SummarizeError, SummaryProvider};

pub const DEFAULT_WORKFLOW_ID: &str = "incident-enricher.enrich";
pub const DEFAULT_RETENTION: &str = "audit";

#[derive(Debug, Clone)]
pub struct IngesterConfig {
    pub bind_addr: SocketAddr,
    pub gateway_url: String,
    pub gateway_api_key: Option<String>,
    pub gateway_timeout: Duration,
    pub workflow_id: String,
    pub default_destination_mode: String,
    pub slack_webhook_url: Option<String>,
    pub notify_timeout: Duration,
    pub artifact_retention: String,
    pub summary_provider: SummaryProvider,
    pub store_url: Option<String>,
    pub store_ttl: Option<Duration>,
    pub store_timeout: Duration,
    pub request_timeout: Duration,
    pub policy: Option<PolicyConstraints>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for StartupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for StartupError {}

impl IngesterConfig {
    /// Reads `ENRICHER_CONFIG_PATH` (if set) and overlays the process
    /// environment on top of it.
    pub fn load() -> Result<Self, StartupError> {
        let mut merged = match std::env::var("ENRICHER_CONFIG_PATH") {
            Ok(path) if !path.trim().is_empty() => read_config_file(path.trim())?,
            _ => HashMap::new(),
        };
        merged.extend(std::env::vars());

        Self::from_kv(&merged)
    }

    pub fn from_kv(kv: &HashMap<String, String>) -> Result<Self, StartupError> {
        let settings = Settings(kv);

        let store_ttl_secs = settings.number("ENRICHER_STORE_TTL_SECS", 86_400)?;
        let policy = PolicyConstraints::from_env(kv).map_err(|err| StartupError {
            code: "ERR_INVALID_POLICY_CONSTRAINTS",
            message: err.to_string(),
        })?;

        Ok(Self {
            bind_addr: settings.socket_addr(
                "ENRICHER_BIND_ADDR",
                SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8088),
            )?,
            gateway_url: settings.required("ENRICHER_GATEWAY_URL")?,
            gateway_api_key: settings.text("ENRICHER_GATEWAY_API_KEY"),
            gateway_timeout: settings.millis("ENRICHER_GATEWAY_TIMEOUT_MS", 15_000)?,
            workflow_id: settings
                .text("ENRICHER_WORKFLOW_ID")
                .unwrap_or_else(|| DEFAULT_WORKFLOW_ID.to_string()),
            default_destination_mode: parse_destination_mode(
                settings.text("ENRICHER_DEFAULT_DESTINATION_MODE"),
            )?,
            slack_webhook_url: settings.text("ENRICHER_SLACK_WEBHOOK_URL"),
            notify_timeout: settings.millis("ENRICHER_NOTIFY_TIMEOUT_MS", 10_000)?,
            artifact_retention: settings
                .text("ENRICHER_ARTIFACT_RETENTION")
                .unwrap_or_else(|| DEFAULT_RETENTION.to_string()),
            summary_provider: parse_summary_provider(settings.text("ENRICHER_LLM_PROVIDER"))?,
            store_url: settings.text("ENRICHER_STORE_URL"),
            store_ttl: (store_ttl_secs > 0).then(|| Duration::from_secs(store_ttl_secs)),
            store_timeout: settings.millis("ENRICHER_STORE_TIMEOUT_MS", 2_000)?,
            request_timeout: settings.millis("ENRICHER_REQUEST_TIMEOUT_MS", 30_000)?,
            policy,
        })
    }
}

/// Trimmed, typed lookups over the merged key/value map. Blank values count
/// as unset.
struct Settings<'a>(&'a HashMap<String, String>);

impl Settings<'_> {
    fn text(&self, key: &str) -> Option<String> {
        self.0
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    fn required(&self, key: &'static str) -> Result<String, StartupError> {
        self.text(key).ok_or_else(|| StartupError {
            code: "ERR_MISSING_CONFIG",
            message: format!("missing required config key {}", key),
        })
    }

    fn number(&self, key: &'static str, default: u64) -> Result<u64, StartupError> {
        self.text(key)
            .map_or(Ok(default), |v| v.parse::<u64>())
            .map_err(|_| invalid(key, "must be an integer"))
    }

    fn millis(&self, key: &'static str, default_ms: u64) -> Result<Duration, StartupError> {
        match self.number(key, default_ms)? {
            0 => Err(invalid(key, "must be > 0")),
            ms => Ok(Duration::from_millis(ms)),
        }
    }

    fn socket_addr(&self, key: &'static str, default: SocketAddr) -> Result<SocketAddr, StartupError> {
        self.text(key)
            .map_or(Ok(default), |v| v.parse::<SocketAddr>())
            .map_err(|_| invalid(key, "must be a host:port socket address"))
    }
}

fn invalid(key: &str, expectation: &str) -> StartupError {
    StartupError {
        code: "ERR_INVALID_CONFIG",
        message: format!("{} {}", key, expectation),
    }
}

fn read_config_file(path: &str) -> Result<HashMap<String, String>, StartupError> {
    let contents = std::fs::read_to_string(path).map_err(|_| StartupError {
        code: "ERR_CONFIG_FILE_READ",
        message: format!("failed to read config file at {}", path),
    })?;
    parse_config_text(&contents)
}

/// `KEY=VALUE` lines; `#` comments and blank lines are skipped and values may
/// be wrapped in matching single or double quotes.
fn parse_config_text(contents: &str) -> Result<HashMap<String, String>, StartupError> {
    let line_error = |line_no: usize, reason: &str| StartupError {
        code: "ERR_CONFIG_FILE_PARSE",
        message: format!("config line {}: {}", line_no, reason),
    };

    contents
        .lines()
        .enumerate()
        .map(|(idx, line)| (idx + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(line_no, line)| {
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| line_error(line_no, "expected KEY=VALUE"))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(line_error(line_no, "empty key"));
            }
            Ok((key.to_string(), unquote(value.trim()).to_string()))
        })
        .collect()
}

fn unquote(value: &str) -> &str {
    ['"', '\'']
        .into_iter()
        .find_map(|quote| value.strip_prefix(quote)?.strip_suffix(quote))
        .unwrap_or(value)
}

fn parse_destination_mode(value: Option<String>) -> Result<String, StartupError> {
    match value.as_deref().unwrap_or(MODE_ARTIFACT) {
        mode @ (MODE_ARTIFACT | MODE_SLACK) => Ok(mode.to_string()),
        _ => Err(invalid(
            "ENRICHER_DEFAULT_DESTINATION_MODE",
            "must be artifact or slack",
        )),
    }
}

fn parse_summary_provider(value: Option<String>) -> Result<SummaryProvider, StartupError> {
    match SummaryProvider::from_name(value.as_deref().unwrap_or("")) {
        Ok(SummaryProvider::OpenAi) => Err(StartupError {
            code: "ERR_MODEL_PROVIDER_UNIMPLEMENTED",
            message: "openai summarizer is not configured; refuse startup".to_string(),
        }),
        Ok(provider) => Ok(provider),
        Err(SummarizeError::UnsupportedProvider(name)) => Err(StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("ENRICHER_LLM_PROVIDER {} is not supported", name),
        }),
        Err(err) => Err(StartupError {
            code: "ERR_INVALID_CONFIG",
            message: err.to_string(),
        }),
    }
}
