use std::collections::HashMap;

use serde::Deserialize;

pub const POLICY_CONSTRAINTS_ENV: &str = "ENRICHER_POLICY_CONSTRAINTS";
pub const MAX_ARTIFACT_BYTES_ENV: &str = "ENRICHER_MAX_ARTIFACT_BYTES";
pub const REDACTION_LEVEL_ENV: &str = "ENRICHER_REDACTION_LEVEL";

/// Out-of-band limits on outbound side effects. Built once at startup and
/// shared read-only; request payloads never influence it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyConstraints {
    pub network_allowlist: Vec<String>,
    pub redaction_level: String,
    pub max_artifact_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    Parse(String),
    MissingUrl,
    InvalidUrl(String),
    MissingHost,
}

impl std::fmt::Display for PolicyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyError::Parse(message) => write!(f, "invalid policy constraints: {}", message),
            PolicyError::MissingUrl => write!(f, "missing webhook url"),
            PolicyError::InvalidUrl(message) => write!(f, "invalid webhook url: {}", message),
            PolicyError::MissingHost => write!(f, "missing host in webhook url"),
        }
    }
}

impl std::error::Error for PolicyError {}

#[derive(Debug, Default, Deserialize)]
struct ConstraintsDocument {
    #[serde(default)]
    sandbox: Option<SandboxDocument>,
    #[serde(default, alias = "redactionLevel")]
    redaction_level: Option<String>,
    #[serde(default, alias = "maxArtifactBytes")]
    max_artifact_bytes: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SandboxDocument {
    #[serde(default, alias = "networkAllowlist")]
    network_allowlist: Vec<String>,
}

impl PolicyConstraints {
    /// `Ok(None)` means no constraints were configured at all.
    pub fn from_env(env: &HashMap<String, String>) -> Result<Option<Self>, PolicyError> {
        let document = nonblank(env, POLICY_CONSTRAINTS_ENV);
        let redaction_override = nonblank(env, REDACTION_LEVEL_ENV);
        let max_bytes_override = nonblank(env, MAX_ARTIFACT_BYTES_ENV);

        if document.is_none() && redaction_override.is_none() && max_bytes_override.is_none() {
            return Ok(None);
        }

        let parsed = match document {
            Some(raw) => serde_json::from_str::<ConstraintsDocument>(raw)
                .map_err(|err| PolicyError::Parse(format!("{}: {}", POLICY_CONSTRAINTS_ENV, err)))?,
            None => ConstraintsDocument::default(),
        };

        let max_artifact_bytes = match max_bytes_override {
            Some(raw) => raw.parse::<u64>().map_err(|_| {
                PolicyError::Parse(format!(
                    "{} must be a non-negative integer",
                    MAX_ARTIFACT_BYTES_ENV
                ))
            })?,
            None => parsed.max_artifact_bytes.unwrap_or(0),
        };

        let redaction_level = redaction_override
            .map(|s| s.to_string())
            .or_else(|| parsed.redaction_level.map(|s| s.trim().to_string()))
            .unwrap_or_default();

        let network_allowlist = parsed
            .sandbox
            .map(|sandbox| sandbox.network_allowlist)
            .unwrap_or_default();

        Ok(Some(Self {
            network_allowlist,
            redaction_level,
            max_artifact_bytes,
        }))
    }
}

/// Unconfigured constraints, or an empty allowlist, allow every destination.
pub fn host_allowed(
    constraints: Option<&PolicyConstraints>,
    raw_url: &str,
) -> Result<bool, PolicyError> {
    let Some(constraints) = constraints else {
        return Ok(true);
    };
    if constraints.network_allowlist.is_empty() {
        return Ok(true);
    }

    let raw_url = raw_url.trim();
    if raw_url.is_empty() {
        return Err(PolicyError::MissingUrl);
    }

    let parsed = match url::Url::parse(raw_url) {
        Ok(parsed) => parsed,
        // `hooks.internal/x` parses as a path with no host.
        Err(url::ParseError::RelativeUrlWithoutBase) => return Err(PolicyError::MissingHost),
        Err(err) => return Err(PolicyError::InvalidUrl(err.to_string())),
    };
    // IPv6 hosts are compared without their brackets.
    let host = match parsed.host() {
        Some(url::Host::Domain(domain)) => domain.trim().to_ascii_lowercase(),
        Some(url::Host::Ipv4(addr)) => addr.to_string(),
        Some(url::Host::Ipv6(addr)) => addr.to_string(),
        None => String::new(),
    };
    if host.is_empty() {
        return Err(PolicyError::MissingHost);
    }

    for entry in &constraints.network_allowlist {
        let entry = entry.trim().to_ascii_lowercase();
        if entry.is_empty() {
            continue;
        }
        if entry == "*" {
            return Ok(true);
        }
        if let Some(suffix) = entry.strip_prefix("*.") {
            if host.ends_with(suffix) {
                return Ok(true);
            }
            continue;
        }
        if host == entry {
            return Ok(true);
        }
    }

    Ok(false)
}

pub fn max_artifact_bytes(constraints: Option<&PolicyConstraints>) -> u64 {
    constraints.map(|c| c.max_artifact_bytes).unwrap_or(0)
}

pub fn redaction_level(constraints: Option<&PolicyConstraints>) -> &str {
    constraints
        .map(|c| c.redaction_level.as_str())
        .unwrap_or("")
}

fn nonblank<'a>(env: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    env.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
}
