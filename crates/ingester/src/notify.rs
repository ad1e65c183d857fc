use std::time::Duration;

use enricher_contracts::SlackResult;

#[derive(Debug)]
pub enum NotifyError {
    Timeout,
    Request(reqwest::Error),
    Rejected(SlackResult),
}

impl std::fmt::Display for NotifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotifyError::Timeout => write!(f, "webhook request timed out"),
            NotifyError::Request(err) => write!(f, "webhook request failed: {}", err),
            NotifyError::Rejected(result) => write!(
                f,
                "webhook error: {}",
                result.error.as_deref().unwrap_or("rejected")
            ),
        }
    }
}

impl std::error::Error for NotifyError {}

impl From<reqwest::Error> for NotifyError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            NotifyError::Timeout
        } else {
            // Webhook urls carry credentials.
            NotifyError::Request(value.without_url())
        }
    }
}

/// Incoming-webhook notifier (Slack-compatible `{"text": ...}` payloads).
#[derive(Clone)]
pub struct Notifier {
    http: reqwest::Client,
}

impl Notifier {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }

    /// Success is a 2xx reply whose body is empty or `ok`.
    pub async fn post_webhook(
        &self,
        webhook_url: &str,
        message: &str,
    ) -> Result<SlackResult, NotifyError> {
        let resp = self
            .http
            .post(webhook_url)
            .json(&serde_json::json!({ "text": message }))
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?.trim().to_string();

        if status.is_success() && (text.is_empty() || text == "ok") {
            return Ok(SlackResult {
                ok: true,
                ..SlackResult::default()
            });
        }

        let error = if text.is_empty() {
            status.to_string()
        } else {
            text
        };
        Err(NotifyError::Rejected(SlackResult {
            ok: false,
            error: Some(error),
            ..SlackResult::default()
        }))
    }
}
