//! Slack webhook notifier
//!
//! Posts matching error rows as simple Slack messages. The webhook URL is
//! read from a file at startup so the configuration file itself can be
//! world-readable.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use tracing::debug;

use curator_core::domain::ErrorLog;
use curator_core::ports::INotifier;

/// Deadline for one webhook post
const POST_TIMEOUT: Duration = Duration::from_secs(10);

/// Slack-webhook implementation of the notifier port
pub struct SlackNotifier {
    http: reqwest::Client,
    url: String,
    /// Site name prefixed to every message
    site: String,
}

impl SlackNotifier {
    /// Creates a notifier reading the webhook URL from `url_file`
    pub fn from_url_file(url_file: &Path, site: impl Into<String>) -> anyhow::Result<Self> {
        let url = std::fs::read_to_string(url_file)
            .with_context(|| format!("cannot read webhook url file {}", url_file.display()))?
            .trim()
            .to_string();
        if url.is_empty() {
            anyhow::bail!("webhook url file {} is empty", url_file.display());
        }
        Ok(Self::new(url, site))
    }

    /// Creates a notifier with an explicit URL (tests)
    pub fn new(url: impl Into<String>, site: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(POST_TIMEOUT)
            .build()
            .expect("reqwest client construction cannot fail with static options");
        Self {
            http,
            url: url.into(),
            site: site.into(),
        }
    }
}

#[async_trait::async_trait]
impl INotifier for SlackNotifier {
    async fn notify_error(&self, row: &ErrorLog) -> anyhow::Result<()> {
        let text = format!(
            "[{}] {} / {}: {}",
            self.site,
            row.severity.as_str(),
            row.category.as_str(),
            row.message
        );
        let response = self
            .http
            .post(&self.url)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await
            .context("webhook post failed")?;
        if !response.status().is_success() {
            anyhow::bail!("webhook returned status {}", response.status());
        }
        debug!("Forwarded error row to webhook");
        Ok(())
    }
}
