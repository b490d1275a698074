use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::config::AppConfig;

/// Transactional email seam. Delivery is best-effort everywhere this is
/// used; a failed send is logged, never propagated into the request.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()>;
}

/// JSON-API sender (SendGrid-shaped single message endpoint).
pub struct HttpMailer {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    from: String,
}

impl HttpMailer {
    pub fn new(api_url: String, api_key: String, from: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url,
            api_key,
            from,
        }
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "from": self.from,
                "to": to,
                "subject": subject,
                "text": body,
            }))
            .send()
            .await
            .context("email send failed")?;
        if !response.status().is_success() {
            anyhow::bail!("email sender returned {}", response.status());
        }
        Ok(())
    }
}

/// Stands in when no email integration is configured.
pub struct NoopMailer;

#[async_trait]
impl Mailer for NoopMailer {
    async fn send(&self, to: &str, subject: &str, _body: &str) -> Result<()> {
        tracing::debug!(to, subject, "email integration not configured; skipping send");
        Ok(())
    }
}

pub fn mailer_from_config(config: &AppConfig) -> std::sync::Arc<dyn Mailer> {
    match (config.email_api_url.clone(), config.email_api_key.clone()) {
        (Some(url), Some(key)) => {
            std::sync::Arc::new(HttpMailer::new(url, key, config.email_from.clone()))
        }
        _ => std::sync::Arc::new(NoopMailer),
    }
}

/// Fire-and-forget helper used by the orchestrators.
pub async fn send_best_effort(mailer: &dyn Mailer, to: &str, subject: &str, body: &str) {
    if to.is_empty() {
        return;
    }
    if let Err(e) = mailer.send(to, subject, body).await {
        tracing::warn!(?e, to, subject, "best-effort email delivery failed");
    }
}
