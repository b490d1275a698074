use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;

/// Newly created or retrieved checkout session reference.
#[derive(Debug, Clone)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CheckoutSessionDetails {
    pub id: String,
    pub payment_status: String,
    pub customer_id: Option<String>,
    pub metadata: HashMap<String, String>,
}

/// Payment-processor seam. The HTTP implementation talks to the Stripe v1
/// API; tests substitute a mock server.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn create_customer(
        &self,
        email: &str,
        company_name: &str,
        portal_key: &str,
    ) -> Result<String>;

    async fn create_threshold_subscription(
        &self,
        customer_id: &str,
        portal_key: &str,
        lead_unit_price_cents: i64,
        lead_charge_threshold: i64,
    ) -> Result<String>;

    async fn create_checkout_session(
        &self,
        customer_id: &str,
        portal_key: &str,
        amount_cents: i64,
        description: &str,
    ) -> Result<CheckoutSession>;

    async fn retrieve_checkout_session(&self, session_id: &str) -> Result<CheckoutSessionDetails>;
}

/// Injected handle; `None` means the processor key is not configured.
pub type ProcessorHandle = Option<Arc<dyn PaymentProcessor>>;

pub struct StripeClient {
    client: reqwest::Client,
    api_base: String,
    secret_key: String,
    success_url: String,
    cancel_url: String,
}

impl StripeClient {
    pub fn new(
        api_base: String,
        secret_key: String,
        success_url: String,
        cancel_url: String,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            secret_key,
            success_url,
            cancel_url,
        }
    }

    async fn post_form(&self, path: &str, form: &[(String, String)]) -> Result<serde_json::Value> {
        let response = self
            .client
            .post(format!("{}{path}", self.api_base))
            .basic_auth(&self.secret_key, Option::<&str>::None)
            .form(form)
            .send()
            .await
            .with_context(|| format!("stripe request to {path} failed"))?;
        let status = response.status();
        let body: serde_json::Value = response
            .json()
            .await
            .with_context(|| format!("stripe response from {path} was not JSON"))?;
        if !status.is_success() {
            let message = body
                .pointer("/error/message")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown error");
            return Err(anyhow!("stripe {path} returned {status}: {message}"));
        }
        Ok(body)
    }
}

fn string_field(value: &serde_json::Value, field: &str) -> Result<String> {
    value
        .get(field)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow!("stripe response missing '{field}'"))
}

#[async_trait]
impl PaymentProcessor for StripeClient {
    async fn create_customer(
        &self,
        email: &str,
        company_name: &str,
        portal_key: &str,
    ) -> Result<String> {
        let form = vec![
            ("email".to_string(), email.to_string()),
            ("name".to_string(), company_name.to_string()),
            ("metadata[portal_key]".to_string(), portal_key.to_string()),
        ];
        let body = self.post_form("/v1/customers", &form).await?;
        string_field(&body, "id")
    }

    async fn create_threshold_subscription(
        &self,
        customer_id: &str,
        portal_key: &str,
        lead_unit_price_cents: i64,
        lead_charge_threshold: i64,
    ) -> Result<String> {
        let form = vec![
            ("customer".to_string(), customer_id.to_string()),
            (
                "items[0][price_data][currency]".to_string(),
                "usd".to_string(),
            ),
            (
                "items[0][price_data][product_data][name]".to_string(),
                "Delivered leads".to_string(),
            ),
            (
                "items[0][price_data][recurring][interval]".to_string(),
                "month".to_string(),
            ),
            (
                "items[0][price_data][recurring][usage_type]".to_string(),
                "metered".to_string(),
            ),
            (
                "items[0][price_data][unit_amount]".to_string(),
                lead_unit_price_cents.to_string(),
            ),
            ("metadata[portal_key]".to_string(), portal_key.to_string()),
            (
                "metadata[lead_charge_threshold]".to_string(),
                lead_charge_threshold.to_string(),
            ),
        ];
        let body = self.post_form("/v1/subscriptions", &form).await?;
        string_field(&body, "id")
    }

    async fn create_checkout_session(
        &self,
        customer_id: &str,
        portal_key: &str,
        amount_cents: i64,
        description: &str,
    ) -> Result<CheckoutSession> {
        let form = vec![
            ("mode".to_string(), "payment".to_string()),
            ("customer".to_string(), customer_id.to_string()),
            (
                "line_items[0][price_data][currency]".to_string(),
                "usd".to_string(),
            ),
            (
                "line_items[0][price_data][product_data][name]".to_string(),
                description.to_string(),
            ),
            (
                "line_items[0][price_data][unit_amount]".to_string(),
                amount_cents.to_string(),
            ),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            ("success_url".to_string(), self.success_url.clone()),
            ("cancel_url".to_string(), self.cancel_url.clone()),
            ("metadata[journey]".to_string(), "leadgen".to_string()),
            ("metadata[portal_key]".to_string(), portal_key.to_string()),
        ];
        let body = self.post_form("/v1/checkout/sessions", &form).await?;
        Ok(CheckoutSession {
            id: string_field(&body, "id")?,
            url: body.get("url").and_then(|v| v.as_str()).map(String::from),
        })
    }

    async fn retrieve_checkout_session(&self, session_id: &str) -> Result<CheckoutSessionDetails> {
        let response = self
            .client
            .get(format!(
                "{}/v1/checkout/sessions/{session_id}",
                self.api_base
            ))
            .basic_auth(&self.secret_key, Option::<&str>::None)
            .send()
            .await
            .context("stripe checkout session lookup failed")?;
        let status = response.status();
        let body: serde_json::Value = response
            .json()
            .await
            .context("stripe checkout session response was not JSON")?;
        if !status.is_success() {
            return Err(anyhow!("stripe checkout session lookup returned {status}"));
        }

        let metadata = body
            .get("metadata")
            .and_then(|v| v.as_object())
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        Ok(CheckoutSessionDetails {
            id: string_field(&body, "id")?,
            payment_status: string_field(&body, "payment_status")?,
            customer_id: body
                .get("customer")
                .and_then(|v| v.as_str())
                .map(String::from),
            metadata,
        })
    }
}
