use std::sync::Arc;

use axum::{extract::Extension, Json};
use serde::Deserialize;

use super::engine::BillingModel;
use super::provisioner::{ActivationOutcome, BillingProvisioner, ProvisionInput, ProvisionOutcome};
use super::stripe::ProcessorHandle;
use crate::config::AppConfig;
use crate::email::{self, Mailer};
use crate::error::{AppError, AppResult};
use crate::extractor::{CallerIp, InternalTool};
use crate::ratelimit::{EndpointClass, RateLimiter};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionBillingRequest {
    pub portal_key: String,
    pub company_name: String,
    pub billing_email: String,
    #[serde(default)]
    pub billing_model: Option<String>,
    #[serde(default)]
    pub lead_unit_price_cents: Option<i64>,
    #[serde(default)]
    pub lead_charge_threshold: Option<i64>,
}

pub async fn provision_billing(
    Extension(config): Extension<Arc<AppConfig>>,
    Extension(limiter): Extension<RateLimiter>,
    Extension(provisioner): Extension<BillingProvisioner>,
    Extension(processor): Extension<ProcessorHandle>,
    Extension(mailer): Extension<Arc<dyn Mailer>>,
    _tool: InternalTool,
    CallerIp(ip): CallerIp,
    Json(payload): Json<ProvisionBillingRequest>,
) -> AppResult<Json<ProvisionOutcome>> {
    limiter.check(EndpointClass::General, &ip).await?;

    if !config.billing_provisioning_enabled {
        return Err(AppError::StateConflict(
            "billing provisioning is disabled".into(),
        ));
    }
    let Some(processor) = processor else {
        return Err(AppError::Configuration("payment processor key missing".into()));
    };

    let portal_key = payload.portal_key.trim().to_string();
    if portal_key.is_empty() {
        return Err(AppError::Validation("portalKey is required".into()));
    }
    let company_name = payload.company_name.trim().to_string();
    if company_name.is_empty() {
        return Err(AppError::Validation("companyName is required".into()));
    }
    let billing_email = payload.billing_email.trim().to_string();
    if billing_email.is_empty() || !billing_email.contains('@') {
        return Err(AppError::Validation(format!(
            "billingEmail is not a usable address: '{billing_email}'"
        )));
    }

    let outcome = provisioner
        .provision(
            processor.as_ref(),
            ProvisionInput {
                portal_key,
                company_name: company_name.clone(),
                billing_email: billing_email.clone(),
                billing_model: BillingModel::parse(payload.billing_model.as_deref()),
                lead_unit_price_cents: payload.lead_unit_price_cents,
                lead_charge_threshold: payload.lead_charge_threshold,
            },
        )
        .await?;

    if let Some(url) = outcome.checkout_url.as_deref() {
        let body = format!(
            "Hi {company_name},\n\nComplete your lead generation setup here: {url}\n"
        );
        email::send_best_effort(
            mailer.as_ref(),
            &billing_email,
            "Complete your lead generation setup",
            &body,
        )
        .await;
    }

    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivateRequest {
    pub checkout_session_id: String,
}

/// Public, rate-limited fallback for missed checkout webhooks.
pub async fn activate(
    Extension(limiter): Extension<RateLimiter>,
    Extension(provisioner): Extension<BillingProvisioner>,
    Extension(processor): Extension<ProcessorHandle>,
    CallerIp(ip): CallerIp,
    Json(payload): Json<ActivateRequest>,
) -> AppResult<Json<ActivationOutcome>> {
    limiter.check(EndpointClass::General, &ip).await?;

    let Some(processor) = processor else {
        return Err(AppError::Configuration("payment processor key missing".into()));
    };
    let session_id = payload.checkout_session_id.trim();
    if session_id.is_empty() {
        return Err(AppError::Validation("checkoutSessionId is required".into()));
    }

    let outcome = provisioner.activate(processor.as_ref(), session_id).await?;
    Ok(Json(outcome))
}
