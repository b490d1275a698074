use serde::Serialize;
use sqlx::PgPool;

use super::engine::{self, BillingModel};
use super::stripe::PaymentProcessor;
use crate::error::{AppError, AppResult};
use crate::organizations;

/// Metadata tag stamped on leadgen checkout sessions; activation refuses
/// sessions from any other journey.
pub const LEADGEN_JOURNEY_TAG: &str = "leadgen";

#[derive(Debug, Clone)]
pub struct ProvisionInput {
    pub portal_key: String,
    pub company_name: String,
    pub billing_email: String,
    pub billing_model: BillingModel,
    pub lead_unit_price_cents: Option<i64>,
    pub lead_charge_threshold: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionOutcome {
    pub portal_key: String,
    pub billing_model: BillingModel,
    pub stripe_customer_id: String,
    pub stripe_subscription_id: String,
    pub checkout_session_id: String,
    pub checkout_url: Option<String>,
    pub initial_charge_cents: i64,
    pub lead_charge_threshold: i64,
    pub reused_customer: bool,
    pub reused_subscription: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationOutcome {
    pub portal_key: String,
    pub activated: bool,
    pub already_active: bool,
}

/// Drives payment-processor provisioning for one portal. Idempotent per
/// `portal_key`: stored processor identifiers are reused before anything is
/// created, so concurrent retries cannot mint duplicate customers.
#[derive(Clone)]
pub struct BillingProvisioner {
    pool: PgPool,
}

impl BillingProvisioner {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn provision(
        &self,
        processor: &dyn PaymentProcessor,
        input: ProvisionInput,
    ) -> AppResult<ProvisionOutcome> {
        let defaults = engine::defaults_for(input.billing_model, input.lead_unit_price_cents);
        let lead_charge_threshold = input
            .lead_charge_threshold
            .filter(|v| *v > 0)
            .unwrap_or(defaults.lead_charge_threshold);

        // Onboarding may reach billing before any other record exists for
        // the portal; the row is created here in that case.
        sqlx::query(
            r#"
            INSERT INTO organizations (portal_key, business_name, lead_delivery_emails, billing_model)
            VALUES ($1, $2, ARRAY[$3], $4)
            ON CONFLICT (portal_key)
            DO UPDATE SET business_name = EXCLUDED.business_name,
                          billing_model = EXCLUDED.billing_model,
                          updated_at = NOW()
            "#,
        )
        .bind(&input.portal_key)
        .bind(&input.company_name)
        .bind(&input.billing_email)
        .bind(input.billing_model.as_str())
        .execute(&self.pool)
        .await?;

        let organization = organizations::find_by_portal_key(&self.pool, &input.portal_key)
            .await?
            .ok_or(AppError::NotFound)?;

        let (customer_id, reused_customer) = match organization.stripe_customer_id.clone() {
            Some(existing) => (existing, true),
            None => {
                let created = processor
                    .create_customer(&input.billing_email, &input.company_name, &input.portal_key)
                    .await
                    .map_err(|e| AppError::Upstream(format!("customer creation failed: {e}")))?;
                sqlx::query(
                    "UPDATE organizations SET stripe_customer_id = $2, updated_at = NOW() WHERE portal_key = $1",
                )
                .bind(&input.portal_key)
                .bind(&created)
                .execute(&self.pool)
                .await?;
                (created, false)
            }
        };

        let (subscription_id, reused_subscription) =
            match organization.stripe_subscription_id.clone() {
                Some(existing) => (existing, true),
                None => {
                    let created = processor
                        .create_threshold_subscription(
                            &customer_id,
                            &input.portal_key,
                            defaults.lead_unit_price_cents,
                            lead_charge_threshold,
                        )
                        .await
                        .map_err(|e| {
                            AppError::Upstream(format!("subscription creation failed: {e}"))
                        })?;
                    sqlx::query(
                        "UPDATE organizations SET stripe_subscription_id = $2, updated_at = NOW() WHERE portal_key = $1",
                    )
                    .bind(&input.portal_key)
                    .bind(&created)
                    .execute(&self.pool)
                    .await?;
                    (created, false)
                }
            };

        let description = format!(
            "Lead generation setup ({})",
            input.billing_model.as_str().replace('_', " ")
        );
        let checkout = processor
            .create_checkout_session(
                &customer_id,
                &input.portal_key,
                defaults.initial_charge_cents,
                &description,
            )
            .await
            .map_err(|e| AppError::Upstream(format!("checkout session creation failed: {e}")))?;

        tracing::info!(
            portal_key = %input.portal_key,
            billing_model = input.billing_model.as_str(),
            reused_customer,
            reused_subscription,
            initial_charge_cents = defaults.initial_charge_cents,
            "billing provisioned"
        );

        Ok(ProvisionOutcome {
            portal_key: input.portal_key,
            billing_model: input.billing_model,
            stripe_customer_id: customer_id,
            stripe_subscription_id: subscription_id,
            checkout_session_id: checkout.id,
            checkout_url: checkout.url,
            initial_charge_cents: defaults.initial_charge_cents,
            lead_charge_threshold,
            reused_customer,
            reused_subscription,
        })
    }

    /// Webhook-equivalent fallback: verifies a completed checkout session
    /// and advances the paid flag. Safe to call repeatedly for the same
    /// session.
    pub async fn activate(
        &self,
        processor: &dyn PaymentProcessor,
        checkout_session_id: &str,
    ) -> AppResult<ActivationOutcome> {
        let details = processor
            .retrieve_checkout_session(checkout_session_id)
            .await
            .map_err(|e| AppError::Upstream(format!("checkout session lookup failed: {e}")))?;

        if details.metadata.get("journey").map(String::as_str) != Some(LEADGEN_JOURNEY_TAG) {
            return Err(AppError::Validation(
                "checkout session does not belong to the leadgen journey".into(),
            ));
        }
        if details.payment_status != "paid" {
            return Err(AppError::StateConflict(format!(
                "checkout session payment status is '{}', expected 'paid'",
                details.payment_status
            )));
        }
        let portal_key = details
            .metadata
            .get("portal_key")
            .cloned()
            .ok_or_else(|| AppError::Validation("checkout session missing portal key".into()))?;

        let advanced = sqlx::query(
            "UPDATE organizations SET leadgen_paid = TRUE, updated_at = NOW() WHERE portal_key = $1 AND leadgen_paid = FALSE",
        )
        .bind(&portal_key)
        .execute(&self.pool)
        .await?
        .rows_affected()
            == 1;

        if advanced {
            tracing::info!(%portal_key, session_id = details.id, "leadgen activated");
            return Ok(ActivationOutcome {
                portal_key,
                activated: true,
                already_active: false,
            });
        }

        let exists = organizations::find_by_portal_key(&self.pool, &portal_key)
            .await?
            .is_some();
        if !exists {
            return Err(AppError::NotFound);
        }
        Ok(ActivationOutcome {
            portal_key,
            activated: false,
            already_active: true,
        })
    }
}
