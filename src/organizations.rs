use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};

use crate::error::AppResult;

/// One row per client portal. Territory and billing identifiers are mutated
/// only by approved change requests and billing provisioning.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Organization {
    pub portal_key: String,
    pub business_name: String,
    pub target_zip_codes: Vec<String>,
    pub lead_delivery_phones: Vec<String>,
    pub lead_delivery_emails: Vec<String>,
    pub billing_model: Option<String>,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub leadgen_paid: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub async fn find_by_portal_key(
    pool: &PgPool,
    portal_key: &str,
) -> AppResult<Option<Organization>> {
    let org = sqlx::query_as::<_, Organization>(
        "SELECT * FROM organizations WHERE portal_key = $1",
    )
    .bind(portal_key)
    .fetch_optional(pool)
    .await?;
    Ok(org)
}
