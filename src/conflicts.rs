use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{extract::Extension, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use url::Url;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::extractor::{CallerIp, OperatorAuth};
use crate::ratelimit::{EndpointClass, RateLimiter};
use crate::requests;

/// Maximum raw conflict entries echoed back to the operator; the full count
/// is reported separately so large conflict sets stay bounded.
pub const CONFLICT_PREVIEW_LIMIT: usize = 20;

/// One zip code claimed by some client's territory, as reported by the CRM
/// registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerritoryClaim {
    pub zip_code: String,
    pub portal_key: String,
    #[serde(default)]
    pub business_name: Option<String>,
}

/// CRM registry seam. The registry is the authority on which client claims
/// which territory.
#[async_trait]
pub trait CrmRegistry: Send + Sync {
    async fn claims_for_zips(&self, zip_codes: &[String]) -> Result<Vec<TerritoryClaim>>;
}

/// Injected handle; `None` means the integration is not configured.
pub type RegistryHandle = Option<Arc<dyn CrmRegistry>>;

pub struct HttpCrmRegistry {
    client: reqwest::Client,
    search_url: Url,
    api_key: String,
}

impl HttpCrmRegistry {
    pub fn new(base_url: &str, api_key: String) -> Result<Self> {
        let search_url = Url::parse(base_url)
            .context("invalid CRM registry URL")?
            .join("territory-claims/search")
            .context("invalid CRM registry URL")?;
        Ok(Self {
            client: reqwest::Client::new(),
            search_url,
            api_key,
        })
    }
}

#[async_trait]
impl CrmRegistry for HttpCrmRegistry {
    async fn claims_for_zips(&self, zip_codes: &[String]) -> Result<Vec<TerritoryClaim>> {
        let response = self
            .client
            .post(self.search_url.clone())
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "zipCodes": zip_codes }))
            .send()
            .await
            .context("CRM registry request failed")?;
        if !response.status().is_success() {
            anyhow::bail!("CRM registry returned {}", response.status());
        }
        response
            .json::<Vec<TerritoryClaim>>()
            .await
            .context("CRM registry returned malformed claims")
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictCheckResult {
    /// `false` means the check itself could not run; never to be read as
    /// "no conflicts".
    pub checked: bool,
    pub conflict: bool,
    pub conflicting_zip_codes: Vec<String>,
    pub conflicts: Vec<TerritoryClaim>,
    pub conflict_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ConflictCheckResult {
    pub fn unchecked(reason: &str) -> Self {
        Self {
            checked: false,
            conflict: false,
            conflicting_zip_codes: Vec::new(),
            conflicts: Vec::new(),
            conflict_count: 0,
            reason: Some(reason.to_string()),
        }
    }
}

/// Reduces raw registry claims to the conflict set for one portal: other
/// clients only, requested additions only, zips deduped and sorted for
/// deterministic display, raw list capped at the preview limit.
pub fn detect_conflicts(
    own_portal_key: &str,
    added_zip_codes: &[String],
    claims: Vec<TerritoryClaim>,
) -> ConflictCheckResult {
    let relevant: Vec<TerritoryClaim> = claims
        .into_iter()
        .filter(|claim| claim.portal_key != own_portal_key)
        .filter(|claim| added_zip_codes.contains(&claim.zip_code))
        .collect();

    let conflicting_zip_codes: Vec<String> = relevant
        .iter()
        .map(|claim| claim.zip_code.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let conflict_count = relevant.len();
    let conflicts = relevant
        .into_iter()
        .take(CONFLICT_PREVIEW_LIMIT)
        .collect::<Vec<_>>();

    ConflictCheckResult {
        checked: true,
        conflict: !conflicting_zip_codes.is_empty(),
        conflicting_zip_codes,
        conflicts,
        conflict_count,
        reason: None,
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckConflictsRequest {
    pub request_id: Uuid,
}

pub async fn check_conflicts(
    Extension(pool): Extension<PgPool>,
    Extension(limiter): Extension<RateLimiter>,
    Extension(registry): Extension<RegistryHandle>,
    _operator: OperatorAuth,
    CallerIp(ip): CallerIp,
    Json(payload): Json<CheckConflictsRequest>,
) -> AppResult<(StatusCode, Json<ConflictCheckResult>)> {
    limiter.check(EndpointClass::Expensive, &ip).await?;

    let request = requests::find_request(&pool, payload.request_id)
        .await?
        .ok_or(AppError::NotFound)?;
    if request.status != "pending" {
        return Err(AppError::StateConflict(format!(
            "request is {}, conflict checks apply to pending requests only",
            request.status
        )));
    }

    // Codes the portal already owns need no conflict check.
    if request.added_zip_codes.is_empty() {
        return Ok((
            StatusCode::OK,
            Json(detect_conflicts(&request.portal_key, &[], Vec::new())),
        ));
    }

    let Some(registry) = registry else {
        tracing::error!("conflict check requested but CRM registry is not configured");
        return Ok((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ConflictCheckResult::unchecked("crm registry not configured")),
        ));
    };

    let claims = match registry.claims_for_zips(&request.added_zip_codes).await {
        Ok(claims) => claims,
        Err(e) => {
            tracing::error!(?e, request_id = %payload.request_id, "CRM registry call failed");
            return Ok((
                StatusCode::BAD_GATEWAY,
                Json(ConflictCheckResult::unchecked("crm registry call failed")),
            ));
        }
    };

    let result = detect_conflicts(&request.portal_key, &request.added_zip_codes, claims);
    Ok((StatusCode::OK, Json(result)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claim(zip: &str, portal: &str) -> TerritoryClaim {
        TerritoryClaim {
            zip_code: zip.to_string(),
            portal_key: portal.to_string(),
            business_name: Some(format!("{portal} LLC")),
        }
    }

    fn zips(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn own_claims_are_ignored() {
        let result = detect_conflicts(
            "acme",
            &zips(&["75001", "75002"]),
            vec![claim("75001", "acme"), claim("75002", "rival")],
        );
        assert_eq!(result.conflicting_zip_codes, zips(&["75002"]));
        assert!(result.conflict);
        assert!(result.checked);
    }

    #[test]
    fn zips_deduped_and_sorted() {
        let result = detect_conflicts(
            "acme",
            &zips(&["75003", "75001"]),
            vec![
                claim("75003", "rival-a"),
                claim("75001", "rival-b"),
                claim("75003", "rival-c"),
            ],
        );
        assert_eq!(result.conflicting_zip_codes, zips(&["75001", "75003"]));
        assert_eq!(result.conflict_count, 3);
    }

    #[test]
    fn raw_list_capped_with_full_count() {
        let claims: Vec<TerritoryClaim> = (0..30)
            .map(|i| claim("75001", &format!("rival-{i}")))
            .collect();
        let result = detect_conflicts("acme", &zips(&["75001"]), claims);
        assert_eq!(result.conflicts.len(), CONFLICT_PREVIEW_LIMIT);
        assert_eq!(result.conflict_count, 30);
    }

    #[test]
    fn claims_outside_added_set_ignored() {
        let result = detect_conflicts(
            "acme",
            &zips(&["75001"]),
            vec![claim("99999", "rival")],
        );
        assert!(!result.conflict);
        assert!(result.conflicting_zip_codes.is_empty());
        assert_eq!(result.conflict_count, 0);
    }

    #[test]
    fn no_additions_means_clean_check() {
        let result = detect_conflicts("acme", &[], Vec::new());
        assert!(result.checked);
        assert!(!result.conflict);
    }
}
