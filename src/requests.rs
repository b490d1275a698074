use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::email::{self, Mailer};
use crate::error::{AppError, AppResult};
use crate::extractor::{CallerIp, OperatorAuth, PortalSession};
use crate::organizations;
use crate::ratelimit::{EndpointClass, RateLimiter};
use crate::zip;

pub const MIN_REQUEST_ZIPS: usize = 5;
pub const MAX_REQUEST_ZIPS: usize = 200;
const MAX_REASON_CHARS: usize = 500;
const MAX_RESOLUTION_NOTES_CHARS: usize = 1000;

/// Lifecycle of a territory-change request. `Pending` is the only
/// non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ZipChangeRequest {
    pub id: Uuid,
    pub portal_key: String,
    pub requested_zip_codes: Vec<String>,
    pub added_zip_codes: Vec<String>,
    pub removed_zip_codes: Vec<String>,
    pub status: String,
    pub reason: Option<String>,
    pub resolution_notes: Option<String>,
    pub requested_by: Option<String>,
    pub requested_by_email: Option<String>,
    pub resolved_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

pub async fn find_request(pool: &PgPool, id: Uuid) -> AppResult<Option<ZipChangeRequest>> {
    let request =
        sqlx::query_as::<_, ZipChangeRequest>("SELECT * FROM zip_change_requests WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;
    Ok(request)
}

/// Diff of the requested territory against a single snapshot of the current
/// one. Computed once at submit time and frozen on the request row, so the
/// two sides can never overlap.
pub fn territory_diff(requested: &[String], current: &[String]) -> (Vec<String>, Vec<String>) {
    let added = requested
        .iter()
        .filter(|zip| !current.contains(zip))
        .cloned()
        .collect();
    let removed = current
        .iter()
        .filter(|zip| !requested.contains(zip))
        .cloned()
        .collect();
    (added, removed)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    /// Array or delimited string; normalized server-side.
    pub requested_zip_codes: serde_json::Value,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub requested_by: Option<String>,
    #[serde(default)]
    pub requested_by_email: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub request_id: Uuid,
    pub status: RequestStatus,
    pub added_zip_codes: Vec<String>,
    pub removed_zip_codes: Vec<String>,
}

pub async fn submit_request(
    Extension(pool): Extension<PgPool>,
    Extension(limiter): Extension<RateLimiter>,
    session: PortalSession,
    CallerIp(ip): CallerIp,
    Json(payload): Json<SubmitRequest>,
) -> AppResult<Json<SubmitResponse>> {
    limiter.check(EndpointClass::General, &ip).await?;

    let normalized = zip::normalize_zip_input(&payload.requested_zip_codes);
    let requested = zip::require_unique_range(&normalized, MIN_REQUEST_ZIPS, MAX_REQUEST_ZIPS)?;

    if let Some(reason) = payload.reason.as_deref() {
        if reason.chars().count() > MAX_REASON_CHARS {
            return Err(AppError::Validation(format!(
                "reason exceeds {MAX_REASON_CHARS} characters"
            )));
        }
    }

    let organization = organizations::find_by_portal_key(&pool, &session.portal_key)
        .await?
        .ok_or(AppError::NotFound)?;

    let (added, removed) = territory_diff(&requested, &organization.target_zip_codes);

    let request_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO zip_change_requests (
            id, portal_key, requested_zip_codes, added_zip_codes, removed_zip_codes,
            status, reason, requested_by, requested_by_email
        ) VALUES ($1, $2, $3, $4, $5, 'pending', $6, $7, $8)
        "#,
    )
    .bind(request_id)
    .bind(&organization.portal_key)
    .bind(&requested)
    .bind(&added)
    .bind(&removed)
    .bind(&payload.reason)
    .bind(&payload.requested_by)
    .bind(&payload.requested_by_email)
    .execute(&pool)
    .await?;

    tracing::info!(
        %request_id,
        portal_key = %organization.portal_key,
        added = added.len(),
        removed = removed.len(),
        "zip change request submitted"
    );

    Ok(Json(SubmitResponse {
        request_id,
        status: RequestStatus::Pending,
        added_zip_codes: added,
        removed_zip_codes: removed,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveRequest {
    pub request_id: Uuid,
    pub decision: String,
    #[serde(default)]
    pub resolution_notes: Option<String>,
    #[serde(default)]
    pub resolved_by: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveResponse {
    pub success: bool,
    pub updated: bool,
    pub status: RequestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

pub async fn resolve_request(
    Extension(pool): Extension<PgPool>,
    Extension(limiter): Extension<RateLimiter>,
    Extension(mailer): Extension<Arc<dyn Mailer>>,
    operator: OperatorAuth,
    CallerIp(ip): CallerIp,
    Json(payload): Json<ResolveRequest>,
) -> AppResult<(StatusCode, Json<ResolveResponse>)> {
    limiter.check(EndpointClass::General, &ip).await?;

    let decision = match payload.decision.as_str() {
        "approve" => RequestStatus::Approved,
        "reject" => RequestStatus::Rejected,
        other => {
            return Err(AppError::Validation(format!(
                "decision must be 'approve' or 'reject', got '{other}'"
            )))
        }
    };

    let notes = payload
        .resolution_notes
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty());
    if decision == RequestStatus::Rejected && notes.is_none() {
        return Err(AppError::Validation(
            "resolutionNotes are required when rejecting".into(),
        ));
    }
    if let Some(notes) = notes {
        if notes.chars().count() > MAX_RESOLUTION_NOTES_CHARS {
            return Err(AppError::Validation(format!(
                "resolutionNotes exceed {MAX_RESOLUTION_NOTES_CHARS} characters"
            )));
        }
    }

    let resolved_by = payload
        .resolved_by
        .clone()
        .unwrap_or_else(|| operator.operator.clone());

    let request = find_request(&pool, payload.request_id)
        .await?
        .ok_or(AppError::NotFound)?;

    let mut tx = pool.begin().await?;

    // Compare-and-swap: the store enforces that only a pending row moves to
    // a terminal state. Zero rows affected on an existing request means it
    // was already resolved, possibly by a concurrent call.
    let swapped = sqlx::query(
        r#"
        UPDATE zip_change_requests
        SET status = $2, resolution_notes = $3, resolved_by = $4, resolved_at = NOW()
        WHERE id = $1 AND status = 'pending'
        "#,
    )
    .bind(payload.request_id)
    .bind(decision.as_str())
    .bind(notes)
    .bind(&resolved_by)
    .execute(&mut tx)
    .await?
    .rows_affected()
        == 1;

    if !swapped {
        tx.rollback().await?;
        let current = find_request(&pool, payload.request_id)
            .await?
            .ok_or(AppError::NotFound)?;
        let status = match current.status.as_str() {
            "approved" => RequestStatus::Approved,
            "rejected" => RequestStatus::Rejected,
            _ => RequestStatus::Pending,
        };
        return Ok((
            StatusCode::CONFLICT,
            Json(ResolveResponse {
                success: false,
                updated: false,
                status,
                reason: Some("already resolved".into()),
            }),
        ));
    }

    if decision == RequestStatus::Approved {
        // The frozen snapshot from submit time becomes the territory; it is
        // deliberately not recomputed here.
        sqlx::query(
            "UPDATE organizations SET target_zip_codes = $2, updated_at = NOW() WHERE portal_key = $1",
        )
        .bind(&request.portal_key)
        .bind(&request.requested_zip_codes)
        .execute(&mut tx)
        .await?;
    }

    tx.commit().await?;

    tracing::info!(
        request_id = %payload.request_id,
        portal_key = %request.portal_key,
        decision = decision.as_str(),
        resolved_by = %resolved_by,
        "zip change request resolved"
    );

    if let Some(to) = request.requested_by_email.as_deref() {
        let subject = match decision {
            RequestStatus::Approved => "Your service area change was approved",
            _ => "Your service area change was not approved",
        };
        let body = match (decision, notes) {
            (RequestStatus::Approved, _) => {
                "Your requested service area is now active.".to_string()
            }
            (_, Some(notes)) => format!("Your request was declined: {notes}"),
            (_, None) => "Your request was declined.".to_string(),
        };
        email::send_best_effort(mailer.as_ref(), to, subject, &body).await;
    }

    Ok((
        StatusCode::OK,
        Json(ResolveResponse {
            success: true,
            updated: true,
            status: decision,
            reason: None,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zips(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn diff_against_single_snapshot() {
        let requested = zips(&["75001", "75002", "75003", "75004"]);
        let current = zips(&["75001"]);
        let (added, removed) = territory_diff(&requested, &current);
        assert_eq!(added, zips(&["75002", "75003", "75004"]));
        assert!(removed.is_empty());
    }

    #[test]
    fn diff_sides_never_overlap() {
        let requested = zips(&["10001", "10002"]);
        let current = zips(&["10002", "10003"]);
        let (added, removed) = territory_diff(&requested, &current);
        assert_eq!(added, zips(&["10001"]));
        assert_eq!(removed, zips(&["10003"]));
        assert!(added.iter().all(|z| !removed.contains(z)));
    }

    #[test]
    fn identical_sets_diff_to_nothing() {
        let territory = zips(&["10001", "10002"]);
        let (added, removed) = territory_diff(&territory, &territory);
        assert!(added.is_empty());
        assert!(removed.is_empty());
    }
}
