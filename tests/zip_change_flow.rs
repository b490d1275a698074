use std::sync::Arc;

use axum::{http::StatusCode, Extension, Json};
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use leadgen_backend::conflicts::{check_conflicts, CheckConflictsRequest, RegistryHandle};
use leadgen_backend::email::{Mailer, NoopMailer};
use leadgen_backend::extractor::{CallerIp, OperatorAuth, PortalSession};
use leadgen_backend::ratelimit::RateLimiter;
use leadgen_backend::requests::{
    resolve_request, submit_request, ResolveRequest, SubmitRequest,
};

async fn seed_org(pool: &PgPool, portal_key: &str, zips: &[&str]) {
    let zips: Vec<String> = zips.iter().map(|s| s.to_string()).collect();
    sqlx::query(
        "INSERT INTO organizations (portal_key, business_name, target_zip_codes, lead_delivery_emails) VALUES ($1, $2, $3, ARRAY['owner@example.com'])",
    )
    .bind(portal_key)
    .bind("Acme Roofing")
    .bind(&zips)
    .execute(pool)
    .await
    .unwrap();
}

fn mailer() -> Arc<dyn Mailer> {
    Arc::new(NoopMailer)
}

// key: zip-change-tests -> submit diff freezing
#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn submit_freezes_diff_against_current_territory(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    seed_org(&pool, "acme-roofing", &["75001"]).await;

    let Json(response) = submit_request(
        Extension(pool.clone()),
        Extension(RateLimiter::new(pool.clone())),
        PortalSession {
            portal_key: "acme-roofing".into(),
        },
        CallerIp("1.2.3.4".into()),
        Json(SubmitRequest {
            requested_zip_codes: json!(["75001", "75001", "75002", "75003", "75004", "75005"]),
            reason: Some("expanding north".into()),
            requested_by: Some("Pat".into()),
            requested_by_email: Some("pat@example.com".into()),
        }),
    )
    .await
    .expect("submit should succeed");

    assert_eq!(
        response.added_zip_codes,
        vec!["75002", "75003", "75004", "75005"]
    );
    assert!(response.removed_zip_codes.is_empty());

    let stored: Vec<String> = sqlx::query_scalar(
        "SELECT unnest(requested_zip_codes) FROM zip_change_requests WHERE id = $1",
    )
    .bind(response.request_id)
    .fetch_all(&pool)
    .await
    .unwrap();
    assert_eq!(stored.len(), 5, "duplicates collapse before persisting");
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn invalid_submission_writes_nothing(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    seed_org(&pool, "acme-roofing", &["75001"]).await;

    // Too few unique codes.
    let err = submit_request(
        Extension(pool.clone()),
        Extension(RateLimiter::new(pool.clone())),
        PortalSession {
            portal_key: "acme-roofing".into(),
        },
        CallerIp("1.2.3.4".into()),
        Json(SubmitRequest {
            requested_zip_codes: json!(["75001", "75001", "75002", "75003", "75004"]),
            reason: None,
            requested_by: None,
            requested_by_email: None,
        }),
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("at least 5"));

    // A malformed code anywhere fails the whole request.
    let err = submit_request(
        Extension(pool.clone()),
        Extension(RateLimiter::new(pool.clone())),
        PortalSession {
            portal_key: "acme-roofing".into(),
        },
        CallerIp("1.2.3.4".into()),
        Json(SubmitRequest {
            requested_zip_codes: json!(["75001", "75002", "75003", "75004", "7500x"]),
            reason: None,
            requested_by: None,
            requested_by_email: None,
        }),
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("7500x"));

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM zip_change_requests")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 0, "no partial write on validation failure");
}

// key: zip-change-tests -> resolve at-most-once
#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn resolve_is_at_most_once(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    seed_org(&pool, "acme-roofing", &["75001"]).await;

    let Json(submitted) = submit_request(
        Extension(pool.clone()),
        Extension(RateLimiter::new(pool.clone())),
        PortalSession {
            portal_key: "acme-roofing".into(),
        },
        CallerIp("1.2.3.4".into()),
        Json(SubmitRequest {
            requested_zip_codes: json!(["75001", "75002", "75003", "75004", "75005"]),
            reason: None,
            requested_by: None,
            requested_by_email: Some("pat@example.com".into()),
        }),
    )
    .await
    .unwrap();

    let approve = |pool: PgPool, id: Uuid| {
        resolve_request(
            Extension(pool.clone()),
            Extension(RateLimiter::new(pool)),
            Extension(mailer()),
            OperatorAuth {
                operator: "ops".into(),
            },
            CallerIp("10.0.0.1".into()),
            Json(ResolveRequest {
                request_id: id,
                decision: "approve".into(),
                resolution_notes: None,
                resolved_by: Some("ops".into()),
            }),
        )
    };

    let (status, Json(first)) = approve(pool.clone(), submitted.request_id).await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert!(first.updated);

    let (status, Json(second)) = approve(pool.clone(), submitted.request_id).await.unwrap();
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(!second.updated);
    assert_eq!(second.reason.as_deref(), Some("already resolved"));

    // Approval replaced the territory with the frozen snapshot.
    let territory: Vec<String> = sqlx::query_scalar(
        "SELECT unnest(target_zip_codes) FROM organizations WHERE portal_key = 'acme-roofing'",
    )
    .fetch_all(&pool)
    .await
    .unwrap();
    assert_eq!(
        territory,
        vec!["75001", "75002", "75003", "75004", "75005"]
    );
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn reject_requires_notes_and_leaves_territory_alone(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    seed_org(&pool, "acme-roofing", &["75001"]).await;

    let Json(submitted) = submit_request(
        Extension(pool.clone()),
        Extension(RateLimiter::new(pool.clone())),
        PortalSession {
            portal_key: "acme-roofing".into(),
        },
        CallerIp("1.2.3.4".into()),
        Json(SubmitRequest {
            requested_zip_codes: json!(["75002", "75003", "75004", "75005", "75006"]),
            reason: None,
            requested_by: None,
            requested_by_email: None,
        }),
    )
    .await
    .unwrap();

    let err = resolve_request(
        Extension(pool.clone()),
        Extension(RateLimiter::new(pool.clone())),
        Extension(mailer()),
        OperatorAuth {
            operator: "ops".into(),
        },
        CallerIp("10.0.0.1".into()),
        Json(ResolveRequest {
            request_id: submitted.request_id,
            decision: "reject".into(),
            resolution_notes: None,
            resolved_by: None,
        }),
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("resolutionNotes"));

    let (status, Json(rejected)) = resolve_request(
        Extension(pool.clone()),
        Extension(RateLimiter::new(pool.clone())),
        Extension(mailer()),
        OperatorAuth {
            operator: "ops".into(),
        },
        CallerIp("10.0.0.1".into()),
        Json(ResolveRequest {
            request_id: submitted.request_id,
            decision: "reject".into(),
            resolution_notes: Some("territory already saturated".into()),
            resolved_by: None,
        }),
    )
    .await
    .unwrap();
    assert_eq!(status, StatusCode::OK);
    assert!(rejected.updated);

    let territory: Vec<String> = sqlx::query_scalar(
        "SELECT unnest(target_zip_codes) FROM organizations WHERE portal_key = 'acme-roofing'",
    )
    .fetch_all(&pool)
    .await
    .unwrap();
    assert_eq!(territory, vec!["75001"], "reject mutates only the request");
}

// key: zip-change-tests -> conflict check transport
#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn unconfigured_registry_reports_unchecked(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    seed_org(&pool, "acme-roofing", &["75001"]).await;

    let Json(submitted) = submit_request(
        Extension(pool.clone()),
        Extension(RateLimiter::new(pool.clone())),
        PortalSession {
            portal_key: "acme-roofing".into(),
        },
        CallerIp("1.2.3.4".into()),
        Json(SubmitRequest {
            requested_zip_codes: json!(["75001", "75002", "75003", "75004", "75005"]),
            reason: None,
            requested_by: None,
            requested_by_email: None,
        }),
    )
    .await
    .unwrap();

    let registry: RegistryHandle = None;
    let (status, Json(result)) = check_conflicts(
        Extension(pool.clone()),
        Extension(RateLimiter::new(pool.clone())),
        Extension(registry),
        OperatorAuth {
            operator: "ops".into(),
        },
        CallerIp("10.0.0.1".into()),
        Json(CheckConflictsRequest {
            request_id: submitted.request_id,
        }),
    )
    .await
    .unwrap();

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(!result.checked);
    assert_eq!(result.reason.as_deref(), Some("crm registry not configured"));
    assert!(!result.conflict, "unchecked is never 'no conflicts'");
}
