use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

use crate::error::{AppError, AppResult};

/// Endpoint classes with independent sliding windows and budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointClass {
    /// Credential exchanges.
    Auth,
    /// Registry-backed or otherwise costly lookups.
    Expensive,
    /// Everything else.
    General,
}

impl EndpointClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointClass::Auth => "auth",
            EndpointClass::Expensive => "expensive",
            EndpointClass::General => "general",
        }
    }

    pub fn window_secs(&self) -> i64 {
        60
    }

    pub fn budget(&self) -> i64 {
        match self {
            EndpointClass::Auth => 5,
            EndpointClass::Expensive => 10,
            EndpointClass::General => 60,
        }
    }
}

pub fn bucket_key(class: EndpointClass, ip: &str) -> String {
    format!("{}:{}", class.as_str(), ip)
}

/// Twice the largest class window; anything older is invisible to every
/// admission check and safe to drop.
const PRUNE_HORIZON_SECS: i64 = 120;

const PRUNE_INTERVAL_SECS: u64 = 300;

/// Sliding-window admission control backed by the store, so concurrent
/// requests from the same caller cannot exceed the budget by more than one
/// in-flight slot. No in-process counters.
#[derive(Clone)]
pub struct RateLimiter {
    pool: PgPool,
}

impl RateLimiter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Admits or rejects one request. Rejections carry the remaining quota
    /// (zero) and a retry hint derived from the oldest in-window hit.
    ///
    /// Count-then-insert runs under a per-bucket advisory lock so concurrent
    /// callers at the budget boundary serialize instead of all reading the
    /// same stale count. The lock is released at commit.
    pub async fn check(&self, class: EndpointClass, ip: &str) -> AppResult<()> {
        let bucket = bucket_key(class, ip);
        let cutoff = Utc::now() - Duration::seconds(class.window_secs());

        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&bucket)
            .execute(&mut tx)
            .await?;

        // Opportunistic prune; expired hits also fall out of the count below.
        sqlx::query("DELETE FROM rate_limit_hits WHERE bucket = $1 AND hit_at < $2")
            .bind(&bucket)
            .bind(cutoff)
            .execute(&mut tx)
            .await?;

        let in_window: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM rate_limit_hits WHERE bucket = $1 AND hit_at >= $2",
        )
        .bind(&bucket)
        .bind(cutoff)
        .fetch_one(&mut tx)
        .await?;

        if in_window < class.budget() {
            sqlx::query("INSERT INTO rate_limit_hits (bucket, hit_at) VALUES ($1, NOW())")
                .bind(&bucket)
                .execute(&mut tx)
                .await?;
            tx.commit().await?;
            return Ok(());
        }

        let oldest: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT MIN(hit_at) FROM rate_limit_hits WHERE bucket = $1 AND hit_at >= $2",
        )
        .bind(&bucket)
        .bind(cutoff)
        .fetch_one(&mut tx)
        .await?;
        tx.commit().await?;

        let retry_after_secs = oldest
            .map(|t| {
                let free_at = t + Duration::seconds(class.window_secs());
                (free_at - Utc::now()).num_seconds().max(1) as u64
            })
            .unwrap_or(class.window_secs() as u64);

        tracing::warn!(bucket, class = class.as_str(), "rate limit exceeded");
        Err(AppError::RateLimited {
            retry_after_secs,
            remaining: 0,
        })
    }

    /// Deletes hits older than the largest window across every bucket.
    /// Per-bucket pruning in `check` only touches buckets that stay active;
    /// this sweep keeps one-off buckets from accumulating forever.
    pub async fn prune_expired(&self) -> AppResult<u64> {
        let cutoff = Utc::now() - Duration::seconds(PRUNE_HORIZON_SECS);
        let removed = sqlx::query("DELETE FROM rate_limit_hits WHERE hit_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(removed)
    }

    /// Background sweep of expired hits on a fixed interval.
    pub fn start_prune_worker(&self) {
        let limiter = self.clone();
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(PRUNE_INTERVAL_SECS));
            loop {
                ticker.tick().await;
                match limiter.prune_expired().await {
                    Ok(removed) if removed > 0 => {
                        tracing::debug!(removed, "pruned expired rate-limit hits");
                    }
                    Ok(_) => {}
                    Err(error) => {
                        tracing::warn!(?error, "rate-limit prune sweep failed");
                    }
                }
            }
        });
    }
}
