use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use axum_prometheus::PrometheusMetricLayer;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{fmt, EnvFilter};

use leadgen_backend::billing::{BillingProvisioner, ProcessorHandle, StripeClient};
use leadgen_backend::config::AppConfig;
use leadgen_backend::conflicts::{HttpCrmRegistry, RegistryHandle};
use leadgen_backend::email::{mailer_from_config, Mailer};
use leadgen_backend::ratelimit::RateLimiter;
use leadgen_backend::routes::api_routes;

async fn root() -> &'static str {
    "Leadgen API"
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    dotenvy::dotenv().ok();
    // Fail fast on missing or invalid required configuration.
    let config = Arc::new(AppConfig::from_env()?);

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;

    if let Err(error) = sqlx::migrate!().run(&pool).await {
        if config.allow_migration_failure {
            tracing::warn!(
                ?error,
                "Database migrations failed but continuing due to ALLOW_MIGRATION_FAILURE"
            );
        } else {
            return Err(Box::new(error) as Box<dyn std::error::Error>);
        }
    }

    let registry: RegistryHandle = match (
        config.crm_registry_url.as_deref(),
        config.crm_registry_key.clone(),
    ) {
        (Some(url), Some(key)) => Some(Arc::new(HttpCrmRegistry::new(url, key)?)),
        _ => {
            if config.environment.is_production() {
                tracing::error!("CRM registry is not configured; conflict checks cannot run");
            } else {
                tracing::warn!("CRM registry is not configured; conflict checks will report so");
            }
            None
        }
    };

    let processor: ProcessorHandle = config.stripe_secret_key.clone().map(|key| {
        Arc::new(StripeClient::new(
            config.stripe_api_base.clone(),
            key,
            config.checkout_success_url.clone(),
            config.checkout_cancel_url.clone(),
        )) as Arc<dyn leadgen_backend::billing::PaymentProcessor>
    });
    if processor.is_none() && config.billing_provisioning_enabled {
        tracing::error!("billing provisioning enabled but STRIPE_SECRET_KEY is missing");
    }

    let mailer: Arc<dyn Mailer> = mailer_from_config(&config);
    let limiter = RateLimiter::new(pool.clone());
    limiter.start_prune_worker();
    let provisioner = BillingProvisioner::new(pool.clone());

    let (prometheus_layer, metrics_handle) = PrometheusMetricLayer::pair();
    let app = Router::new()
        .route("/", get(root))
        .route(
            "/metrics",
            get(move || async move { metrics_handle.render() }),
        )
        .merge(api_routes())
        .layer(prometheus_layer)
        .layer(Extension(pool.clone()))
        .layer(Extension(config.clone()))
        .layer(Extension(limiter))
        .layer(Extension(provisioner))
        .layer(Extension(processor))
        .layer(Extension(registry))
        .layer(Extension(mailer));

    let addr: SocketAddr = format!("{}:{}", config.bind_address, config.bind_port)
        .parse()
        .map_err(|error| Box::new(error) as Box<dyn std::error::Error>)?;
    tracing::info!(%addr, "Listening for incoming connections");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
