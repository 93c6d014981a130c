//! Warden relationship tuple reconciler.
//!
//! Retries tuple cleanups that failed after an entity was deleted, until the
//! authorization store holds no relations for the deleted object.

#![forbid(unsafe_code)]

use std::env;
use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use warden_application::TupleReconciliationService;
use warden_core::{AppError, AppResult, CancellationSignal, RequestContext};
use warden_infrastructure::{
    AuthorizationClientConfig, HttpAuthorizationClient, MIGRATOR, PostgresTupleCleanupBacklog,
};

#[derive(Debug, Clone)]
struct ReconcilerConfig {
    database_url: String,
    batch_size: usize,
    poll_interval_ms: u64,
    run_migrations: bool,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = ReconcilerConfig::load()?;
    let authorization_config = AuthorizationClientConfig::from_env()?;
    let pool = connect_pool(config.database_url.as_str()).await?;
    if config.run_migrations {
        MIGRATOR
            .run(&pool)
            .await
            .map_err(|error| AppError::Internal(format!("failed to run migrations: {error}")))?;
    }

    info!(
        api_url = %authorization_config.api_url,
        store_id = %authorization_config.store_id,
        batch_size = config.batch_size,
        poll_interval_ms = config.poll_interval_ms,
        "warden-reconciler started"
    );

    let service = TupleReconciliationService::new(
        Arc::new(HttpAuthorizationClient::new(authorization_config)?),
        Arc::new(PostgresTupleCleanupBacklog::new(pool)),
    );

    let (shutdown, signal) = CancellationSignal::pair();
    tokio::spawn(async move {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(error = %error, "failed to listen for shutdown signal");
            return;
        }
        shutdown.cancel();
    });
    let ctx = RequestContext::new().with_cancellation(signal.clone());

    loop {
        match service.reconcile_pending(&ctx, config.batch_size).await {
            Ok(report) if report.attempted > 0 => {
                info!(
                    attempted = report.attempted,
                    resolved = report.resolved,
                    failed = report.failed,
                    "reconciliation pass finished"
                );
                if report.failed == 0 && report.attempted == config.batch_size {
                    continue;
                }
            }
            Ok(_) => {}
            Err(AppError::Cancelled(_)) => break,
            Err(error) => {
                warn!(error = %error, "reconciliation pass failed");
            }
        }

        tokio::select! {
            () = signal.cancelled() => break,
            () = tokio::time::sleep(Duration::from_millis(config.poll_interval_ms)) => {}
        }
    }

    info!("warden-reconciler stopped");
    Ok(())
}

async fn connect_pool(database_url: &str) -> AppResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(2)
        .connect(database_url)
        .await
        .map_err(|error| AppError::Internal(format!("failed to connect to database: {error}")))
}

impl ReconcilerConfig {
    fn load() -> AppResult<Self> {
        let database_url = required_env("DATABASE_URL")?;
        let batch_size = parse_env_usize("RECONCILER_BATCH_SIZE", 50)?;
        let poll_interval_ms = parse_env_u64("RECONCILER_POLL_INTERVAL_MS", 5000)?;
        let run_migrations = parse_env_bool("RECONCILER_RUN_MIGRATIONS", true)?;

        if batch_size == 0 {
            return Err(AppError::Validation(
                "RECONCILER_BATCH_SIZE must be greater than zero".to_owned(),
            ));
        }

        if poll_interval_ms == 0 {
            return Err(AppError::Validation(
                "RECONCILER_POLL_INTERVAL_MS must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            database_url,
            batch_size,
            poll_interval_ms,
            run_migrations,
        })
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn required_env(name: &str) -> AppResult<String> {
    env::var(name).map_err(|_| AppError::Validation(format!("{name} is required")))
}

fn parse_env_usize(name: &str, default: usize) -> AppResult<usize> {
    match env::var(name) {
        Ok(value) => value.parse::<usize>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}

fn parse_env_u64(name: &str, default: u64) -> AppResult<u64> {
    match env::var(name) {
        Ok(value) => value.parse::<u64>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}

fn parse_env_bool(name: &str, default: bool) -> AppResult<bool> {
    match env::var(name) {
        Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            _ => Err(AppError::Validation(format!(
                "invalid {name} value '{value}': expected true or false"
            ))),
        },
        Err(_) => Ok(default),
    }
}
