//! Tick Ingestor Binary
//!
//! Runs one ingestion session: from credential lookup to the market-close
//! cutoff.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin tick-ingestor
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `KITE_API_KEY`: broker API key
//! - `DATABASE_URL`: PostgreSQL URL of the daily store
//!
//! ## Optional
//! - `KITE_ACCESS_TOKEN`: use this token instead of the token table
//! - `MARKET_CLOSE`: `HH:MM` exchange-local cutoff (default: 15:30)
//! - `INGESTOR_HEALTH_PORT`: Health check HTTP port (default: 8083, 0 disables)
//! - `NOTIFY_WEBHOOK_URL`: operator webhook (default: log only)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `RUST_LOG`: Log filter (default: `tick_ingestor=info`)

use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tick_ingestor::application::ports::{
    Clock, IngestMetrics, Notifier, SessionProvider, SystemClock, TickStore,
};
use tick_ingestor::application::services::{
    BatchProcessor, SessionConfig, SessionController, SessionMonitor,
};
use tick_ingestor::infrastructure::catalog::load_catalog;
use tick_ingestor::infrastructure::config::IngestorConfig;
use tick_ingestor::infrastructure::health::{HealthServer, HealthServerState};
use tick_ingestor::infrastructure::kite::{
    HeartbeatConfig, KiteClientConfig, KiteTickerClient, ReconnectConfig,
};
use tick_ingestor::infrastructure::notify::{TracingNotifier, WebhookNotifier};
use tick_ingestor::infrastructure::persistence::{
    PostgresSessionProvider, PostgresTickStore, StaticSessionProvider,
};
use tick_ingestor::infrastructure::{metrics, telemetry};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting tick ingestor");

    if let Err(e) = metrics::init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder unavailable");
    }

    let config = IngestorConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();
    tokio::spawn(await_shutdown(shutdown_token.clone()));

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let cutoff = config.session.cutoff_for(clock.now());

    // Stores
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await
        .context("cannot connect to the daily store")?;
    let store = PostgresTickStore::new(
        pool.clone(),
        &config.database.daily_schema,
        &config.database.daily_table,
    );
    if config.database.create_schema {
        store.ensure_schema().await.context("cannot prepare the daily table")?;
    }
    let store: Arc<dyn TickStore> = Arc::new(store);

    let provider: Arc<dyn SessionProvider> = if let Some(token) = config.access_token.clone() {
        tracing::info!("Using access token from environment");
        Arc::new(StaticSessionProvider::new(token))
    } else {
        let token_pool = if config.database.token_url == config.database.url {
            pool.clone()
        } else {
            PgPoolOptions::new()
                .max_connections(1)
                .connect_lazy(&config.database.token_url)
                .context("invalid token store URL")?
        };
        Arc::new(PostgresSessionProvider::new(
            token_pool,
            &config.database.token_schema,
        ))
    };

    // Catalog
    let catalog = Arc::new(load_catalog(&config.catalog).context("cannot load lookup tables")?);

    // Notifications
    let notifier: Arc<dyn Notifier> = match &config.notify_webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url).context("cannot build webhook client")?),
        None => Arc::new(TracingNotifier),
    };

    // Health server
    let monitor = Arc::new(SessionMonitor::new());
    if config.server.health_port == 0 {
        tracing::info!("Health server disabled");
    } else {
        let health_state = Arc::new(HealthServerState::new(
            env!("CARGO_PKG_VERSION"),
            Arc::clone(&monitor),
        ));
        let health_server =
            HealthServer::new(config.server.health_port, health_state, shutdown_token.clone());
        tokio::spawn(async move {
            if let Err(e) = health_server.run().await {
                tracing::error!(error = %e, "Health server error");
            }
        });
    }

    // Feed
    let feed = KiteTickerClient::new(KiteClientConfig {
        reconnect: ReconnectConfig::from_feed_settings(&config.feed),
        heartbeat: HeartbeatConfig {
            timeout: config.feed.heartbeat_timeout,
            ..HeartbeatConfig::default()
        },
        ..KiteClientConfig::new(
            config.feed.ws_url.clone(),
            config.api_key.clone(),
            config.session.exchange_offset,
        )
    });

    let ingest_metrics: Arc<dyn IngestMetrics> = Arc::new(metrics::PrometheusMetrics);
    let processor = BatchProcessor::new(
        catalog,
        store,
        Arc::clone(&notifier),
        config.session.batch_retry,
    )
    .with_metrics(Arc::clone(&ingest_metrics));
    let session_config = SessionConfig {
        shutdown_grace: config.session.shutdown_grace,
        ..SessionConfig::new(cutoff)
    };
    let controller = SessionController::new(
        provider,
        Arc::new(feed),
        processor,
        notifier,
        clock,
        monitor,
        session_config,
    )
    .with_metrics(ingest_metrics);

    let outcome = controller.run(shutdown_token.clone()).await;
    shutdown_token.cancel();
    pool.close().await;

    let report = outcome.context("ingestion session failed")?;
    tracing::info!(
        run_id = %report.run_id,
        final_state = %report.final_state,
        batches = report.batches,
        written = report.totals.written,
        dropped = report.totals.dropped(),
        failed = report.totals.failed,
        reconnects = report.reconnects,
        "Tick ingestor stopped"
    );
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &IngestorConfig) {
    tracing::info!(
        ws_url = %config.feed.ws_url,
        daily_table = %format!("{}.{}", config.database.daily_schema, config.database.daily_table),
        lookup_dir = %config.catalog.lookup_dir.display(),
        market_close = %config.session.market_close,
        health_port = config.server.health_port,
        batch_retries = config.session.batch_retry.retries,
        "Configuration loaded"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
        () = shutdown_token.cancelled() => return,
    }

    shutdown_token.cancel();
}
