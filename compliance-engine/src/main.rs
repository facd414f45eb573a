//! Compliance engine service entry point.
//!
//! # Environment variables
//! | Var                   | Default                         |
//! |-----------------------|---------------------------------|
//! | `DATABASE_URL`        | optional (Postgres source)      |
//! | `READINGS_FILE`       | optional (JSON file source)     |
//! | `SCAN_INTERVAL_SECS`  | `60`                            |
//! | `STALE_AFTER_DAYS`    | `14`                            |
//! | `STANDARDS_FILE`      | optional (catalog overrides)    |
//! | `AMQP_URL`            | optional                        |
//! | `ALERT_BELL`          | `false`                         |
//!
//! One of `DATABASE_URL` or `READINGS_FILE` must be set.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use compliance_engine::config::{EngineConfig, SinkConfig, SourceConfig};
use compliance_engine::generator::AlertGenerator;
use compliance_engine::notify::{
    AmqpNotificationSink, LogNotificationSink, NotificationSink, TerminalBellSink,
};
use compliance_engine::source::{JsonFileReadingSource, PgReadingSource, ReadingSource};
use compliance_engine::{ComplianceMonitor, StandardsCatalog, ValidationEngine};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("compliance_engine=info".parse()?),
        )
        .json()
        .init();

    let config = EngineConfig::from_env();

    let catalog = match &config.standards_file {
        Some(path) => {
            info!(path = %path.display(), "Loading standards overrides");
            StandardsCatalog::from_file(path)
                .with_context(|| format!("invalid standards file {}", path.display()))?
        }
        None => StandardsCatalog::mahc(),
    };

    let source: Arc<dyn ReadingSource> = match &config.source {
        Some(SourceConfig::Postgres { database_url }) => {
            info!("Using PgReadingSource");
            Arc::new(PgReadingSource::connect(database_url).await?)
        }
        Some(SourceConfig::JsonFile { path }) => {
            info!(path = %path.display(), "Using JsonFileReadingSource");
            Arc::new(JsonFileReadingSource::new(path.clone()))
        }
        None => bail!("DATABASE_URL or READINGS_FILE must be set"),
    };

    let sink: Arc<dyn NotificationSink> = match &config.sink {
        SinkConfig::Amqp { url } => match AmqpNotificationSink::connect(url).await {
            Ok(sink) => {
                info!("RabbitMQ channel ready");
                Arc::new(sink)
            }
            Err(e) => {
                warn!(error = %e, "AMQP unavailable; falling back to log notifications");
                Arc::new(LogNotificationSink)
            }
        },
        SinkConfig::TerminalBell => Arc::new(TerminalBellSink),
        SinkConfig::Log => Arc::new(LogNotificationSink),
    };

    let generator =
        AlertGenerator::new(ValidationEngine::new(catalog)).with_stale_after(config.stale_after);
    let monitor = ComplianceMonitor::new(generator, source, sink);

    let mut alerts = monitor.subscribe();
    let reporter = monitor.clone();
    tokio::spawn(async move {
        while alerts.changed().await.is_ok() {
            let summary = reporter.summary();
            info!(
                active = summary.active_count,
                emergency = summary.emergency_count,
                critical = summary.critical_count,
                acknowledged = summary.acknowledged_count,
                "active alerts changed"
            );
        }
    });

    let scheduler = monitor.spawn(config.scan_interval);
    info!(
        interval_secs = config.scan_interval.as_secs(),
        stale_after_days = config.stale_after.num_days(),
        "compliance-engine running"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    scheduler.stop().await;

    Ok(())
}
