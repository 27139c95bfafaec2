// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

mod intake;
mod metrics;
mod receipt_processor;
mod refs;
mod subscription_sweep;
mod watchdog;

use std::sync::Arc;

use chrono::Timelike;
use pledger_common::audit::{AiAuditLog, AuditLog};
use pledger_common::clock::{Clock, SystemClock};
use pledger_common::config::{Config, Secrets};
use pledger_common::lock::PgAdvisoryLock;
use pledger_common::mail::HttpMailGateway;
use pledger_common::store::Store;
use pledger_common::ai::GeminiOracle;
use pledger_common::blob::FsBlobStore;
use pledger_core::{AllocationService, SubscriptionEngine};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

use intake::IntakeService;
use receipt_processor::ReceiptProcessor;
use subscription_sweep::SubscriptionSweep;
use watchdog::Watchdog;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    let secrets = Secrets::load();
    let config_text = std::fs::read_to_string(&secrets.config_path).unwrap_or_default();
    let config = Config::from_toml_str(&config_text)?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&secrets.database_url)
        .await?;

    let store = Store::new(pool.clone());
    let audit = AuditLog::new(pool.clone());
    let ai_audit = AiAuditLog::new(pool.clone());
    let lock = PgAdvisoryLock::new(pool.clone());
    let clock = Arc::new(SystemClock);
    let mail: Arc<dyn pledger_common::mail::MailGateway> = Arc::new(HttpMailGateway::new(
        reqwest::Client::new(),
        std::env::var("MAIL_GATEWAY_URL").unwrap_or_else(|_| "http://localhost:8090".to_string()),
    ));
    let ai: Arc<dyn pledger_common::ai::AiOracle> = Arc::new(GeminiOracle::new(
        reqwest::Client::new(),
        secrets.gemini_api_key.clone(),
        config.gemini_model.clone(),
    ));
    let blobs: Arc<dyn pledger_common::blob::BlobStore> = Arc::new(FsBlobStore::new(
        std::env::var("RECEIPTS_DIR").unwrap_or_else(|_| "./receipts".to_string()),
        std::env::var("RECEIPTS_BASE_LINK").unwrap_or_else(|_| "https://files.internal/receipts".to_string()),
    ));

    let allocation_service = Arc::new(AllocationService::new(
        store.clone(),
        mail.clone(),
        blobs.clone(),
        audit.clone(),
        clock.clone(),
        lock.clone(),
        config.clone(),
    ));
    let subscription_engine = Arc::new(SubscriptionEngine::new(
        store.clone(),
        mail.clone(),
        blobs.clone(),
        audit.clone(),
        clock.clone(),
        lock.clone(),
        config.clone(),
    ));

    let receipt_processor = ReceiptProcessor::new(
        store.clone(),
        mail.clone(),
        ai.clone(),
        ai_audit.clone(),
        audit.clone(),
        blobs.clone(),
        clock.clone(),
        subscription_engine.clone(),
        config.clone(),
    );
    let watchdog = Watchdog::new(
        store.clone(),
        mail.clone(),
        blobs.clone(),
        ai.clone(),
        ai_audit.clone(),
        audit.clone(),
        clock.clone(),
        config.clone(),
    );
    let sweep = SubscriptionSweep::new(store.clone(), subscription_engine.clone(), allocation_service.clone());

    let intake_service = Arc::new(IntakeService::new(
        store.clone(),
        mail.clone(),
        blobs.clone(),
        clock.clone(),
        lock.clone(),
        config.clone(),
        subscription_engine.clone(),
    ));

    let receipt_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(receipt_processor::poll_interval());
        loop {
            ticker.tick().await;
            match receipt_processor.run_once().await {
                Ok(()) => metrics::record("receipt_processor", metrics::Outcome::Processed),
                Err(e) => {
                    tracing::error!(error = %e, "receipt processor tick failed");
                    metrics::record("receipt_processor", metrics::Outcome::Error);
                }
            }
        }
    });

    let watchdog_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(watchdog::poll_interval());
        loop {
            ticker.tick().await;
            match watchdog.run_once().await {
                Ok(()) => metrics::record("watchdog", metrics::Outcome::Processed),
                Err(e) => {
                    tracing::error!(error = %e, "watchdog tick failed");
                    metrics::record("watchdog", metrics::Outcome::Error);
                }
            }
        }
    });

    let display_timezone = config.display_timezone.clone();
    let sweep_clock = clock.clone();
    let sweep_task = tokio::spawn(async move {
        let mut last_run: Option<chrono::NaiveDate> = None;
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            ticker.tick().await;
            let now = sweep_clock.now();
            let local = now.with_timezone(
                &display_timezone
                    .parse::<chrono_tz::Tz>()
                    .unwrap_or(chrono_tz::UTC),
            );
            if local.hour() >= 9 && last_run != Some(local.date_naive()) {
                match sweep.run_daily().await {
                    Ok(()) => {
                        last_run = Some(local.date_naive());
                        metrics::record("subscription_sweep", metrics::Outcome::Processed);
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "subscription sweep failed");
                        metrics::record("subscription_sweep", metrics::Outcome::Error);
                    }
                }
            } else {
                metrics::record("subscription_sweep", metrics::Outcome::Skipped);
            }
        }
    });

    let metrics_addr: std::net::SocketAddr = std::env::var("AGENT_METRICS_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:9091".to_string())
        .parse()?;
    let metrics_task = tokio::spawn(metrics::run(metrics_addr));

    let intake_addr: std::net::SocketAddr = std::env::var("INTAKE_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:9092".to_string())
        .parse()?;
    let intake_task = tokio::spawn(intake::run(intake_addr, intake_service));

    let (_, _, _, metrics_result, intake_result) =
        tokio::try_join!(receipt_task, watchdog_task, sweep_task, metrics_task, intake_task)?;
    metrics_result?;
    intake_result
}
