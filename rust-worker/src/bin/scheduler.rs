//! Cohortmail Scheduler - hourly kickoff emails.
//!
//! Wakes at `KICKOFF_MINUTE` past every hour (UTC) and emails the users of
//! the cohort whose kickoff starts within the next few minutes.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::Client;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cohortmail::notify::run_kickoff;
use cohortmail::schedule::next_run;
use cohortmail::{Config, FirestoreStore, MailgunSender, Repository};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("scheduler_starting");

    let config = Config::from_env();
    info!(
        kickoff_minute = config.kickoff_minute,
        allowlist = ?config.kickoff_recipient_allowlist,
        firestore_project_id = ?config.firestore_project_id,
        "config_loaded"
    );

    let client = Client::builder()
        .timeout(Duration::from_millis(config.request_timeout_ms))
        .build()
        .context("Failed to create HTTP client")?;

    let repo = Repository::new(Arc::new(FirestoreStore::from_config(client.clone(), &config)?));
    let sender = MailgunSender::from_config(client, &config)?;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        let now = Utc::now();
        let at = next_run(now, config.kickoff_minute);
        let wait = (at - now).to_std().unwrap_or_default();

        info!(next_run = %at.to_rfc3339(), "kickoff_scheduled");

        tokio::select! {
            _ = &mut shutdown => break,
            _ = tokio::time::sleep(wait) => {}
        }

        let allowlist = config.kickoff_recipient_allowlist.as_deref();
        match run_kickoff(&repo, &sender, Utc::now(), allowlist).await {
            Ok(summary) => info!(
                cohort_id = ?summary.cohort_id,
                recipients = summary.recipients,
                sent = summary.sent,
                failed = summary.failed,
                "kickoff_run_complete"
            ),
            Err(e) => error!(error = %e, "kickoff_run_failed"),
        }
    }

    info!("scheduler_shutdown_complete");

    Ok(())
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("scheduler_shutting_down");
}
