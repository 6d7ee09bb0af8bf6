//! Cohortmail Web Server - admin endpoints and user-update triggers.
//!
//! This binary serves:
//! - Direct sends (`/emails/send`, `/emails/nft-delivery`)
//! - Cohort-wide dispatch (`/emails/cohort`, `/discord/roles/cohort`)
//! - Single role grants (`/discord/roles/user`)
//! - Signed trigger webhooks fired when a user document changes
//!
//! Cohort emails are only enqueued here; the worker sends them.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    routing::{any, get, post},
    Router,
};
use reqwest::Client;
use tokio::{net::TcpListener, signal};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cohortmail::web::{
    add_user_to_role, cohort_signup_trigger, discord_connect_trigger, grant_cohort_roles, health,
    send_cohort_emails, send_email, send_nft_emails, AppState,
};
use cohortmail::{
    Config, DiscordRoleGrantor, FirestoreStore, MailgunSender, Publisher, Repository,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("web_server_starting");

    let config = Config::from_env();
    info!(
        port = config.port,
        trigger_signing_configured = config.trigger_signing_key.is_some(),
        mailgun_domain = ?config.mailgun_domain,
        discord_guild_id = ?config.discord_guild_id,
        firestore_project_id = ?config.firestore_project_id,
        "config_loaded"
    );

    // One HTTP client shared by every outbound adapter
    let client = Client::builder()
        .pool_max_idle_per_host(100)
        .timeout(Duration::from_millis(config.request_timeout_ms))
        .build()
        .context("Failed to create HTTP client")?;

    let store = FirestoreStore::from_config(client.clone(), &config)?;
    let email = MailgunSender::from_config(client.clone(), &config)?;
    let roles = DiscordRoleGrantor::from_config(client, &config)?;

    let publisher = Publisher::new(config.cloudamqp_url.clone());
    info!("rabbitmq_publisher_created");

    let state = AppState::new(
        config.clone(),
        Repository::new(Arc::new(store)),
        Arc::new(email),
        Arc::new(roles),
        Arc::new(publisher.clone()),
    );

    let app = Router::new()
        .route("/health", get(health))
        .route("/emails/send", any(send_email))
        .route("/emails/nft-delivery", any(send_nft_emails))
        .route("/emails/cohort", any(send_cohort_emails))
        .route("/discord/roles/user", any(add_user_to_role))
        .route("/discord/roles/cohort", any(grant_cohort_roles))
        .route("/triggers/on-cohort-signup", post(cohort_signup_trigger))
        .route("/triggers/on-discord-connect", post(discord_connect_trigger))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "web_server_listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    publisher.close().await;

    info!("web_server_shutdown_complete");

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

    info!("web_server_shutting_down");
}
