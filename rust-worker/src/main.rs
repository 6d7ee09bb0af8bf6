//! Cohortmail Worker - sends the emails queued on `course_day_email`.
//!
//! Every message is one templated email. Sends run concurrently up to the
//! broker prefetch, and a failed send is redelivered.

mod consumer;

use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cohortmail::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    tracing::info!("worker_starting");

    let config = Config::from_env();
    tracing::info!(
        cloudamqp_url_set = !config.cloudamqp_url.is_empty(),
        concurrency = config.worker_concurrency,
        mailgun_domain = ?config.mailgun_domain,
        "config_loaded"
    );

    consumer::run(config).await?;

    Ok(())
}
