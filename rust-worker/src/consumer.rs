//! RabbitMQ consumer for the `course_day_email` queue.
//!
//! Each delivery is handled on its own task: the payload is decoded, the
//! email is sent, and the delivery is acked. Undecodable payloads and
//! emails the provider rejects are dropped. A transient send failure goes
//! back on the queue once; if the redelivery fails too it is dropped.

use std::sync::Arc;

use anyhow::{Context, Result};
use futures::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions,
        QueueDeclareOptions,
    },
    types::FieldTable,
    Channel, Connection, ConnectionProperties,
};
use reqwest::Client;
use tokio::signal;
use tracing::{error, info, warn};

use cohortmail::notify::send_queued_email;
use cohortmail::{Config, EmailSender, MailgunSender, EMAIL_QUEUE};

/// Run the RabbitMQ consumer.
///
/// This function:
/// 1. Builds the Mailgun sender (fails fast when it is not configured)
/// 2. Connects to RabbitMQ and sets prefetch from `WORKER_CONCURRENCY`
/// 3. Declares the queue (idempotent operation)
/// 4. Consumes messages, spawning a task for each
/// 5. Handles graceful shutdown on SIGINT/SIGTERM
pub async fn run(config: Config) -> Result<()> {
    let client = Client::builder()
        .pool_max_idle_per_host(100)
        .build()
        .context("Failed to create HTTP client")?;

    let sender: Arc<dyn EmailSender> = Arc::new(MailgunSender::from_config(client, &config)?);

    info!(url_length = config.cloudamqp_url.len(), "rabbitmq_connecting");

    let conn = Connection::connect(&config.cloudamqp_url, ConnectionProperties::default())
        .await
        .context("Failed to connect to RabbitMQ")?;

    info!("rabbitmq_connected");

    let channel = conn
        .create_channel()
        .await
        .context("Failed to create channel")?;

    let prefetch_count = u16::try_from(config.worker_concurrency).unwrap_or(u16::MAX);
    channel
        .basic_qos(prefetch_count, BasicQosOptions::default())
        .await
        .context("Failed to set QoS")?;

    info!(prefetch_count = prefetch_count, "rabbitmq_qos_set");

    channel
        .queue_declare(
            EMAIL_QUEUE,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .context("Failed to declare queue")?;

    info!(queue = EMAIL_QUEUE, "rabbitmq_queue_declared");

    let mut consumer = channel
        .basic_consume(
            EMAIL_QUEUE,
            "cohortmail-worker",
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await
        .context("Failed to start consumer")?;

    info!(queue = EMAIL_QUEUE, "rabbitmq_consumer_started");
    info!("worker_ready");

    let channel = Arc::new(channel);

    let shutdown = async {
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
    };

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("worker_stopping");
                break;
            }
            delivery = consumer.next() => {
                match delivery {
                    Some(Ok(delivery)) => {
                        let delivery_tag = delivery.delivery_tag;
                        let redelivered = delivery.redelivered;

                        info!(
                            queue = EMAIL_QUEUE,
                            delivery_tag = delivery_tag,
                            redelivered = redelivered,
                            "rabbitmq_email_received"
                        );

                        let sender = Arc::clone(&sender);
                        let channel = Arc::clone(&channel);

                        tokio::spawn(async move {
                            match send_queued_email(sender.as_ref(), &delivery.data).await {
                                Ok(receipt) => {
                                    info!(
                                        delivery_tag = delivery_tag,
                                        id = ?receipt.id,
                                        "queued_email_sent"
                                    );
                                    ack(&channel, delivery_tag).await;
                                }
                                Err(e) => {
                                    let requeue = e.should_requeue(redelivered);
                                    error!(
                                        delivery_tag = delivery_tag,
                                        requeue = requeue,
                                        error = %e,
                                        "queued_email_failed"
                                    );
                                    nack(&channel, delivery_tag, requeue).await;
                                }
                            }
                        });
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "rabbitmq_delivery_error");
                    }
                    None => {
                        warn!("rabbitmq_consumer_closed");
                        break;
                    }
                }
            }
        }
    }

    info!("worker_shutdown_complete");
    Ok(())
}

async fn ack(channel: &Channel, delivery_tag: u64) {
    if let Err(e) = channel
        .basic_ack(delivery_tag, BasicAckOptions::default())
        .await
    {
        error!(delivery_tag = delivery_tag, error = %e, "rabbitmq_ack_failed");
    }
}

async fn nack(channel: &Channel, delivery_tag: u64, requeue: bool) {
    if let Err(e) = channel
        .basic_nack(
            delivery_tag,
            BasicNackOptions {
                requeue,
                ..Default::default()
            },
        )
        .await
    {
        error!(delivery_tag = delivery_tag, error = %e, "rabbitmq_nack_failed");
    }
}
