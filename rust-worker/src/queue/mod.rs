//! Queue module for RabbitMQ operations.
//!
//! This module provides:
//! - The `course_day_email` message type and its base64/JSON codec
//! - Async publisher for enqueueing messages
//!
//! ## Architecture
//!
//! ```text
//! Web Server (bulk enqueue) → course_day_email queue → Worker → Mailgun
//! ```

pub mod publisher;
pub mod types;

use anyhow::Result;
use async_trait::async_trait;

pub use publisher::Publisher;
pub use types::{MessageDecodeError, QueuedEmailMessage, EMAIL_QUEUE};

/// Destination for queued emails.
#[async_trait]
pub trait EmailQueue: Send + Sync {
    async fn publish(&self, message: &QueuedEmailMessage) -> Result<()>;
}
