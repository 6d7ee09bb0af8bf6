//! Sends one email per `course_day_email` queue message.

use tracing::info;

use crate::queue::{MessageDecodeError, QueuedEmailMessage};
use crate::services::{DeliveryReceipt, EmailError, EmailSender};

#[derive(Debug, thiserror::Error)]
pub enum QueuedEmailError {
    #[error(transparent)]
    Decode(#[from] MessageDecodeError),

    #[error(transparent)]
    Send(#[from] EmailError),
}

impl QueuedEmailError {
    /// Whether to put the message back on the queue.
    ///
    /// A payload that does not decode never will succeed, and neither will an
    /// email the provider rejected as invalid. Transient failures get one
    /// redelivery; the broker requeues without delay, so a second failure is
    /// dropped.
    pub fn should_requeue(&self, redelivered: bool) -> bool {
        match self {
            Self::Decode(_) => false,
            Self::Send(e) => e.is_transient() && !redelivered,
        }
    }
}

/// Decode a queue payload and send the email it describes.
pub async fn send_queued_email(
    sender: &dyn EmailSender,
    payload: &[u8],
) -> Result<DeliveryReceipt, QueuedEmailError> {
    let message = QueuedEmailMessage::decode(payload)?;

    info!(
        subject = %message.subject,
        template = %message.template,
        to = %message.to,
        "queued_email_sending"
    );

    Ok(sender.send(&message.into_email()).await?)
}
