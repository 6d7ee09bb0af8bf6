//! Queue message types for the `course_day_email` queue.
//!
//! Messages travel as base64 (standard alphabet, padded) of their UTF-8
//! JSON encoding:
//!
//! ```text
//! {"template": "...", "subject": "...", "to": "...", "params": {...}}
//! ```

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::services::Email;

/// Queue name for emails waiting to be sent.
pub const EMAIL_QUEUE: &str = "course_day_email";

/// A self-contained email request; the consumer needs no store lookups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedEmailMessage {
    pub template: String,
    pub subject: String,
    pub to: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, thiserror::Error)]
pub enum MessageDecodeError {
    #[error("payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("payload is not a valid email message: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueuedEmailMessage {
    pub fn new(template: String, subject: String, to: String, params: Value) -> Self {
        Self {
            template,
            subject,
            to,
            params,
        }
    }

    /// Encode for transit.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        let json = serde_json::to_vec(self)?;
        Ok(STANDARD.encode(json))
    }

    /// Decode a payload produced by [`QueuedEmailMessage::encode`].
    ///
    /// Surrounding whitespace (a trailing newline from a manual publish) is
    /// tolerated.
    pub fn decode(payload: &[u8]) -> Result<Self, MessageDecodeError> {
        let json = STANDARD.decode(payload.trim_ascii())?;
        Ok(serde_json::from_slice(&json)?)
    }

    pub fn into_email(self) -> Email {
        Email {
            template: self.template,
            subject: self.subject,
            to: self.to,
            params: self.params,
        }
    }
}
