//! Outbound collaborators: the email sender and the Discord role grantor.
//!
//! Handlers only see the two traits below. The production implementations
//! talk to Mailgun and the Discord REST API.

pub mod discord;
pub mod mailgun;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use discord::DiscordRoleGrantor;
pub use mailgun::MailgunSender;

/// One templated email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Email {
    /// Name of the stored template to render
    pub template: String,
    pub subject: String,
    /// Recipient address
    pub to: String,
    /// Variables exposed to the template
    pub params: Value,
}

/// Provider acknowledgement for an accepted email.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    #[error("email request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("email provider rejected the message with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("email params could not be encoded: {0}")]
    Params(#[from] serde_json::Error),
}

impl EmailError {
    /// Whether sending the same email again could succeed.
    ///
    /// Transport failures, throttling and provider 5xx are transient; any
    /// other rejection and bad params will fail the same way every time.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Request(_) => true,
            Self::Rejected { status, .. } => *status == 429 || *status >= 500,
            Self::Params(_) => false,
        }
    }
}

/// Sends templated emails.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, email: &Email) -> Result<DeliveryReceipt, EmailError>;
}

/// Result of a role grant request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleGrant {
    Granted,
    /// The user has no linked chat account; nothing was sent.
    Skipped,
}

#[derive(Debug, thiserror::Error)]
pub enum RoleError {
    #[error("role grant request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Discord rejected the role grant with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("{field} {value:?} is not a Discord snowflake")]
    InvalidId { field: &'static str, value: String },
}

/// Grants chat roles.
///
/// A missing account id is not an error: the grant is skipped. Ids that
/// are present must be Discord snowflakes (ASCII digits).
#[async_trait]
pub trait RoleGrantor: Send + Sync {
    async fn grant_role(
        &self,
        account_id: Option<&str>,
        role_id: &str,
    ) -> Result<RoleGrant, RoleError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejected(status: u16) -> EmailError {
        EmailError::Rejected {
            status,
            body: String::new(),
        }
    }

    #[test]
    fn test_email_error_is_transient() {
        assert!(rejected(500).is_transient());
        assert!(rejected(503).is_transient());
        assert!(rejected(429).is_transient());

        assert!(!rejected(400).is_transient());
        assert!(!rejected(401).is_transient());
        assert!(!rejected(404).is_transient());

        let params = serde_json::from_str::<Value>("{").unwrap_err();
        assert!(!EmailError::Params(params).is_transient());
    }
}
