//! Mailgun email sender.
//!
//! Templates live in Mailgun. Each send names the stored template and passes
//! the params as `h:X-Mailgun-Variables`, so rendering happens provider-side.
//! Reference: https://documentation.mailgun.com/docs/mailgun/user-manual/sending-messages/#templates

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{error, info};

use super::{DeliveryReceipt, Email, EmailError, EmailSender};
use crate::Config;

/// Sends email through the Mailgun messages API.
pub struct MailgunSender {
    client: Client,
    messages_url: String,
    api_key: String,
    from: String,
    timeout: Duration,
}

impl MailgunSender {
    pub fn new(
        client: Client,
        api_base: &str,
        domain: &str,
        api_key: String,
        from: String,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            messages_url: messages_url(api_base, domain),
            api_key,
            from,
            timeout,
        }
    }

    /// Build the sender from configuration.
    pub fn from_config(client: Client, config: &Config) -> anyhow::Result<Self> {
        let api_key = config
            .mailgun_api_key
            .clone()
            .ok_or_else(|| anyhow::anyhow!("MAILGUN_API_KEY is not set"))?;
        let domain = config
            .mailgun_domain
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("MAILGUN_DOMAIN is not set"))?;
        let from = config
            .sender_address()
            .ok_or_else(|| anyhow::anyhow!("EMAIL_FROM is not set"))?;

        info!(domain = domain, from = %from, "mailgun_sender_created");

        Ok(Self::new(
            client,
            &config.mailgun_api_base,
            domain,
            api_key,
            from,
            Duration::from_millis(config.request_timeout_ms),
        ))
    }
}

fn messages_url(api_base: &str, domain: &str) -> String {
    format!("{}/v3/{}/messages", api_base.trim_end_matches('/'), domain)
}

#[async_trait]
impl EmailSender for MailgunSender {
    async fn send(&self, email: &Email) -> Result<DeliveryReceipt, EmailError> {
        let variables = serde_json::to_string(&email.params)?;

        let form = [
            ("from", self.from.as_str()),
            ("to", email.to.as_str()),
            ("subject", email.subject.as_str()),
            ("template", email.template.as_str()),
            ("h:X-Mailgun-Variables", variables.as_str()),
        ];

        let response = self
            .client
            .post(&self.messages_url)
            .basic_auth("api", Some(&self.api_key))
            .timeout(self.timeout)
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(
                to = %email.to,
                template = %email.template,
                status_code = status.as_u16(),
                body = %body,
                "mailgun_send_rejected"
            );
            return Err(EmailError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let receipt: DeliveryReceipt = response.json().await?;

        info!(
            to = %email.to,
            template = %email.template,
            subject = %email.subject,
            mailgun_id = ?receipt.id,
            "mailgun_send_accepted"
        );

        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_url() {
        assert_eq!(
            messages_url("https://api.mailgun.net/", "mg.example.com"),
            "https://api.mailgun.net/v3/mg.example.com/messages"
        );
        assert_eq!(
            messages_url("https://api.eu.mailgun.net", "mg.example.com"),
            "https://api.eu.mailgun.net/v3/mg.example.com/messages"
        );
    }

    #[test]
    fn test_receipt_deserialization() {
        let receipt: DeliveryReceipt = serde_json::from_str(
            r#"{"id": "<20240501.1@mg.example.com>", "message": "Queued. Thank you."}"#,
        )
        .unwrap();
        assert_eq!(receipt.id.as_deref(), Some("<20240501.1@mg.example.com>"));
        assert_eq!(receipt.message, "Queued. Thank you.");
    }
}
