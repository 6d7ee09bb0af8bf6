//! One-off email sends driven straight from HTTP.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::NFT_TEMPLATE;
use crate::services::Email;
use crate::Config;

/// Subject used by the generic sender when the caller gives none.
pub const DEFAULT_SUBJECT: &str = "🏕️ Seu primeiro Smart Contract na Ethereum";

/// Subject of the NFT delivery email.
pub const NFT_SUBJECT: &str = "👷👷‍♀️ WEB3DEV - NFT Recebido: Smart Contract Solidity";

/// Build a generic templated email with no params.
pub fn direct_email(template: &str, subject: Option<&str>, to: &str) -> Email {
    Email {
        template: template.to_string(),
        subject: subject
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_SUBJECT)
            .to_string(),
        to: to.to_string(),
        params: json!({}),
    }
}

/// One NFT holder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NftRecipient {
    pub email: String,
    pub wallet: String,
}

/// Read the recipient list from a JSON array file.
pub async fn load_nft_recipients(path: &Path) -> Result<Vec<NftRecipient>> {
    let raw = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read NFT recipients from {}", path.display()))?;
    serde_json::from_slice(&raw)
        .with_context(|| format!("Invalid NFT recipients file {}", path.display()))
}

/// The fixed parts of the NFT delivery email.
#[derive(Debug, Clone, PartialEq)]
pub struct NftDelivery {
    pub contract_address: String,
    pub course_title: String,
    pub first_token_id: u64,
}

impl NftDelivery {
    pub fn from_config(config: &Config) -> Self {
        Self {
            contract_address: config.nft_contract_address.clone(),
            course_title: config.nft_course_title.clone(),
            first_token_id: config.nft_first_token_id,
        }
    }

    /// One email per recipient; token ids follow list position.
    pub fn emails(&self, recipients: &[NftRecipient]) -> Vec<Email> {
        recipients
            .iter()
            .zip(self.first_token_id..)
            .map(|(recipient, token_id)| Email {
                template: NFT_TEMPLATE.to_string(),
                subject: NFT_SUBJECT.to_string(),
                to: recipient.email.clone(),
                params: json!({
                    "course_title": self.course_title,
                    "wallet_address": recipient.wallet,
                    "nft_contract": self.contract_address,
                    "nft_id": token_id,
                }),
            })
            .collect()
    }
}
