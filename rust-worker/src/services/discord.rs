//! Discord role grants via the REST API.
//!
//! Reference: https://discord.com/developers/docs/resources/guild#add-guild-member-role

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{header::CONTENT_LENGTH, Client};
use tracing::{error, info, warn};
use url::Url;

use super::{RoleError, RoleGrant, RoleGrantor};
use crate::Config;

/// Grants guild roles with a bot token.
pub struct DiscordRoleGrantor {
    client: Client,
    api_base: Url,
    guild_id: String,
    bot_token: String,
    timeout: Duration,
}

impl DiscordRoleGrantor {
    pub fn new(
        client: Client,
        api_base: &str,
        guild_id: String,
        bot_token: String,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let api_base = Url::parse(api_base.trim_end_matches('/'))
            .with_context(|| format!("Invalid Discord API base {}", api_base))?;
        if api_base.cannot_be_a_base() {
            anyhow::bail!("Discord API base {} cannot hold a path", api_base);
        }
        if !is_snowflake(&guild_id) {
            anyhow::bail!("DISCORD_GUILD_ID {:?} is not a Discord snowflake", guild_id);
        }

        Ok(Self {
            client,
            api_base,
            guild_id,
            bot_token,
            timeout,
        })
    }

    /// Build the grantor from configuration.
    pub fn from_config(client: Client, config: &Config) -> anyhow::Result<Self> {
        let bot_token = config
            .discord_bot_token
            .clone()
            .ok_or_else(|| anyhow::anyhow!("DISCORD_BOT_TOKEN is not set"))?;
        let guild_id = config
            .discord_guild_id
            .clone()
            .ok_or_else(|| anyhow::anyhow!("DISCORD_GUILD_ID is not set"))?;

        info!(guild_id = %guild_id, "discord_grantor_created");

        Self::new(
            client,
            &config.discord_api_base,
            guild_id,
            bot_token,
            Duration::from_millis(config.request_timeout_ms),
        )
    }

    /// Member role URL; both ids must already be validated snowflakes.
    fn role_url(&self, account_id: &str, role_id: &str) -> Url {
        let mut url = self.api_base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend([
                "guilds",
                self.guild_id.as_str(),
                "members",
                account_id,
                "roles",
                role_id,
            ]);
        }
        url
    }
}

/// Discord ids are unsigned 64-bit integers written in decimal.
fn is_snowflake(id: &str) -> bool {
    !id.is_empty() && id.len() <= 20 && id.bytes().all(|b| b.is_ascii_digit())
}

fn validate_id(field: &'static str, value: &str) -> Result<(), RoleError> {
    if is_snowflake(value) {
        return Ok(());
    }
    warn!(field = field, value = %value, "discord_invalid_id");
    Err(RoleError::InvalidId {
        field,
        value: value.to_string(),
    })
}

#[async_trait]
impl RoleGrantor for DiscordRoleGrantor {
    async fn grant_role(
        &self,
        account_id: Option<&str>,
        role_id: &str,
    ) -> Result<RoleGrant, RoleError> {
        let account_id = match account_id.filter(|id| !id.is_empty()) {
            Some(id) => id,
            None => {
                info!(role_id = role_id, "discord_grant_skipped_no_account");
                return Ok(RoleGrant::Skipped);
            }
        };

        validate_id("account id", account_id)?;
        validate_id("role id", role_id)?;

        let response = self
            .client
            .put(self.role_url(account_id, role_id))
            .header("Authorization", format!("Bot {}", self.bot_token))
            .header(CONTENT_LENGTH, "0")
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(
                account_id = account_id,
                role_id = role_id,
                status_code = status.as_u16(),
                body = %body,
                "discord_grant_rejected"
            );
            return Err(RoleError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        info!(account_id = account_id, role_id = role_id, "discord_role_granted");

        Ok(RoleGrant::Granted)
    }
}
