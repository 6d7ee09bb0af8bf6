//! Trigger handlers.
//!
//! Each handler is a plain async function taking the collaborators it
//! needs. The binaries wire them to their triggers:
//!
//! ```text
//! user updated (webhook)  → signup, discord_connect
//! course_day_email queue  → queued_email
//! HTTP                    → bulk_email, bulk_roles, direct
//! hourly timer            → kickoff
//! ```
//!
//! Bulk handlers fan out one future per matching entity with no bound on
//! concurrency.

pub mod bulk_email;
pub mod bulk_roles;
pub mod direct;
pub mod discord_connect;
pub mod kickoff;
pub mod params;
pub mod queued_email;
pub mod signup;

#[cfg(test)]
pub(crate) mod testing;

use tracing::error;

use crate::services::{Email, EmailSender, RoleGrant, RoleGrantor};

pub use bulk_email::{enqueue_cohort_emails, EnqueueSummary};
pub use bulk_roles::{prepare_role_sweep, RoleSweep, RoleSweepPlan, RoleSweepSummary};
pub use direct::{direct_email, load_nft_recipients, NftDelivery, NftRecipient};
pub use discord_connect::{linked_discord_id, on_discord_connect, ConnectOutcome};
pub use kickoff::{run_kickoff, select_kickoff_cohort, KickoffSummary};
pub use params::EmailParams;
pub use queued_email::{send_queued_email, QueuedEmailError};
pub use signup::{new_enrollments, on_cohort_signup, SignupOutcome, UserChange};

/// Template sent when a user joins a cohort.
pub const SIGNUP_TEMPLATE: &str = "on_cohort_signup";

/// Template sent shortly before a cohort starts.
pub const KICKOFF_TEMPLATE: &str = "kickoff_email";

/// Template announcing a delivered NFT.
pub const NFT_TEMPLATE: &str = "nft_delivery";

/// How one outbound call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Done,
    Skipped,
    Failed,
}

/// Send an email if there is one to send.
pub(crate) async fn send_step(sender: &dyn EmailSender, email: Option<Email>) -> Step {
    let Some(email) = email else {
        return Step::Skipped;
    };

    match sender.send(&email).await {
        Ok(_) => Step::Done,
        Err(e) => {
            error!(
                to = %email.to,
                template = %email.template,
                error = %e,
                "email_send_failed"
            );
            Step::Failed
        }
    }
}

/// Grant a role if the cohort has one.
pub(crate) async fn grant_step(
    roles: &dyn RoleGrantor,
    account_id: Option<&str>,
    role_id: Option<&str>,
) -> Step {
    let Some(role_id) = role_id else {
        return Step::Skipped;
    };

    match roles.grant_role(account_id, role_id).await {
        Ok(RoleGrant::Granted) => Step::Done,
        Ok(RoleGrant::Skipped) => Step::Skipped,
        Err(e) => {
            error!(
                account_id = ?account_id,
                role_id = role_id,
                error = %e,
                "role_grant_failed"
            );
            Step::Failed
        }
    }
}
