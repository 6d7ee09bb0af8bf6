//! HTTP surface for the cohort notifier.
//!
//! - Query-driven admin endpoints for direct sends, cohort emails and roles
//! - Signed trigger webhooks fired when a user document changes
//!
//! Bulk endpoints only dispatch; the work continues after the response.

pub mod handlers;
pub mod signature;

pub use handlers::{
    add_user_to_role, cohort_signup_trigger, discord_connect_trigger, grant_cohort_roles, health,
    send_cohort_emails, send_email, send_nft_emails, AppState, HealthResponse,
};
pub use signature::{is_signature_verification_enabled, verify_trigger_signature};
