//! Cohortmail - notifications for course cohorts.
//!
//! This library provides shared modules for the three cohortmail binaries:
//! - `cohortmail-web`: admin endpoints and user-update trigger webhooks
//! - `cohortmail-worker`: sends the emails queued on `course_day_email`
//! - `cohortmail-scheduler`: hourly kickoff emails
//!
//! ## Architecture
//!
//! ```text
//! Triggers / HTTP → Web Server ──→ Mailgun, Discord
//!                       │
//!                       └─→ course_day_email → Worker → Mailgun
//! Hourly timer → Scheduler → Mailgun
//! ```

pub mod config;
pub mod notify;
pub mod queue;
pub mod schedule;
pub mod services;
pub mod store;
pub mod web;

// Re-export commonly used types
pub use config::Config;
pub use queue::{EmailQueue, Publisher, QueuedEmailMessage, EMAIL_QUEUE};
pub use services::{DiscordRoleGrantor, EmailSender, MailgunSender, RoleGrantor};
pub use store::{FirestoreStore, Repository};
pub use web::AppState;
