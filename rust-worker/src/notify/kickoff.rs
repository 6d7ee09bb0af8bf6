//! Kickoff emails for cohorts about to start.
//!
//! Runs from the hourly timer. A cohort qualifies when its kickoff is
//! strictly between now and [`KICKOFF_WINDOW_SECS`] from now. When several
//! qualify the last one in scan order wins; that case is logged since it
//! means the other cohorts get no kickoff email.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tracing::{info, warn};

use super::params::resolve_params;
use super::{send_step, Step, KICKOFF_TEMPLATE};
use crate::services::{Email, EmailSender};
use crate::store::{Cohort, Document, Repository, StoreError};

/// Width of the look-ahead window, in seconds.
pub const KICKOFF_WINDOW_SECS: i64 = 360;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KickoffSummary {
    pub cohort_id: Option<String>,
    /// Enrolled users with an email address
    pub recipients: usize,
    /// Recipients dropped by the allowlist
    pub filtered: usize,
    pub sent: usize,
    pub failed: usize,
}

/// Pick the cohort starting within the window; the last match wins.
pub fn select_kickoff_cohort(
    cohorts: &[Document<Cohort>],
    now: DateTime<Utc>,
) -> Option<&Document<Cohort>> {
    let window_ms = KICKOFF_WINDOW_SECS * 1000;

    let matches: Vec<&Document<Cohort>> = cohorts
        .iter()
        .filter(|doc| {
            doc.data
                .kickoff_start_time
                .map(|start| {
                    let until_ms = (start - now).num_milliseconds();
                    until_ms > 0 && until_ms < window_ms
                })
                .unwrap_or(false)
        })
        .collect();

    if matches.len() > 1 {
        warn!(
            matches = matches.len(),
            cohort_ids = ?matches.iter().map(|d| d.id.as_str()).collect::<Vec<_>>(),
            "kickoff_multiple_cohorts_starting"
        );
    }

    matches.last().copied()
}

/// Send the kickoff email for the cohort starting next, if any.
///
/// With an allowlist only the listed addresses are emailed.
pub async fn run_kickoff(
    repo: &Repository,
    sender: &dyn EmailSender,
    now: DateTime<Utc>,
    allowlist: Option<&[String]>,
) -> Result<KickoffSummary, StoreError> {
    let cohorts = repo.cohorts().await?;

    let Some(selected) = select_kickoff_cohort(&cohorts, now) else {
        info!(cohorts = cohorts.len(), "kickoff_no_cohort_starting");
        return Ok(KickoffSummary::default());
    };

    let cohort_id = selected.id.as_str();
    let mut summary = KickoffSummary {
        cohort_id: Some(cohort_id.to_string()),
        ..Default::default()
    };

    let Some(subject) = selected.data.subject() else {
        warn!(cohort_id = cohort_id, "kickoff_cohort_without_subject");
        return Ok(summary);
    };

    let params = resolve_params(repo, &selected.data, None).await;
    let params = match params.to_value() {
        Ok(params) => params,
        Err(e) => {
            warn!(cohort_id = cohort_id, error = %e, "kickoff_params_failed");
            return Ok(summary);
        }
    };

    let users = repo.users().await?;

    let recipients: Vec<&str> = users
        .iter()
        .filter(|doc| doc.data.is_enrolled_in(cohort_id))
        .filter_map(|doc| doc.data.email())
        .collect();
    summary.recipients = recipients.len();

    let emails: Vec<Email> = recipients
        .into_iter()
        .filter(|to| allowlist.map_or(true, |allowed| allowed.iter().any(|a| a.as_str() == *to)))
        .map(|to| Email {
            template: KICKOFF_TEMPLATE.to_string(),
            subject: subject.to_string(),
            to: to.to_string(),
            params: params.clone(),
        })
        .collect();
    summary.filtered = summary.recipients - emails.len();

    info!(
        cohort_id = cohort_id,
        recipients = summary.recipients,
        filtered = summary.filtered,
        "kickoff_sending"
    );

    let steps = join_all(emails.into_iter().map(|email| send_step(sender, Some(email)))).await;

    summary.sent = steps.iter().filter(|s| **s == Step::Done).count();
    summary.failed = steps.iter().filter(|s| **s == Step::Failed).count();

    info!(
        cohort_id = cohort_id,
        sent = summary.sent,
        failed = summary.failed,
        "kickoff_complete"
    );

    Ok(summary)
}
