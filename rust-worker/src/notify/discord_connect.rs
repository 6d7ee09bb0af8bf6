//! Role grants when a user links (or relinks) a Discord account.

use futures::future::join_all;
use serde::Serialize;
use tracing::{error, info, warn};

use super::signup::UserChange;
use super::{grant_step, Step};
use crate::services::RoleGrantor;
use crate::store::{Enrollment, Repository, User};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectOutcome {
    pub linked: bool,
    pub roles_granted: usize,
    /// Enrollments with no readable cohort or no role configured
    pub skipped: usize,
    pub failures: usize,
}

/// The Discord id in `after`, when it is set and differs from `before`.
pub fn linked_discord_id<'a>(before: &User, after: &'a User) -> Option<&'a str> {
    let id = after.discord_id()?;
    (before.discord_id() != Some(id)).then_some(id)
}

/// Grant the roles of every current enrollment to a newly linked account.
pub async fn on_discord_connect(
    repo: &Repository,
    roles: &dyn RoleGrantor,
    change: &UserChange,
) -> ConnectOutcome {
    let Some(account_id) = linked_discord_id(&change.before, &change.after) else {
        return ConnectOutcome::default();
    };

    info!(
        user_id = change.user_id(),
        account_id = account_id,
        enrollments = change.after.cohorts.len(),
        "discord_connect_detected"
    );

    let steps = join_all(
        change
            .after
            .cohorts
            .iter()
            .map(|enrollment| grant_enrollment(repo, roles, change, account_id, enrollment)),
    )
    .await;

    let outcome = ConnectOutcome {
        linked: true,
        roles_granted: steps.iter().filter(|s| **s == Step::Done).count(),
        skipped: steps.iter().filter(|s| **s == Step::Skipped).count(),
        failures: steps.iter().filter(|s| **s == Step::Failed).count(),
    };

    info!(
        user_id = change.user_id(),
        roles_granted = outcome.roles_granted,
        skipped = outcome.skipped,
        failures = outcome.failures,
        "discord_connect_complete"
    );

    outcome
}

async fn grant_enrollment(
    repo: &Repository,
    roles: &dyn RoleGrantor,
    change: &UserChange,
    account_id: &str,
    enrollment: &Enrollment,
) -> Step {
    let cohort_id = enrollment.cohort_id.as_str();

    let cohort = match repo.cohort(cohort_id).await {
        Ok(Some(cohort)) => cohort,
        Ok(None) => {
            warn!(user_id = change.user_id(), cohort_id = cohort_id, "discord_connect_cohort_missing");
            return Step::Skipped;
        }
        Err(e) => {
            error!(
                user_id = change.user_id(),
                cohort_id = cohort_id,
                error = %e,
                "discord_connect_cohort_read_failed"
            );
            return Step::Skipped;
        }
    };

    grant_step(roles, Some(account_id), cohort.role()).await
}
