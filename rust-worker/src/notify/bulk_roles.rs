//! Grant a cohort's Discord role to its users.
//!
//! Only a user's FIRST enrollment is compared with the cohort; users who
//! joined the cohort as a later enrollment are left out. The bulk email
//! path matches any enrollment instead. Both behaviors are kept as they are.
//!
//! The sweep is split in two so the endpoint can answer once the grants are
//! dispatched: [`prepare_role_sweep`] reads the store and decides, then
//! [`RoleSweepPlan::execute`] issues the grants.

use futures::future::join_all;
use serde::Serialize;
use tracing::{info, warn};

use super::{grant_step, Step};
use crate::services::RoleGrantor;
use crate::store::{Repository, StoreError};

/// What the sweep decided to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleSweep {
    /// The cohort does not exist or has no role configured.
    InvalidCohort,
    /// The users collection is empty.
    NoUsers,
    Ready(RoleSweepPlan),
}

impl RoleSweep {
    /// Plain-text acknowledgement for the HTTP caller.
    pub fn response_text(&self) -> &'static str {
        match self {
            Self::InvalidCohort => "invalid cohort",
            Self::NoUsers => "no users",
            Self::Ready(_) => "OK",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleSweepPlan {
    pub cohort_id: String,
    pub role_id: String,
    pub targets: Vec<RoleTarget>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleTarget {
    pub user_id: String,
    pub account_id: String,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RoleSweepSummary {
    pub granted: usize,
    pub failed: usize,
}

/// Resolve the cohort and pick the users whose first enrollment matches.
pub async fn prepare_role_sweep(
    repo: &Repository,
    cohort_id: &str,
) -> Result<RoleSweep, StoreError> {
    let cohort = match repo.cohort(cohort_id).await? {
        Some(cohort) => cohort,
        None => {
            warn!(cohort_id = cohort_id, "role_sweep_invalid_cohort");
            return Ok(RoleSweep::InvalidCohort);
        }
    };

    let Some(role_id) = cohort.role().map(str::to_string) else {
        warn!(
            cohort_id = cohort_id,
            reason = "missing_discord_role",
            "role_sweep_invalid_cohort"
        );
        return Ok(RoleSweep::InvalidCohort);
    };

    let users = repo.users().await?;
    if users.is_empty() {
        warn!(cohort_id = cohort_id, "role_sweep_no_users");
        return Ok(RoleSweep::NoUsers);
    }

    let targets: Vec<RoleTarget> = users
        .into_iter()
        .filter(|doc| doc.data.first_enrollment_is(cohort_id))
        .filter_map(|doc| {
            let account_id = doc.data.discord_id()?.to_string();
            let username = doc.data.discord.as_ref().and_then(|d| d.username.clone());
            Some(RoleTarget {
                user_id: doc.id,
                account_id,
                username,
            })
        })
        .collect();

    info!(
        cohort_id = cohort_id,
        role_id = %role_id,
        targets = targets.len(),
        "role_sweep_prepared"
    );

    Ok(RoleSweep::Ready(RoleSweepPlan {
        cohort_id: cohort_id.to_string(),
        role_id,
        targets,
    }))
}

impl RoleSweepPlan {
    /// Issue every grant; one failure never stops the rest.
    pub async fn execute(&self, roles: &dyn RoleGrantor) -> RoleSweepSummary {
        let steps = join_all(self.targets.iter().map(|target| async move {
            info!(
                role_id = %self.role_id,
                user_id = %target.user_id,
                username = ?target.username,
                "role_sweep_granting"
            );
            grant_step(roles, Some(target.account_id.as_str()), Some(self.role_id.as_str())).await
        }))
        .await;

        let summary = RoleSweepSummary {
            granted: steps.iter().filter(|s| **s == Step::Done).count(),
            failed: steps.iter().filter(|s| **s == Step::Failed).count(),
        };

        info!(
            cohort_id = %self.cohort_id,
            granted = summary.granted,
            failed = summary.failed,
            "role_sweep_complete"
        );

        summary
    }
}
