//! Cohort signup notifications.
//!
//! When a user document gains enrollments, every new cohort gets a welcome
//! email and its Discord role. The two calls run side by side and neither
//! blocks the other. Failures are logged and counted only; nothing here is
//! retried or queued.

use std::collections::HashSet;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::params::resolve_params;
use super::{grant_step, send_step, Step, SIGNUP_TEMPLATE};
use crate::services::{Email, EmailSender, RoleGrantor};
use crate::store::{Enrollment, Repository, User};

/// Before/after snapshots of an updated user document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserChange {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub before: User,
    #[serde(default)]
    pub after: User,
}

impl UserChange {
    pub fn user_id(&self) -> &str {
        self.user_id.as_deref().unwrap_or("unknown")
    }
}

/// Counts reported back to the trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SignupOutcome {
    pub new_enrollments: usize,
    /// Enrollments whose cohort could not be read
    pub skipped: usize,
    pub emails_sent: usize,
    pub roles_granted: usize,
    pub failures: usize,
}

/// Enrollments in `after` whose cohort id is absent from `before`.
pub fn new_enrollments<'a>(before: &User, after: &'a User) -> Vec<&'a Enrollment> {
    let previous: HashSet<&str> = before
        .cohorts
        .iter()
        .map(|e| e.cohort_id.as_str())
        .collect();

    after
        .cohorts
        .iter()
        .filter(|e| !previous.contains(e.cohort_id.as_str()))
        .collect()
}

/// Notify a user about every cohort they just joined.
pub async fn on_cohort_signup(
    repo: &Repository,
    sender: &dyn EmailSender,
    roles: &dyn RoleGrantor,
    change: &UserChange,
) -> SignupOutcome {
    let added = new_enrollments(&change.before, &change.after);

    info!(
        user_id = change.user_id(),
        new_enrollments = added.len(),
        "signup_trigger_received"
    );

    let results = join_all(
        added
            .iter()
            .map(|enrollment| notify_enrollment(repo, sender, roles, change, enrollment)),
    )
    .await;

    let mut outcome = SignupOutcome {
        new_enrollments: added.len(),
        ..Default::default()
    };

    for result in results {
        match result {
            Some((email, role)) => {
                outcome.emails_sent += usize::from(email == Step::Done);
                outcome.roles_granted += usize::from(role == Step::Done);
                outcome.failures +=
                    usize::from(email == Step::Failed) + usize::from(role == Step::Failed);
            }
            None => outcome.skipped += 1,
        }
    }

    info!(
        user_id = change.user_id(),
        emails_sent = outcome.emails_sent,
        roles_granted = outcome.roles_granted,
        skipped = outcome.skipped,
        failures = outcome.failures,
        "signup_trigger_complete"
    );

    outcome
}

/// Email and grant for one enrollment; `None` when its cohort is unreadable.
async fn notify_enrollment(
    repo: &Repository,
    sender: &dyn EmailSender,
    roles: &dyn RoleGrantor,
    change: &UserChange,
    enrollment: &Enrollment,
) -> Option<(Step, Step)> {
    let user = &change.after;
    let cohort_id = enrollment.cohort_id.as_str();

    let cohort = match repo.cohort(cohort_id).await {
        Ok(Some(cohort)) => cohort,
        Ok(None) => {
            warn!(user_id = change.user_id(), cohort_id = cohort_id, "signup_cohort_missing");
            return None;
        }
        Err(e) => {
            error!(
                user_id = change.user_id(),
                cohort_id = cohort_id,
                error = %e,
                "signup_cohort_read_failed"
            );
            return None;
        }
    };

    let params = resolve_params(repo, &cohort, enrollment.course_id.as_deref()).await;

    let email = match (user.email(), cohort.subject(), params.to_value()) {
        (Some(to), Some(subject), Ok(params)) => Some(Email {
            template: SIGNUP_TEMPLATE.to_string(),
            subject: subject.to_string(),
            to: to.to_string(),
            params,
        }),
        (to, subject, params) => {
            warn!(
                user_id = change.user_id(),
                cohort_id = cohort_id,
                has_email = to.is_some(),
                has_subject = subject.is_some(),
                params_error = ?params.err().map(|e| e.to_string()),
                "signup_email_skipped"
            );
            None
        }
    };

    let (email_step, role_step) = futures::join!(
        send_step(sender, email),
        grant_step(roles, user.discord_id(), cohort.role()),
    );

    Some((email_step, role_step))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::testing::{
        memory_repo, seed_platform, user_doc, RecordingGrantor, RecordingSender,
    };
    use crate::store::COHORTS;
    use serde_json::json;

    fn change(before: &[&str], after: &[&str], discord_id: Option<&str>) -> UserChange {
        UserChange {
            user_id: Some("u1".to_string()),
            before: serde_json::from_value(user_doc(Some("ana@example.com"), discord_id, before))
                .unwrap(),
            after: serde_json::from_value(user_doc(Some("ana@example.com"), discord_id, after))
                .unwrap(),
        }
    }

    #[test]
    fn test_new_enrollments_by_id() {
        let change = change(&["A"], &["A", "B"], None);
        let added = new_enrollments(&change.before, &change.after);
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].cohort_id, "B");
    }

    #[test]
    fn test_new_enrollments_ignores_other_fields() {
        let before: User = serde_json::from_value(json!({
            "cohorts": [{ "cohort_id": "A", "course_id": "old" }]
        }))
        .unwrap();
        let after: User = serde_json::from_value(json!({
            "cohorts": [{ "cohort_id": "A", "course_id": "new" }]
        }))
        .unwrap();
        assert!(new_enrollments(&before, &after).is_empty());
    }

    #[tokio::test]
    async fn test_one_new_enrollment_fires_once() {
        let (store, repo) = memory_repo();
        seed_platform(&store);
        let sender = RecordingSender::new();
        let roles = RecordingGrantor::new();

        let outcome =
            on_cohort_signup(&repo, &sender, &roles, &change(&["A"], &["A", "B"], Some("d1")))
                .await;

        assert_eq!(outcome.new_enrollments, 1);
        assert_eq!(outcome.emails_sent, 1);
        assert_eq!(outcome.roles_granted, 1);

        let sent = sender.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].template, SIGNUP_TEMPLATE);
        assert_eq!(sent[0].subject, "Bem-vindo ao B");
        assert_eq!(sent[0].to, "ana@example.com");
        assert_eq!(sent[0].params["course"]["title"], json!("Solidity"));
        assert_eq!(sent[0].params["cohort"]["discord_role"], json!("role-B"));

        assert_eq!(roles.grants(), vec![("d1".to_string(), "role-B".to_string())]);
    }

    #[tokio::test]
    async fn test_empty_before_fires_for_every_enrollment() {
        let (store, repo) = memory_repo();
        seed_platform(&store);
        let sender = RecordingSender::new();
        let roles = RecordingGrantor::new();

        let outcome =
            on_cohort_signup(&repo, &sender, &roles, &change(&[], &["A", "B"], Some("d1"))).await;

        assert_eq!(outcome.new_enrollments, 2);
        assert_eq!(outcome.emails_sent, 2);

        let mut subjects: Vec<String> = sender.sent().into_iter().map(|e| e.subject).collect();
        subjects.sort();
        assert_eq!(subjects, vec!["Bem-vindo ao A", "Bem-vindo ao B"]);

        let mut granted: Vec<String> = roles.grants().into_iter().map(|(_, r)| r).collect();
        granted.sort();
        assert_eq!(granted, vec!["role-A", "role-B"]);
    }

    #[tokio::test]
    async fn test_no_discord_account_still_sends_email() {
        let (store, repo) = memory_repo();
        seed_platform(&store);
        let sender = RecordingSender::new();
        let roles = RecordingGrantor::new();

        let outcome = on_cohort_signup(&repo, &sender, &roles, &change(&[], &["A"], None)).await;

        assert_eq!(outcome.emails_sent, 1);
        assert_eq!(outcome.roles_granted, 0);
        assert_eq!(outcome.failures, 0);
        assert!(roles.grants().is_empty());
    }

    #[tokio::test]
    async fn test_email_failure_does_not_block_grant() {
        let (store, repo) = memory_repo();
        seed_platform(&store);
        let sender = RecordingSender::failing_for("ana@example.com");
        let roles = RecordingGrantor::new();

        let outcome =
            on_cohort_signup(&repo, &sender, &roles, &change(&[], &["A"], Some("d1"))).await;

        assert_eq!(outcome.failures, 1);
        assert_eq!(outcome.roles_granted, 1);
        assert_eq!(roles.grants().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_cohort_is_skipped() {
        let (store, repo) = memory_repo();
        seed_platform(&store);
        let sender = RecordingSender::new();
        let roles = RecordingGrantor::new();

        let outcome =
            on_cohort_signup(&repo, &sender, &roles, &change(&[], &["gone", "A"], Some("d1")))
                .await;

        assert_eq!(outcome.new_enrollments, 2);
        assert_eq!(outcome.skipped, 1);
        assert_eq!(outcome.emails_sent, 1);
    }

    #[tokio::test]
    async fn test_missing_course_sends_null_course() {
        let (store, repo) = memory_repo();
        store.insert(
            COHORTS,
            "orphan",
            json!({ "course_id": "deleted", "email_content": { "subject": "Oi" } }),
        );
        let sender = RecordingSender::new();
        let roles = RecordingGrantor::new();

        let outcome =
            on_cohort_signup(&repo, &sender, &roles, &change(&[], &["orphan"], Some("d1"))).await;

        assert_eq!(outcome.emails_sent, 1);
        // cohort has no role configured
        assert_eq!(outcome.roles_granted, 0);
        assert_eq!(sender.sent()[0].params["course"], json!(null));
    }
}
