//! Enqueue one email per user enrolled in a cohort.
//!
//! The HTTP endpoint acknowledges before this runs; the summary is only
//! logged. A user matches when ANY of their enrollments is the cohort.

use std::collections::HashMap;

use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

use super::params::resolve_params;
use crate::queue::{EmailQueue, QueuedEmailMessage};
use crate::store::{Repository, StoreError};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnqueueSummary {
    /// Users enrolled in the cohort with an email address
    pub matched: usize,
    /// Messages handed to the queue
    pub dispatched: usize,
    pub failed: usize,
}

/// Publish a `template` email for every user enrolled in `cohort_id`.
pub async fn enqueue_cohort_emails(
    repo: &Repository,
    queue: &dyn EmailQueue,
    cohort_id: &str,
    template: &str,
) -> Result<EnqueueSummary, StoreError> {
    let Some(cohort) = repo.cohort(cohort_id).await? else {
        warn!(cohort_id = cohort_id, "bulk_email_cohort_missing");
        return Ok(EnqueueSummary::default());
    };

    let Some(subject) = cohort.subject().map(str::to_string) else {
        warn!(cohort_id = cohort_id, "bulk_email_cohort_without_subject");
        return Ok(EnqueueSummary::default());
    };

    let users = repo.users().await?;
    info!(cohort_id = cohort_id, users = users.len(), "bulk_email_scan");

    // Recipient address and the course id their enrollment names.
    let recipients: Vec<(&str, Option<&str>)> = users
        .iter()
        .filter_map(|doc| {
            let enrollment = doc.data.cohorts.iter().find(|e| e.cohort_id == cohort_id)?;
            let to = doc.data.email()?;
            Some((to, enrollment.course_id.as_deref()))
        })
        .collect();

    // The enrollment's course only matters when the cohort names none, so
    // params are resolved once per distinct fallback.
    let fallback = |course_id: Option<&str>| match cohort.course_id {
        Some(_) => None,
        None => course_id.map(str::to_string),
    };

    let mut params_by_course: HashMap<Option<String>, Option<Value>> = HashMap::new();
    for (_, course_id) in &recipients {
        let key = fallback(*course_id);
        if params_by_course.contains_key(&key) {
            continue;
        }
        let params = match resolve_params(repo, &cohort, key.as_deref()).await.to_value() {
            Ok(params) => Some(params),
            Err(e) => {
                error!(cohort_id = cohort_id, error = %e, "bulk_email_params_failed");
                None
            }
        };
        params_by_course.insert(key, params);
    }

    let mut unresolved = 0;
    let mut messages = Vec::with_capacity(recipients.len());
    for (to, course_id) in &recipients {
        match params_by_course.get(&fallback(*course_id)).cloned().flatten() {
            Some(params) => messages.push(QueuedEmailMessage::new(
                template.to_string(),
                subject.clone(),
                to.to_string(),
                params,
            )),
            None => unresolved += 1,
        }
    }

    if unresolved > 0 {
        warn!(cohort_id = cohort_id, skipped = unresolved, "bulk_email_recipients_skipped");
    }

    let results = join_all(messages.iter().map(|message| async move {
        let result = queue.publish(message).await;
        if let Err(e) = &result {
            error!(to = %message.to, error = %e, "bulk_email_publish_failed");
        }
        result.is_ok()
    }))
    .await;

    let dispatched = results.iter().filter(|ok| **ok).count();

    Ok(EnqueueSummary {
        matched: recipients.len(),
        dispatched,
        failed: recipients.len() - dispatched,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::testing::{insert_user, memory_repo, seed_platform, RecordingQueue};
    use crate::notify::EmailParams;
    use crate::queue::QueuedEmailMessage;
    use crate::store::{COHORTS, USERS};
    use serde_json::json;

    #[tokio::test]
    async fn test_later_enrollment_is_included() {
        let (store, repo) = memory_repo();
        seed_platform(&store);
        insert_user(&store, "u1", Some("ana@example.com"), Some("d1"), &["X", "Y"]);
        let queue = RecordingQueue::new();

        let summary = enqueue_cohort_emails(&repo, &queue, "Y", "course_day_1").await.unwrap();

        assert_eq!(summary.dispatched, 1);
        assert_eq!(queue.messages()[0].to, "ana@example.com");
    }

    #[tokio::test]
    async fn test_users_without_email_or_enrollment_are_skipped() {
        let (store, repo) = memory_repo();
        seed_platform(&store);
        insert_user(&store, "u1", Some("ana@example.com"), None, &["A"]);
        insert_user(&store, "u2", None, None, &["A"]);
        insert_user(&store, "u3", Some(""), None, &["A"]);
        insert_user(&store, "u4", Some("bia@example.com"), None, &["B"]);
        let queue = RecordingQueue::new();

        let summary = enqueue_cohort_emails(&repo, &queue, "A", "course_day_1").await.unwrap();

        assert_eq!(
            summary,
            EnqueueSummary {
                matched: 1,
                dispatched: 1,
                failed: 0
            }
        );
    }

    #[tokio::test]
    async fn test_enqueued_message_round_trips() {
        let (store, repo) = memory_repo();
        seed_platform(&store);
        insert_user(&store, "u1", Some("ana@example.com"), None, &["A"]);
        let queue = RecordingQueue::new();

        enqueue_cohort_emails(&repo, &queue, "A", "course_day_2").await.unwrap();

        let payloads = queue.payloads();
        assert_eq!(payloads.len(), 1);
        let decoded = QueuedEmailMessage::decode(payloads[0].as_bytes()).unwrap();

        let cohort = repo.cohort("A").await.unwrap();
        let course = repo.course("solidity").await.unwrap();
        let expected = QueuedEmailMessage::new(
            "course_day_2".to_string(),
            "Bem-vindo ao A".to_string(),
            "ana@example.com".to_string(),
            EmailParams { cohort, course }.to_value().unwrap(),
        );
        assert_eq!(decoded, expected);
        assert_eq!(decoded.params["course"]["level"], json!("intro"));
    }

    #[tokio::test]
    async fn test_unknown_cohort_publishes_nothing() {
        let (store, repo) = memory_repo();
        seed_platform(&store);
        insert_user(&store, "u1", Some("ana@example.com"), None, &["nope"]);
        let queue = RecordingQueue::new();

        let summary = enqueue_cohort_emails(&repo, &queue, "nope", "t").await.unwrap();

        assert_eq!(summary, EnqueueSummary::default());
        assert!(queue.payloads().is_empty());
    }

    #[tokio::test]
    async fn test_enrollment_course_fills_in_for_cohort() {
        let (store, repo) = memory_repo();
        seed_platform(&store);
        store.insert(COHORTS, "Z", json!({ "email_content": { "subject": "Aula 1" } }));
        store.insert(
            USERS,
            "u1",
            json!({
                "email": "ana@example.com",
                "cohorts": [{ "cohort_id": "Z", "course_id": "solidity" }]
            }),
        );
        store.insert(
            USERS,
            "u2",
            json!({ "email": "bia@example.com", "cohorts": [{ "cohort_id": "Z" }] }),
        );
        let queue = RecordingQueue::new();

        let summary = enqueue_cohort_emails(&repo, &queue, "Z", "course_day_1").await.unwrap();
        assert_eq!(summary.dispatched, 2);

        let messages = queue.messages();
        let ana = messages.iter().find(|m| m.to == "ana@example.com").unwrap();
        let bia = messages.iter().find(|m| m.to == "bia@example.com").unwrap();
        assert_eq!(ana.params["course"]["title"], json!("Solidity"));
        assert_eq!(bia.params["course"], json!(null));
    }

    #[tokio::test]
    async fn test_cohort_course_wins_over_enrollment() {
        let (store, repo) = memory_repo();
        seed_platform(&store);
        store.insert(
            USERS,
            "u1",
            json!({
                "email": "ana@example.com",
                "cohorts": [{ "cohort_id": "A", "course_id": "other" }]
            }),
        );
        let queue = RecordingQueue::new();

        enqueue_cohort_emails(&repo, &queue, "A", "course_day_1").await.unwrap();

        assert_eq!(queue.messages()[0].params["course"]["title"], json!("Solidity"));
    }
}
