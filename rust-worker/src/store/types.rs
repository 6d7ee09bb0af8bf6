//! Typed records for the documents the handlers read.
//!
//! Documents are owned by the platform application. Only the fields the
//! handlers act on are typed; everything else is kept in `extra` so it still
//! reaches the email templates untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Collection holding user documents.
pub const USERS: &str = "users";

/// Collection holding cohort (course offering) documents.
pub const COHORTS: &str = "cohorts";

/// Collection holding course documents.
pub const COURSES: &str = "courses";

/// A document together with its id.
#[derive(Debug, Clone, PartialEq)]
pub struct Document<T> {
    pub id: String,
    pub data: T,
}

impl<T> Document<T> {
    pub fn new(id: impl Into<String>, data: T) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }
}

/// A platform user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub discord: Option<DiscordAccount>,
    /// Enrollments in signup order. Entries without a cohort id are dropped.
    #[serde(default, deserialize_with = "usable_enrollments")]
    pub cohorts: Vec<Enrollment>,
}

impl User {
    /// Email address, if present and non-blank.
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref().filter(|e| !e.trim().is_empty())
    }

    /// Linked Discord account id, if present and non-blank.
    pub fn discord_id(&self) -> Option<&str> {
        self.discord
            .as_ref()
            .and_then(|d| d.id.as_deref())
            .filter(|id| !id.is_empty())
    }

    /// Whether any enrollment references the cohort.
    pub fn is_enrolled_in(&self, cohort_id: &str) -> bool {
        self.cohorts.iter().any(|e| e.cohort_id == cohort_id)
    }

    /// Whether the first enrollment references the cohort.
    pub fn first_enrollment_is(&self, cohort_id: &str) -> bool {
        self.cohorts
            .first()
            .map(|e| e.cohort_id == cohort_id)
            .unwrap_or(false)
    }
}

/// The Discord account a user linked.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscordAccount {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

/// A user's membership in one cohort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enrollment {
    pub cohort_id: String,
    #[serde(default)]
    pub course_id: Option<String>,
}

impl Enrollment {
    pub fn new(cohort_id: impl Into<String>) -> Self {
        Self {
            cohort_id: cohort_id.into(),
            course_id: None,
        }
    }
}

/// A scheduled run of a course.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cohort {
    #[serde(default)]
    pub course_id: Option<String>,
    #[serde(default, rename = "kickoffStartTime")]
    pub kickoff_start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub discord_role: Option<String>,
    #[serde(default)]
    pub email_content: Option<EmailContent>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Cohort {
    /// Subject line configured for this cohort's emails.
    pub fn subject(&self) -> Option<&str> {
        self.email_content
            .as_ref()
            .and_then(|c| c.subject.as_deref())
            .filter(|s| !s.is_empty())
    }

    /// Discord role granted to cohort members.
    pub fn role(&self) -> Option<&str> {
        self.discord_role.as_deref().filter(|r| !r.is_empty())
    }
}

/// Email copy embedded in a cohort.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmailContent {
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A course; only the title is typed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Course {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Decode an enrollment list, dropping entries that are not enrollments.
///
/// Legacy user documents carry entries with no `cohort_id` (or nulls); one
/// of those must not make the whole user unreadable. A `cohorts` value that
/// is not a list is still an error.
fn usable_enrollments<'de, D>(deserializer: D) -> Result<Vec<Enrollment>, D::Error>
where
    D: Deserializer<'de>,
{
    let entries = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();

    Ok(entries
        .into_iter()
        .filter_map(|entry| serde_json::from_value::<Enrollment>(entry).ok())
        .filter(|e| !e.cohort_id.is_empty())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_user_null_cohorts() {
        let user: User = serde_json::from_value(json!({
            "email": "ana@example.com",
            "cohorts": null
        }))
        .unwrap();

        assert!(user.cohorts.is_empty());
        assert_eq!(user.email(), Some("ana@example.com"));
        assert_eq!(user.discord_id(), None);
    }

    #[test]
    fn test_user_enrollment_checks() {
        let user: User = serde_json::from_value(json!({
            "discord": { "id": "", "username": "ana" },
            "cohorts": [{ "cohort_id": "x" }, { "cohort_id": "y", "course_id": "c1" }]
        }))
        .unwrap();

        assert!(user.is_enrolled_in("y"));
        assert!(!user.first_enrollment_is("y"));
        assert!(user.first_enrollment_is("x"));
        // blank ids count as not linked
        assert_eq!(user.discord_id(), None);
        assert_eq!(user.email(), None);
    }

    #[test]
    fn test_user_skips_legacy_enrollments() {
        let user: User = serde_json::from_value(json!({
            "email": "ana@example.com",
            "cohorts": [
                { "course_id": "x" },
                null,
                { "cohort_id": "" },
                { "cohort_id": 7 },
                { "cohort_id": "A", "course_id": "solidity" }
            ]
        }))
        .unwrap();

        assert_eq!(user.cohorts.len(), 1);
        assert_eq!(user.cohorts[0].cohort_id, "A");
        assert!(user.first_enrollment_is("A"));
    }

    #[test]
    fn test_user_cohorts_must_be_a_list() {
        let result = serde_json::from_value::<User>(json!({ "cohorts": "A" }));
        assert!(result.is_err());
    }

    #[test]
    fn test_cohort_keeps_unknown_fields() {
        let cohort: Cohort = serde_json::from_value(json!({
            "course_id": "solidity",
            "kickoffStartTime": "2024-05-01T22:00:00.250Z",
            "discord_role": "123",
            "email_content": { "subject": "Bem-vindo", "body": "..." },
            "calendar_url": "https://example.com/cal"
        }))
        .unwrap();

        assert_eq!(cohort.subject(), Some("Bem-vindo"));
        assert_eq!(cohort.role(), Some("123"));
        assert!(cohort.kickoff_start_time.is_some());
        assert_eq!(cohort.extra["calendar_url"], json!("https://example.com/cal"));

        let value = serde_json::to_value(&cohort).unwrap();
        assert_eq!(value["email_content"]["body"], json!("..."));
        assert_eq!(value["calendar_url"], json!("https://example.com/cal"));
    }
}
