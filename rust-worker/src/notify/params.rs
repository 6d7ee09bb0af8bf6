//! Template parameters shared by the cohort emails.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;

use crate::store::{Cohort, Course, Repository};

/// Variables every cohort email template receives.
///
/// Either side is `null` when its document does not resolve; templates are
/// expected to cope with that.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmailParams {
    pub cohort: Option<Cohort>,
    pub course: Option<Course>,
}

impl EmailParams {
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// Build the params for a cohort, resolving its course.
///
/// The course comes from the cohort's `course_id`, or from the enrollment's
/// own `course_id` when the cohort lacks one. Store failures degrade to a
/// missing course.
pub async fn resolve_params(
    repo: &Repository,
    cohort: &Cohort,
    enrollment_course_id: Option<&str>,
) -> EmailParams {
    let course_id = cohort.course_id.as_deref().or(enrollment_course_id);

    let course = match course_id {
        Some(id) => match repo.course(id).await {
            Ok(course) => course,
            Err(e) => {
                error!(course_id = id, error = %e, "course_read_failed");
                None
            }
        },
        None => None,
    };

    EmailParams {
        cohort: Some(cohort.clone()),
        course,
    }
}
