//! Fakes and fixtures shared by the handler tests.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::queue::{EmailQueue, QueuedEmailMessage};
use crate::services::{
    DeliveryReceipt, Email, EmailError, EmailSender, RoleError, RoleGrant, RoleGrantor,
};
use crate::store::{MemoryStore, Repository, COHORTS, COURSES, USERS};

pub fn memory_repo() -> (Arc<MemoryStore>, Repository) {
    let store = Arc::new(MemoryStore::new());
    let repo = Repository::new(store.clone());
    (store, repo)
}

/// Cohort document with a role and subject derived from its id.
pub fn cohort_doc(id: &str) -> Value {
    json!({
        "course_id": "solidity",
        "discord_role": format!("role-{}", id),
        "email_content": { "subject": format!("Bem-vindo ao {}", id) }
    })
}

/// Seed the solidity course and cohorts A, B, X and Y.
pub fn seed_platform(store: &MemoryStore) {
    store.insert(COURSES, "solidity", json!({ "title": "Solidity", "level": "intro" }));
    for id in ["A", "B", "X", "Y"] {
        store.insert(COHORTS, id, cohort_doc(id));
    }
}

pub fn user_doc(email: Option<&str>, discord_id: Option<&str>, cohorts: &[&str]) -> Value {
    let enrollments: Vec<Value> = cohorts.iter().map(|c| json!({ "cohort_id": c })).collect();
    json!({
        "email": email,
        "discord": discord_id.map(|id| json!({ "id": id, "username": format!("user-{}", id) })),
        "cohorts": enrollments
    })
}

pub fn insert_user(
    store: &MemoryStore,
    id: &str,
    email: Option<&str>,
    discord_id: Option<&str>,
    cohorts: &[&str],
) {
    store.insert(USERS, id, user_doc(email, discord_id, cohorts));
}

/// Records every email; fails for one address when asked to.
#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<Email>>,
    fail_for: Option<(String, u16)>,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects mail to `address` with a 400.
    pub fn failing_for(address: &str) -> Self {
        Self::failing_with(address, 400)
    }

    pub fn failing_with(address: &str, status: u16) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail_for: Some((address.to_string(), status)),
        }
    }

    pub fn sent(&self) -> Vec<Email> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailSender for RecordingSender {
    async fn send(&self, email: &Email) -> Result<DeliveryReceipt, EmailError> {
        if let Some((address, status)) = &self.fail_for {
            if *address == email.to {
                return Err(EmailError::Rejected {
                    status: *status,
                    body: "rejected".to_string(),
                });
            }
        }
        self.sent.lock().unwrap().push(email.clone());
        Ok(DeliveryReceipt {
            id: Some(format!("<{}>", email.to)),
            message: "Queued. Thank you.".to_string(),
        })
    }
}

/// Records `(account, role)` for every grant actually sent.
#[derive(Default)]
pub struct RecordingGrantor {
    grants: Mutex<Vec<(String, String)>>,
    fail_for: Option<String>,
}

impl RecordingGrantor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for(account_id: &str) -> Self {
        Self {
            grants: Mutex::new(Vec::new()),
            fail_for: Some(account_id.to_string()),
        }
    }

    pub fn grants(&self) -> Vec<(String, String)> {
        self.grants.lock().unwrap().clone()
    }
}

#[async_trait]
impl RoleGrantor for RecordingGrantor {
    async fn grant_role(
        &self,
        account_id: Option<&str>,
        role_id: &str,
    ) -> Result<RoleGrant, RoleError> {
        let Some(account_id) = account_id.filter(|id| !id.is_empty()) else {
            return Ok(RoleGrant::Skipped);
        };
        if self.fail_for.as_deref() == Some(account_id) {
            return Err(RoleError::Rejected {
                status: 403,
                body: "Missing Permissions".to_string(),
            });
        }
        self.grants
            .lock()
            .unwrap()
            .push((account_id.to_string(), role_id.to_string()));
        Ok(RoleGrant::Granted)
    }
}

/// Keeps published messages in their encoded form.
#[derive(Default)]
pub struct RecordingQueue {
    payloads: Mutex<Vec<String>>,
}

impl RecordingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn payloads(&self) -> Vec<String> {
        self.payloads.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<QueuedEmailMessage> {
        self.payloads()
            .iter()
            .map(|p| QueuedEmailMessage::decode(p.as_bytes()).unwrap())
            .collect()
    }
}

#[async_trait]
impl EmailQueue for RecordingQueue {
    async fn publish(&self, message: &QueuedEmailMessage) -> Result<()> {
        self.payloads.lock().unwrap().push(message.encode()?);
        Ok(())
    }
}
