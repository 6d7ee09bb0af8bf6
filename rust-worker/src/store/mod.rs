//! Document store access.
//!
//! The store itself is external; handlers see it through two operations, a
//! keyed read and a full collection scan, both returning raw JSON documents.
//! [`Repository`] decodes those documents into typed records.
//!
//! ## Backends
//!
//! ```text
//! FirestoreStore  → Firestore REST v1 (production, emulator)
//! MemoryStore     → in-process map (tests, fixtures)
//! ```

pub mod auth;
pub mod firestore;
pub mod memory;
pub mod types;

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

pub use firestore::FirestoreStore;
pub use memory::MemoryStore;
pub use types::{
    Cohort, Course, DiscordAccount, Document, EmailContent, Enrollment, User, COHORTS, COURSES,
    USERS,
};

/// Errors raised while reading documents.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("store returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("document {collection}/{id} is malformed: {source}")]
    Malformed {
        collection: String,
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid store response: {0}")]
    InvalidResponse(String),
}

/// Raw document access.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read one document; `None` when it does not exist.
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError>;

    /// Read every document in a collection.
    async fn list(&self, collection: &str) -> Result<Vec<Document<Value>>, StoreError>;
}

/// Typed view over a [`DocumentStore`].
#[derive(Clone)]
pub struct Repository {
    store: Arc<dyn DocumentStore>,
}

impl Repository {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn cohort(&self, id: &str) -> Result<Option<Cohort>, StoreError> {
        self.get(COHORTS, id).await
    }

    pub async fn course(&self, id: &str) -> Result<Option<Course>, StoreError> {
        self.get(COURSES, id).await
    }

    pub async fn users(&self) -> Result<Vec<Document<User>>, StoreError> {
        self.list(USERS).await
    }

    pub async fn cohorts(&self) -> Result<Vec<Document<Cohort>>, StoreError> {
        self.list(COHORTS).await
    }

    async fn get<T: DeserializeOwned>(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<T>, StoreError> {
        // An empty id can never resolve, and Firestore would treat it as a
        // collection path.
        if id.is_empty() {
            return Ok(None);
        }

        match self.store.get(collection, id).await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|source| StoreError::Malformed {
                    collection: collection.to_string(),
                    id: id.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    /// Scan a collection, skipping documents that do not decode.
    async fn list<T: DeserializeOwned>(
        &self,
        collection: &str,
    ) -> Result<Vec<Document<T>>, StoreError> {
        let raw = self.store.list(collection).await?;
        let total = raw.len();

        let docs: Vec<Document<T>> = raw
            .into_iter()
            .filter_map(|doc| match serde_json::from_value(doc.data) {
                Ok(data) => Some(Document::new(doc.id, data)),
                Err(e) => {
                    warn!(
                        collection = collection,
                        id = %doc.id,
                        error = %e,
                        "store_document_skipped"
                    );
                    None
                }
            })
            .collect();

        if docs.len() != total {
            warn!(
                collection = collection,
                total = total,
                decoded = docs.len(),
                "store_scan_partial"
            );
        }

        Ok(docs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_repository_missing_document() {
        let repo = Repository::new(Arc::new(MemoryStore::new()));
        assert!(repo.cohort("nope").await.unwrap().is_none());
        assert!(repo.course("").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_repository_malformed_keyed_read() {
        let store = MemoryStore::new();
        store.insert(COHORTS, "bad", json!({ "discord_role": 42 }));
        let repo = Repository::new(Arc::new(store));

        let err = repo.cohort("bad").await.unwrap_err();
        assert!(matches!(err, StoreError::Malformed { .. }));
    }

    #[tokio::test]
    async fn test_repository_scan_skips_malformed() {
        let store = MemoryStore::new();
        store.insert(USERS, "u1", json!({ "email": "a@example.com", "cohorts": [] }));
        store.insert(USERS, "u2", json!({ "cohorts": "not-a-list" }));
        let repo = Repository::new(Arc::new(store));

        let users = repo.users().await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].id, "u1");
    }
}
