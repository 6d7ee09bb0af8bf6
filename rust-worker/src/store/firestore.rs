//! Firestore REST v1 document store.
//!
//! Firestore returns documents as typed values
//! (`{"stringValue": "..."}`, `{"mapValue": {"fields": {...}}}`, ...). They
//! are flattened to plain JSON here so the typed records can decode them
//! with serde. Timestamps become RFC 3339 strings.
//! Reference: https://cloud.google.com/firestore/docs/reference/rest/v1/Value
//!
//! Requests are authorized through [`Credentials`]; a 401 drops the cached
//! token so the next request fetches a fresh one.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::info;
use url::Url;

use super::auth::{Credentials, MetadataTokenProvider};
use super::{Document, DocumentStore, StoreError};
use crate::Config;

const PRODUCTION_HOST: &str = "https://firestore.googleapis.com";

/// Documents requested per page when scanning a collection.
const PAGE_SIZE: u32 = 300;

/// Firestore-backed document store.
pub struct FirestoreStore {
    client: Client,
    documents_url: Url,
    credentials: Credentials,
}

#[derive(Debug, Deserialize)]
struct RawDocument {
    name: String,
    #[serde(default)]
    fields: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    documents: Vec<RawDocument>,
    #[serde(default)]
    next_page_token: Option<String>,
}

impl FirestoreStore {
    /// Create a store for the project's default database.
    ///
    /// With an emulator host the client talks plain HTTP and skips auth.
    pub fn new(
        client: Client,
        project_id: &str,
        emulator_host: Option<&str>,
        credentials: Credentials,
    ) -> Result<Self, StoreError> {
        let (root, credentials) = match emulator_host {
            Some(host) => (format!("http://{}", host), Credentials::Anonymous),
            None => (PRODUCTION_HOST.to_string(), credentials),
        };

        let documents_url = Url::parse(&format!(
            "{}/v1/projects/{}/databases/(default)/documents",
            root, project_id
        ))
        .map_err(|e| StoreError::InvalidResponse(format!("bad Firestore URL: {}", e)))?;

        Ok(Self {
            client,
            documents_url,
            credentials,
        })
    }

    /// Build the store from configuration.
    pub fn from_config(client: Client, config: &Config) -> anyhow::Result<Self> {
        let project_id = config
            .firestore_project_id
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("FIRESTORE_PROJECT_ID is not set"))?;

        let credentials = match &config.firestore_access_token {
            Some(token) => Credentials::Static(token.clone()),
            None => Credentials::Metadata(MetadataTokenProvider::new(
                client.clone(),
                &config.gce_metadata_host,
            )),
        };
        let fixed_token = matches!(credentials, Credentials::Static(_));

        let store = Self::new(
            client,
            project_id,
            config.firestore_emulator_host.as_deref(),
            credentials,
        )?;

        info!(
            project_id = project_id,
            emulator = config.firestore_emulator_host.is_some(),
            fixed_token = fixed_token,
            "firestore_store_created"
        );

        Ok(store)
    }

    fn url(&self, segments: &[&str]) -> Result<Url, StoreError> {
        let mut url = self.documents_url.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::InvalidResponse("Firestore URL cannot be a base".into()))?
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, StoreError> {
        let request = match self.credentials.bearer_token().await? {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        let response = request.send().await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            self.credentials.invalidate().await;
        }
        Ok(response)
    }
}

#[async_trait]
impl DocumentStore for FirestoreStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        let url = self.url(&[collection, id])?;
        let response = self.send(self.client.get(url)).await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let doc: RawDocument = response.json().await?;
        decode_fields(&doc.fields).map(Some)
    }

    async fn list(&self, collection: &str) -> Result<Vec<Document<Value>>, StoreError> {
        let mut documents = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = self.url(&[collection])?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("pageSize", &PAGE_SIZE.to_string());
                if let Some(token) = &page_token {
                    query.append_pair("pageToken", token);
                }
            }

            let response = self.send(self.client.get(url)).await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(StoreError::Status {
                    status: status.as_u16(),
                    body,
                });
            }

            let page: ListResponse = response.json().await?;
            for doc in page.documents {
                let id = document_id(&doc.name).to_string();
                documents.push(Document::new(id, decode_fields(&doc.fields)?));
            }

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        info!(
            collection = collection,
            count = documents.len(),
            "firestore_scan_complete"
        );

        Ok(documents)
    }
}

/// Last path segment of a document resource name.
fn document_id(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

/// Flatten a Firestore `fields` map into a JSON object.
pub fn decode_fields(fields: &Map<String, Value>) -> Result<Value, StoreError> {
    let mut out = Map::with_capacity(fields.len());
    for (key, value) in fields {
        out.insert(key.clone(), decode_value(value)?);
    }
    Ok(Value::Object(out))
}

/// Flatten a single Firestore typed value.
pub fn decode_value(value: &Value) -> Result<Value, StoreError> {
    let (kind, inner) = value
        .as_object()
        .and_then(|obj| obj.iter().next())
        .ok_or_else(|| StoreError::InvalidResponse(format!("untyped value: {}", value)))?;

    match kind.as_str() {
        "nullValue" => Ok(Value::Null),
        // int64 values are transported as strings
        "integerValue" => match inner {
            Value::String(s) => s
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| StoreError::InvalidResponse(format!("bad integerValue: {}", s))),
            other => Ok(other.clone()),
        },
        "booleanValue" | "doubleValue" | "stringValue" | "timestampValue" | "bytesValue"
        | "referenceValue" | "geoPointValue" => Ok(inner.clone()),
        "arrayValue" => {
            let values = inner
                .get("values")
                .and_then(Value::as_array)
                .map(|values| values.iter().map(decode_value).collect::<Result<Vec<_>, _>>())
                .transpose()?
                .unwrap_or_default();
            Ok(Value::Array(values))
        }
        "mapValue" => match inner.get("fields").and_then(Value::as_object) {
            Some(fields) => decode_fields(fields),
            None => Ok(Value::Object(Map::new())),
        },
        other => Err(StoreError::InvalidResponse(format!(
            "unknown Firestore value type: {}",
            other
        ))),
    }
}
