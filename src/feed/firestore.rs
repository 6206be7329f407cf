//! Firestore-backed change feed.
//!
//! The feed thread lists the collection through the Firestore REST API,
//! diffs each listing against the previous one, and hands the resulting
//! changes to the subscriber. The first listing happens before `subscribe`
//! returns so that an unreachable store fails startup.

use super::auth::{ServiceAccountKey, TokenSource};
use super::{SnapshotEntry, SnapshotTracker, SubscriptionHandle};
use crate::config::FirestoreConfig;
use crate::core::{ChangeHandler, Document, DocumentStore, Fields};
use crate::error::ConnectionError;
use crossbeam_channel::RecvTimeoutError;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const PAGE_SIZE: u32 = 300;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A `DocumentStore` reading a Firestore database over REST.
#[derive(Debug, Clone)]
pub struct FirestoreStore {
    project_id: String,
    database: String,
    base_url: String,
    poll_interval: Duration,
    key: ServiceAccountKey,
    emulator: bool,
}

impl FirestoreStore {
    pub fn new(config: &FirestoreConfig, key: ServiceAccountKey) -> Self {
        let (base_url, emulator) = match &config.emulator_host {
            Some(host) if !host.trim().is_empty() => (format!("http://{}", host.trim()), true),
            _ => (config.api_url.trim_end_matches('/').to_string(), false),
        };
        Self {
            project_id: key.project_id.clone(),
            database: config.database.clone(),
            base_url,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            key,
            emulator,
        }
    }

    /// The REST URL listing the documents of `collection`.
    pub fn collection_url(&self, collection: &str) -> String {
        format!(
            "{}/v1/projects/{}/databases/{}/documents/{}",
            self.base_url, self.project_id, self.database, collection
        )
    }

    fn token_source(&self) -> TokenSource {
        if self.emulator {
            TokenSource::emulator()
        } else {
            TokenSource::service_account(self.key.clone())
        }
    }
}

impl DocumentStore for FirestoreStore {
    fn subscribe(
        &self,
        collection: &str,
        mut handler: ChangeHandler,
    ) -> Result<SubscriptionHandle, ConnectionError> {
        let url = self.collection_url(collection);
        let mut tokens = self.token_source();
        let poll_interval = self.poll_interval;
        let collection_name = collection.to_string();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), ConnectionError>>(1);

        let handle = SubscriptionHandle::spawn(collection, move |stop_rx| {
            // The blocking client owns a runtime of its own and must be
            // created and dropped on this thread.
            let client = match reqwest::blocking::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
            {
                Ok(client) => client,
                Err(e) => {
                    let _ = ready_tx.send(Err(ConnectionError::Worker(e.to_string())));
                    return;
                }
            };

            let mut tracker = SnapshotTracker::new();
            match fetch_snapshot(&client, &mut tokens, &url) {
                Ok(snapshot) => {
                    let _ = ready_tx.send(Ok(()));
                    let changes = tracker.apply(snapshot);
                    info!(
                        collection = %collection_name,
                        documents = tracker.len(),
                        "Initial snapshot received"
                    );
                    handler(changes);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            }

            loop {
                match stop_rx.recv_timeout(poll_interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    _ => break,
                }
                match fetch_snapshot(&client, &mut tokens, &url) {
                    Ok(snapshot) => {
                        let changes = tracker.apply(snapshot);
                        if !changes.is_empty() {
                            debug!(collection = %collection_name, count = changes.len(), "Snapshot changed");
                            handler(changes);
                        }
                    }
                    Err(e) => {
                        warn!(collection = %collection_name, error = %e, "Snapshot poll failed, retrying next interval");
                    }
                }
            }
            debug!(collection = %collection_name, "Change feed thread exiting");
        })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(handle),
            Ok(Err(e)) => {
                error!(collection, error = %e, "Failed to open change feed");
                Err(e)
            }
            Err(_) => Err(ConnectionError::Worker(
                "feed thread exited before the first snapshot".to_string(),
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListDocumentsResponse {
    #[serde(default)]
    documents: Vec<RawDocument>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDocument {
    name: String,
    #[serde(default)]
    fields: serde_json::Map<String, Value>,
    #[serde(default)]
    create_time: String,
    #[serde(default)]
    update_time: String,
}

impl RawDocument {
    fn into_entry(self) -> SnapshotEntry {
        let id = self
            .name
            .rsplit('/')
            .next()
            .unwrap_or(self.name.as_str())
            .to_string();
        let fields: Fields = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), decode_value(v)))
            .collect();
        SnapshotEntry {
            document: Document::new(id, fields),
            created: self.create_time,
            revision: self.update_time,
        }
    }
}

/// Lists every document of the collection, following page tokens.
fn fetch_snapshot(
    client: &reqwest::blocking::Client,
    tokens: &mut TokenSource,
    url: &str,
) -> Result<Vec<SnapshotEntry>, ConnectionError> {
    let token = tokens.token(client)?;
    let mut entries = Vec::new();
    let mut page_token: Option<String> = None;

    loop {
        let mut request = client
            .get(url)
            .bearer_auth(&token)
            .query(&[("pageSize", PAGE_SIZE.to_string())]);
        if let Some(page) = &page_token {
            request = request.query(&[("pageToken", page)]);
        }

        let response = request
            .send()
            .map_err(|e| ConnectionError::Unreachable(e.to_string()))?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            let body = response.text().unwrap_or_default();
            return Err(ConnectionError::Authentication(format!("{}: {}", status, body)));
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ConnectionError::Unreachable(format!("{}: {}", status, body)));
        }

        let page: ListDocumentsResponse = response
            .json()
            .map_err(|e| ConnectionError::Unreachable(format!("malformed listing: {}", e)))?;
        entries.extend(page.documents.into_iter().map(RawDocument::into_entry));

        match page.next_page_token {
            Some(next) if !next.is_empty() => page_token = Some(next),
            _ => break,
        }
    }

    Ok(entries)
}

/// Decodes a Firestore typed value (`{"stringValue": "..."}` etc.) into
/// plain JSON. Unknown encodings are passed through unchanged.
pub fn decode_value(value: &Value) -> Value {
    let Some(object) = value.as_object() else {
        return value.clone();
    };
    let Some((kind, inner)) = object.iter().next() else {
        return Value::Null;
    };

    match kind.as_str() {
        "nullValue" => Value::Null,
        "booleanValue" | "doubleValue" => inner.clone(),
        "integerValue" => match inner {
            Value::String(s) => s
                .parse::<i64>()
                .map(Value::from)
                .unwrap_or_else(|_| inner.clone()),
            other => other.clone(),
        },
        "stringValue" | "timestampValue" | "referenceValue" | "bytesValue" => inner.clone(),
        "geoPointValue" => inner.clone(),
        "arrayValue" => Value::Array(
            inner
                .get("values")
                .and_then(Value::as_array)
                .map(|values| values.iter().map(decode_value).collect())
                .unwrap_or_default(),
        ),
        "mapValue" => Value::Object(
            inner
                .get("fields")
                .and_then(Value::as_object)
                .map(|fields| {
                    fields
                        .iter()
                        .map(|(k, v)| (k.clone(), decode_value(v)))
                        .collect()
                })
                .unwrap_or_default(),
        ),
        _ => value.clone(),
    }
}
