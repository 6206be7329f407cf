//! Core domain types and service traits for enrollwatch
//!
//! This module defines the data flowing from the change feed to the
//! messaging channel and the trait contracts at the two external seams:
//! the document store and the messaging API.

use crate::error::{ConnectionError, DeliveryError};
use crate::feed::SubscriptionHandle;
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Field mapping of one document, decoded into plain JSON values.
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// A snapshot of one document at the time of a change.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    /// The document id (last segment of its path).
    pub id: String,
    /// The document's fields.
    pub fields: Fields,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }
}

/// One change in a collection relative to the previous snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Added(Document),
    Modified(Document),
    Removed(Document),
}

impl ChangeEvent {
    /// Lowercase tag, used for logging and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            ChangeEvent::Added(_) => "added",
            ChangeEvent::Modified(_) => "modified",
            ChangeEvent::Removed(_) => "removed",
        }
    }

    pub fn document(&self) -> &Document {
        match self {
            ChangeEvent::Added(doc) | ChangeEvent::Modified(doc) | ChangeEvent::Removed(doc) => doc,
        }
    }
}

/// A student registration as stored in the collection.
///
/// Every field is optional. Missing, null and blank values are all treated
/// as absent, and unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StudentRecord {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub telegram_username: Option<String>,
    pub source: Option<String>,
    pub partner_id: Option<String>,
}

impl StudentRecord {
    /// Extracts a record from a document's field mapping. Never fails.
    pub fn from_fields(fields: &Fields) -> Self {
        let get = |key: &str| fields.get(key).and_then(render_value);
        Self {
            name: get("name"),
            phone: get("phone"),
            email: get("email"),
            telegram_username: get("telegramUsername"),
            source: get("source"),
            partner_id: get("partnerId"),
        }
    }
}

fn render_value(value: &serde_json::Value) -> Option<String> {
    let rendered = match value {
        serde_json::Value::Null => return None,
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        other => other.to_string(),
    };
    if rendered.is_empty() {
        None
    } else {
        Some(rendered)
    }
}

/// The fixed destination all alerts are sent to.
///
/// Chat ids are often negative integers, so configuration may supply either
/// a string or a number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(transparent)]
pub struct ChatId(String);

impl ChatId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ChatId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Signed(i64),
            Unsigned(u64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(s) => ChatId(s.trim().to_string()),
            Raw::Signed(n) => ChatId(n.to_string()),
            Raw::Unsigned(n) => ChatId(n.to_string()),
        })
    }
}

/// Markup dialect the messaging API should apply to the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ParseMode {
    Markdown,
}

/// A formatted alert ready for delivery. Consumed by the delivery call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    text: String,
    destination: ChatId,
    parse_mode: ParseMode,
}

impl OutboundMessage {
    pub fn markdown(text: String, destination: ChatId) -> Self {
        Self {
            text,
            destination,
            parse_mode: ParseMode::Markdown,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn destination(&self) -> &ChatId {
        &self.destination
    }

    pub fn parse_mode(&self) -> ParseMode {
        self.parse_mode
    }
}

// =============================================================================
// Service Traits
// =============================================================================

/// Callback invoked by a change feed with each batch of changes.
pub type ChangeHandler = Box<dyn FnMut(Vec<ChangeEvent>) + Send + 'static>;

/// A document store that can stream the changes of a collection.
pub trait DocumentStore: Send + Sync {
    /// Subscribes `handler` to the changes of `collection`.
    ///
    /// The handler runs on a background thread owned by the store, never on
    /// the caller's thread. Its first invocation carries the current contents
    /// of the collection as `Added` events. This call may block until that
    /// first snapshot has been fetched.
    ///
    /// # Returns
    /// * `Ok(SubscriptionHandle)` owning the live subscription
    /// * `Err(ConnectionError)` if the store cannot be reached
    fn subscribe(
        &self,
        collection: &str,
        handler: ChangeHandler,
    ) -> Result<SubscriptionHandle, ConnectionError>;
}

/// Sends formatted alerts through a messaging API.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// A short name for logs (e.g. "telegram").
    fn name(&self) -> &str;

    /// Performs exactly one delivery attempt.
    ///
    /// # Returns
    /// * `Ok(())` if the API accepted the message
    /// * `Err(DeliveryError::TransportRejected)` if the API refused it
    /// * `Err(DeliveryError::Unexpected)` for every other failure
    async fn deliver(&self, message: OutboundMessage) -> Result<(), DeliveryError>;
}
