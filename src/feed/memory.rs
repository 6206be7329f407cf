//! An in-process document store for tests.
//!
//! Mutations are turned into change batches and pushed to every live
//! subscriber of the collection. Each subscriber gets its own feed thread,
//! so handlers run off the caller's thread just like with Firestore.

use super::SubscriptionHandle;
use crate::core::{ChangeEvent, ChangeHandler, Document, DocumentStore, Fields};
use crate::error::ConnectionError;
use crossbeam_channel::{select, Sender};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, Weak};

struct Subscriber {
    tx: Sender<Vec<ChangeEvent>>,
    // Upgradable while the feed thread is running.
    alive: Weak<()>,
}

#[derive(Default)]
struct Inner {
    documents: HashMap<String, BTreeMap<String, Fields>>,
    subscribers: HashMap<String, Vec<Subscriber>>,
    unreachable: bool,
}

/// A cloneable, thread-safe in-memory `DocumentStore`.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following `subscribe` fail with `ConnectionError`.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    /// Adds a document and publishes an `Added` change.
    pub fn insert(&self, collection: &str, id: &str, fields: Fields) -> usize {
        self.lock()
            .documents
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), fields.clone());
        self.emit(collection, vec![ChangeEvent::Added(Document::new(id, fields))])
    }

    /// Replaces a document and publishes a `Modified` change.
    pub fn update(&self, collection: &str, id: &str, fields: Fields) -> usize {
        self.lock()
            .documents
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), fields.clone());
        self.emit(collection, vec![ChangeEvent::Modified(Document::new(id, fields))])
    }

    /// Deletes a document and publishes a `Removed` change if it existed.
    pub fn remove(&self, collection: &str, id: &str) -> usize {
        let removed = self
            .lock()
            .documents
            .get_mut(collection)
            .and_then(|docs| docs.remove(id));
        match removed {
            Some(fields) => self.emit(collection, vec![ChangeEvent::Removed(Document::new(id, fields))]),
            None => 0,
        }
    }

    /// Publishes an arbitrary batch without touching stored documents.
    ///
    /// Returns the number of live subscribers that received it.
    pub fn emit(&self, collection: &str, batch: Vec<ChangeEvent>) -> usize {
        let mut inner = self.lock();
        let Some(subscribers) = inner.subscribers.get_mut(collection) else {
            return 0;
        };
        subscribers.retain(|sub| sub.tx.send(batch.clone()).is_ok());
        subscribers.len()
    }

    /// Number of live subscribers on `collection`.
    pub fn subscriber_count(&self, collection: &str) -> usize {
        let mut inner = self.lock();
        match inner.subscribers.get_mut(collection) {
            Some(subscribers) => {
                subscribers.retain(|sub| sub.alive.upgrade().is_some());
                subscribers.len()
            }
            None => 0,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl DocumentStore for MemoryStore {
    fn subscribe(
        &self,
        collection: &str,
        mut handler: ChangeHandler,
    ) -> Result<SubscriptionHandle, ConnectionError> {
        let (batch_tx, batch_rx) = crossbeam_channel::unbounded();
        let alive = Arc::new(());
        {
            let mut inner = self.lock();
            if inner.unreachable {
                return Err(ConnectionError::Unreachable("memory store offline".to_string()));
            }
            let initial: Vec<ChangeEvent> = inner
                .documents
                .get(collection)
                .map(|docs| {
                    docs.iter()
                        .map(|(id, fields)| ChangeEvent::Added(Document::new(id.clone(), fields.clone())))
                        .collect()
                })
                .unwrap_or_default();
            // Queued before registration so it is always the first batch.
            let _ = batch_tx.send(initial);
            inner
                .subscribers
                .entry(collection.to_string())
                .or_default()
                .push(Subscriber {
                    tx: batch_tx,
                    alive: Arc::downgrade(&alive),
                });
        }

        SubscriptionHandle::spawn(collection, move |stop_rx| {
            let _alive = alive;
            loop {
                select! {
                    recv(stop_rx) -> _ => break,
                    recv(batch_rx) -> batch => match batch {
                        Ok(batch) => handler(batch),
                        Err(_) => break,
                    },
                }
            }
        })
    }
}
