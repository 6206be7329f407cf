//! Change feed subscriptions.
//!
//! A subscription is a dedicated OS thread that owns the connection to the
//! store and invokes the subscriber's handler with batches of changes. The
//! thread lives outside the async scheduler; handlers must only filter and
//! forward.

pub mod auth;
pub mod firestore;
#[cfg(any(test, feature = "test-utils"))]
pub mod memory;

use crate::core::{ChangeEvent, Document};
use crate::error::ConnectionError;
use crossbeam_channel::{Receiver, Sender};
use std::collections::HashMap;
use std::sync::Mutex;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

pub use firestore::FirestoreStore;
#[cfg(any(test, feature = "test-utils"))]
pub use memory::MemoryStore;

/// Ownership token for a live change feed.
///
/// Dropping the handle releases the subscription as well, but shutdown code
/// should call [`SubscriptionHandle::release`] explicitly.
pub struct SubscriptionHandle {
    collection: String,
    stop_tx: Mutex<Option<Sender<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("collection", &self.collection)
            .field("active", &self.is_active())
            .finish()
    }
}

impl SubscriptionHandle {
    /// Spawns the feed thread for `collection`.
    ///
    /// `body` receives the stop receiver. It must return once that receiver
    /// reports a message or a disconnect.
    pub(crate) fn spawn<F>(collection: &str, body: F) -> Result<Self, ConnectionError>
    where
        F: FnOnce(Receiver<()>) + Send + 'static,
    {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let worker = thread::Builder::new()
            .name(format!("feed-{}", collection))
            .spawn(move || body(stop_rx))
            .map_err(|e| ConnectionError::Worker(e.to_string()))?;

        debug!(collection, "Change feed thread started");
        Ok(Self {
            collection: collection.to_string(),
            stop_tx: Mutex::new(Some(stop_tx)),
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Returns `true` until the subscription has been released.
    pub fn is_active(&self) -> bool {
        self.stop_tx
            .lock()
            .map(|tx| tx.is_some())
            .unwrap_or(false)
    }

    /// Stops the feed and waits for its thread to exit.
    ///
    /// Idempotent. Once this returns the handler will not be invoked again.
    /// Blocks for as long as an in-progress fetch takes, so async callers
    /// should run it on the blocking pool.
    pub fn release(&self) {
        let stop_tx = match self.stop_tx.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(stop_tx) = stop_tx else {
            return;
        };
        // A full buffer means a stop is already pending.
        let _ = stop_tx.try_send(());
        drop(stop_tx);

        let worker = match self.worker.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(worker) = worker {
            // Releasing from inside the handler cannot join its own thread;
            // the loop exits as soon as the handler returns.
            if worker.thread().id() == thread::current().id() {
                return;
            }
            if worker.join().is_err() {
                warn!(collection = %self.collection, "Change feed thread panicked");
            }
        }
        info!(collection = %self.collection, "Change feed subscription released");
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// A document as seen in one full snapshot of a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotEntry {
    pub document: Document,
    /// Opaque creation marker. A different value under the same id means the
    /// document was deleted and created again.
    pub created: String,
    /// Opaque revision marker; a different value means the document changed.
    pub revision: String,
}

#[derive(Debug)]
struct KnownDocument {
    created: String,
    revision: String,
    document: Document,
}

/// Turns consecutive full snapshots into change batches.
///
/// The first snapshot is reported as all `Added`. Afterwards each batch is
/// ordered removals first, then additions, then modifications, each group
/// in snapshot order. A document re-created under a known id is reported as
/// a removal of the old one followed by an addition.
#[derive(Debug, Default)]
pub struct SnapshotTracker {
    known: HashMap<String, KnownDocument>,
}

impl SnapshotTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in the last applied snapshot.
    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    pub fn apply(&mut self, snapshot: Vec<SnapshotEntry>) -> Vec<ChangeEvent> {
        let mut previous = std::mem::take(&mut self.known);
        let mut removed = Vec::new();
        let mut added = Vec::new();
        let mut modified = Vec::new();

        for entry in snapshot {
            let id = entry.document.id.clone();
            match previous.remove(&id) {
                None => added.push(ChangeEvent::Added(entry.document.clone())),
                Some(known) if known.created != entry.created => {
                    removed.push(known.document);
                    added.push(ChangeEvent::Added(entry.document.clone()));
                }
                Some(known) if known.revision != entry.revision => {
                    modified.push(ChangeEvent::Modified(entry.document.clone()))
                }
                Some(_) => {}
            }
            self.known.insert(
                id,
                KnownDocument {
                    created: entry.created,
                    revision: entry.revision,
                    document: entry.document,
                },
            );
        }

        removed.extend(previous.into_values().map(|known| known.document));
        removed.sort_by(|a, b| a.id.cmp(&b.id));

        let mut changes: Vec<ChangeEvent> = removed.into_iter().map(ChangeEvent::Removed).collect();
        changes.extend(added);
        changes.extend(modified);
        changes
    }
}
