//! Wiring between the change feed and the dispatcher.
//!
//! The feed handler runs on the feed thread. It only filters additions and
//! hands each new record to the main loop; the network call happens there.

use crate::core::{ChangeEvent, DocumentStore, StudentRecord};
use crate::error::ConnectionError;
use crate::feed::SubscriptionHandle;
use crate::formatting::PLACEHOLDER;
use crate::notification::Dispatcher;
use crate::scheduler::MainLoopHandle;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Subscribes to `collection` and notifies about every added document.
pub fn watch_collection(
    store: &dyn DocumentStore,
    collection: &str,
    main_loop: MainLoopHandle,
    dispatcher: Arc<Dispatcher>,
) -> Result<SubscriptionHandle, ConnectionError> {
    info!(collection, "Subscribing to collection changes");
    store.subscribe(
        collection,
        Box::new(move |changes| {
            forward_additions(changes, &main_loop, &dispatcher);
        }),
    )
}

/// Schedules one delivery per `Added` change and skips everything else.
///
/// Returns the number of deliveries that were scheduled.
pub fn forward_additions(
    changes: Vec<ChangeEvent>,
    main_loop: &MainLoopHandle,
    dispatcher: &Arc<Dispatcher>,
) -> usize {
    let mut scheduled = 0;
    for change in changes {
        metrics::counter!("changes_received_total", "kind" => change.kind()).increment(1);
        let document = match change {
            ChangeEvent::Added(document) => document,
            other => {
                debug!(kind = other.kind(), id = %other.document().id, "Ignoring change");
                continue;
            }
        };

        let record = StudentRecord::from_fields(&document.fields);
        info!(
            id = %document.id,
            student = record.name.as_deref().unwrap_or(PLACEHOLDER),
            "New student detected"
        );

        let dispatcher = dispatcher.clone();
        match main_loop.schedule(async move { dispatcher.notify(record).await }) {
            Ok(()) => scheduled += 1,
            Err(e) => {
                metrics::counter!("handoff_failures_total").increment(1);
                error!(id = %document.id, error = %e, "Could not hand off notification");
            }
        }
    }
    scheduled
}
