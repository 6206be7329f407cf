//! A mock messenger that records every delivery attempt.

use async_trait::async_trait;
use enrollwatch::core::{Messenger, OutboundMessage};
use enrollwatch::error::DeliveryError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Debug, Default)]
pub struct MockMessenger {
    attempts: Arc<Mutex<Vec<OutboundMessage>>>,
    reject_containing: Arc<Mutex<Vec<String>>>,
    delay: Duration,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl MockMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every delivery takes at least `delay`.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Rejects any message whose text contains `needle`.
    pub fn reject_containing(&self, needle: &str) {
        self.reject_containing.lock().unwrap().push(needle.to_string());
    }

    /// All attempts so far, successful or not, in order.
    pub fn attempts(&self) -> Vec<OutboundMessage> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }

    /// Highest number of deliveries that were running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Messenger for MockMessenger {
    fn name(&self) -> &str {
        "mock"
    }

    async fn deliver(&self, message: OutboundMessage) -> Result<(), DeliveryError> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let rejected = self
            .reject_containing
            .lock()
            .unwrap()
            .iter()
            .any(|needle| message.text().contains(needle.as_str()));
        self.attempts.lock().unwrap().push(message);

        if rejected {
            Err(DeliveryError::TransportRejected {
                code: 400,
                description: "Bad Request: chat not found".to_string(),
            })
        } else {
            Ok(())
        }
    }
}
