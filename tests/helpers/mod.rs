#![allow(dead_code)]

pub mod mock_messenger;

use enrollwatch::core::Fields;
use serde_json::Value;
use std::time::Duration;

pub use mock_messenger::MockMessenger;

/// Converts a `json!` object literal into document fields.
pub fn fields(value: Value) -> Fields {
    value
        .as_object()
        .cloned()
        .expect("test fields must be a JSON object")
}

/// Polls `condition` until it holds or `timeout` elapses.
pub async fn eventually<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(timeout, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
}
