//! The dispatcher formats one record into one message and attempts delivery
//! exactly once. Failures are logged and absorbed.

use crate::core::{ChatId, Messenger, OutboundMessage, StudentRecord};
use crate::formatting::{TelegramMarkdownFormatter, TextFormatter};
use crate::formatting::PLACEHOLDER;
use std::sync::Arc;
use tracing::{error, info, instrument};

/// Sends an alert for each new student to the fixed destination.
pub struct Dispatcher {
    messenger: Arc<dyn Messenger>,
    formatter: Box<dyn TextFormatter>,
    destination: ChatId,
}

impl Dispatcher {
    /// Creates a dispatcher using the Telegram Markdown template.
    pub fn new(messenger: Arc<dyn Messenger>, destination: ChatId) -> Self {
        Self::with_formatter(messenger, Box::new(TelegramMarkdownFormatter), destination)
    }

    pub fn with_formatter(
        messenger: Arc<dyn Messenger>,
        formatter: Box<dyn TextFormatter>,
        destination: ChatId,
    ) -> Self {
        Self {
            messenger,
            formatter,
            destination,
        }
    }

    pub fn destination(&self) -> &ChatId {
        &self.destination
    }

    /// Builds the message for `record`.
    pub fn compose(&self, record: &StudentRecord) -> OutboundMessage {
        OutboundMessage::markdown(self.formatter.format(record), self.destination.clone())
    }

    /// Formats `record` and makes a single delivery attempt.
    ///
    /// Nothing is returned: a failed delivery is logged and the record's
    /// notification is lost.
    #[instrument(skip_all, fields(messenger = self.messenger.name()))]
    pub async fn notify(&self, record: StudentRecord) {
        let name = record.name.clone().unwrap_or_else(|| PLACEHOLDER.to_string());
        let message = self.compose(&record);

        match self.messenger.deliver(message).await {
            Ok(()) => {
                metrics::counter!("notifications_sent_total").increment(1);
                info!(student = %name, "Successfully sent notification.");
            }
            Err(e) => {
                metrics::counter!("notifications_failed_total", "reason" => e.reason()).increment(1);
                error!(student = %name, reason = e.reason(), error = %e, "Failed to send notification.");
            }
        }
    }
}
