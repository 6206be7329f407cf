//! Delivery of new-registration alerts.
//!
//! The `Dispatcher` turns a `StudentRecord` into an `OutboundMessage` for the
//! fixed destination and hands it to a `Messenger`. The Telegram Bot API
//! client is the only production messenger.
pub mod dispatcher;
pub mod telegram;

pub use dispatcher::Dispatcher;
pub use telegram::TelegramClient;
