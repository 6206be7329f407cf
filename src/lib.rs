//! enrollwatch - new student registration alerts
//!
//! This library watches a Firestore collection of student registrations and
//! sends one Telegram message per newly added document. Change feeds run on
//! their own threads and hand records to a single async main loop, which
//! performs deliveries one at a time.

pub mod app;
pub mod bridge;
pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod feed;
pub mod formatting;
pub mod internal_metrics;
pub mod liveness;
pub mod notification;
pub mod scheduler;
pub mod task_manager;

// Re-export core types for convenience
pub use crate::core::*;
