//! Core infrastructure for the Gradepost delivery service.
//!
//! This crate contains the durable job queue (with retry, backoff and
//! dead-lettering), the application state shared by the server's feature
//! modules, and process configuration.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

pub mod app;
pub mod config;
pub mod prelude;
pub mod queue;

pub use app::{App, AppState};
pub use config::Config;
pub use queue::{Job, JobId, Queue, RetryPolicy};

// vim: ts=4
