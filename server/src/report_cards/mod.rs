//! Report-card email delivery pipeline: bulk trigger and resend endpoints,
//! the worker job, the notification gate, and webhook reconciliation.

pub mod gate;
pub mod handler;
pub mod task;
pub mod webhook;

pub use task::ReportMailJob;

// vim: ts=4
