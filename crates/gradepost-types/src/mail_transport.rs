//! Outbound mail transport adapter trait.
//!
//! The transport is an external collaborator: it accepts a rendered message
//! and either returns an accept outcome or fails. Failures carry the retry
//! decision: `Error::ServiceUnavailable` is transient and retryable,
//! `Error::Rejected` is permanent and must be dead-lettered.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use crate::prelude::*;

/// A fully rendered message ready for handoff to the provider.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmailMessage {
	pub to: String,
	pub subject: String,
	pub text_body: String,
	pub html_body: Option<String>,
}

/// Provider accept outcome.
#[derive(Clone, Debug, Default)]
pub struct SendOutcome {
	/// Provider-assigned message id, when one is returned at accept time.
	/// Stored on the delivery log for webhook correlation.
	pub message_id: Option<Box<str>>,
}

#[async_trait]
pub trait MailTransport: Debug + Send + Sync {
	async fn send(&self, message: &EmailMessage) -> GpResult<SendOutcome>;
}

// vim: ts=4
