//! Recording mail transport for tests
//!
//! Records every message it is asked to send and replays scripted outcomes,
//! so delivery flows can be driven end to end without an SMTP server.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::prelude::*;
use gradepost_types::mail_transport::{EmailMessage, MailTransport, SendOutcome};

#[derive(Default)]
pub struct FakeMailTransport {
	sent: Mutex<Vec<EmailMessage>>,
	script: Mutex<VecDeque<GpResult<SendOutcome>>>,
	counter: AtomicU64,
}

impl std::fmt::Debug for FakeMailTransport {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("FakeMailTransport").finish_non_exhaustive()
	}
}

impl FakeMailTransport {
	pub fn new() -> Self {
		Self::default()
	}

	/// Queue the outcome for the next send. Unscripted sends succeed with a
	/// generated message id.
	pub fn push_outcome(&self, outcome: GpResult<SendOutcome>) {
		if let Ok(mut script) = self.script.lock() {
			script.push_back(outcome);
		}
	}

	/// Messages handed to the transport so far, in send order.
	pub fn sent(&self) -> Vec<EmailMessage> {
		self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
	}

	pub fn sent_count(&self) -> usize {
		self.sent.lock().map(|sent| sent.len()).unwrap_or(0)
	}
}

#[async_trait]
impl MailTransport for FakeMailTransport {
	async fn send(&self, message: &EmailMessage) -> GpResult<SendOutcome> {
		if let Ok(mut sent) = self.sent.lock() {
			sent.push(message.clone());
		}
		let scripted = self.script.lock().ok().and_then(|mut script| script.pop_front());
		match scripted {
			Some(outcome) => outcome,
			None => {
				let n = self.counter.fetch_add(1, Ordering::Relaxed);
				Ok(SendOutcome { message_id: Some(format!("fake.{}@test", n).into()) })
			}
		}
	}
}

// vim: ts=4
