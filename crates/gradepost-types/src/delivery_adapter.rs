//! Delivery-log storage adapter trait and row types.
//!
//! The adapter is the single shared mutable resource of the pipeline:
//! delivery logs, durable queue jobs, email templates, recipients and
//! org-level settings all live behind it. Writers (the worker job and the
//! webhook reconciler) use a read-current-row / write-full-row pattern with
//! an `updated_at` optimistic guard.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use crate::prelude::*;

// DeliveryStatus //
//****************//

/// Lifecycle status of one delivery-log row.
///
/// `pending → queued → sent → {delivered | bounced}`, with
/// `queued → failed → queued` on retry. `delivered`, `bounced` and
/// `failed` (after retry exhaustion) are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
	Pending,
	Queued,
	Sent,
	Delivered,
	Bounced,
	Failed,
}

impl DeliveryStatus {
	pub fn as_char(self) -> char {
		match self {
			DeliveryStatus::Pending => 'P',
			DeliveryStatus::Queued => 'Q',
			DeliveryStatus::Sent => 'S',
			DeliveryStatus::Delivered => 'D',
			DeliveryStatus::Bounced => 'B',
			DeliveryStatus::Failed => 'F',
		}
	}

	pub fn from_char(c: char) -> GpResult<Self> {
		match c {
			'P' => Ok(DeliveryStatus::Pending),
			'Q' => Ok(DeliveryStatus::Queued),
			'S' => Ok(DeliveryStatus::Sent),
			'D' => Ok(DeliveryStatus::Delivered),
			'B' => Ok(DeliveryStatus::Bounced),
			'F' => Ok(DeliveryStatus::Failed),
			_ => Err(Error::Internal(format!("unknown delivery status '{}'", c))),
		}
	}

	/// Delivered confirmations win over everything; a delivered row is never
	/// regressed by a late or duplicate webhook event.
	pub fn is_terminal(self) -> bool {
		matches!(self, DeliveryStatus::Delivered | DeliveryStatus::Bounced)
	}

	/// Transition guard for the delivery state machine. `sent → failed` is not
	/// reachable; failure can only precede a retry from `queued`.
	pub fn can_transition_to(self, next: DeliveryStatus) -> bool {
		use DeliveryStatus::{Bounced, Delivered, Failed, Pending, Queued, Sent};
		match (self, next) {
			(Pending, Queued) => true,
			(Queued, Sent | Failed) => true,
			(Sent, Delivered | Bounced) => true,
			// manual resend re-queues any settled row
			(Failed | Sent | Delivered | Bounced, Queued) => true,
			// idempotent webhook redelivery of the same terminal event
			(Delivered, Delivered) => true,
			(Bounced, Bounced) => true,
			_ => false,
		}
	}
}

impl std::fmt::Display for DeliveryStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			DeliveryStatus::Pending => write!(f, "pending"),
			DeliveryStatus::Queued => write!(f, "queued"),
			DeliveryStatus::Sent => write!(f, "sent"),
			DeliveryStatus::Delivered => write!(f, "delivered"),
			DeliveryStatus::Bounced => write!(f, "bounced"),
			DeliveryStatus::Failed => write!(f, "failed"),
		}
	}
}

// Row types //
//***********//

#[derive(Clone, Debug, Serialize)]
pub struct DeliveryLog {
	#[serde(rename = "id")]
	pub log_id: i64,
	#[serde(rename = "studentId")]
	pub student_id: i64,
	#[serde(rename = "studentName")]
	pub student_name: Box<str>,
	pub email: Box<str>,
	#[serde(rename = "classId")]
	pub class_id: i64,
	#[serde(rename = "examId")]
	pub exam_id: i64,
	pub status: DeliveryStatus,
	pub error: Option<Box<str>>,
	#[serde(rename = "retryCount")]
	pub retry_count: u32,
	#[serde(rename = "messageId")]
	pub message_id: Option<Box<str>>,
	#[serde(rename = "lastAttemptAt")]
	pub last_attempt_at: Option<Timestamp>,
	#[serde(rename = "createdAt")]
	pub created_at: Timestamp,
	#[serde(rename = "updatedAt")]
	pub updated_at: Timestamp,
}

pub struct CreateDeliveryLog<'a> {
	pub student_id: i64,
	pub student_name: &'a str,
	pub email: &'a str,
	pub class_id: i64,
	pub exam_id: i64,
}

#[derive(Debug, Default)]
pub struct DeliveryLogPatch {
	pub status: Patch<DeliveryStatus>,
	pub error: Patch<Box<str>>,
	pub retry_count: Patch<u32>,
	pub message_id: Patch<Box<str>>,
	pub last_attempt_at: Patch<Timestamp>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListLogOptions {
	pub class_id: Option<i64>,
	pub exam_id: Option<i64>,
}

/// A durable queue job as persisted by the adapter. Queue bookkeeping only;
/// the queue never touches delivery logs through these rows.
#[derive(Clone, Debug)]
pub struct QueuedJob {
	pub job_id: u64,
	pub kind: Box<str>,
	/// 'P' pending, 'F' finished, 'X' dead-lettered
	pub status: char,
	pub input: Box<str>,
	pub retry: Option<Box<str>>,
	pub next_at: Option<Timestamp>,
	pub output: Option<Box<str>>,
	pub created_at: Timestamp,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmailTemplate {
	pub subject: Box<str>,
	pub body: Box<str>,
}

#[derive(Clone, Debug)]
pub struct Recipient {
	pub student_id: i64,
	pub name: Box<str>,
	pub email: Box<str>,
	/// Per-user notification default, if the student set one.
	pub user_pref: Option<bool>,
	/// Per-(student, exam) override, if one exists.
	pub item_pref: Option<bool>,
}

// DeliveryAdapter //
//*****************//

#[async_trait]
pub trait DeliveryAdapter: Debug + Send + Sync {
	/// # Delivery logs
	async fn create_log(&self, data: &CreateDeliveryLog<'_>) -> GpResult<i64>;
	async fn read_log(&self, log_id: i64) -> GpResult<DeliveryLog>;
	async fn list_logs(&self, opts: &ListLogOptions) -> GpResult<Vec<DeliveryLog>>;

	/// Full-row overwrite with optimistic concurrency. When `expect` is set
	/// the update only applies if `updated_at` still matches; returns false
	/// on conflict so the caller can re-read and retry.
	async fn update_log(
		&self,
		log_id: i64,
		expect: Option<Timestamp>,
		patch: &DeliveryLogPatch,
	) -> GpResult<bool>;

	/// Locate the log row a webhook event refers to. Matches by provider
	/// message id when available, falling back to the most recently updated
	/// row for the address.
	async fn find_log_for_webhook(
		&self,
		address: &str,
		message_id: Option<&str>,
	) -> GpResult<Option<DeliveryLog>>;

	/// # Queue jobs
	async fn create_job(&self, kind: &'static str, input: &str) -> GpResult<u64>;
	async fn job_finished(&self, job_id: u64, output: &str) -> GpResult<()>;
	async fn job_error(
		&self,
		job_id: u64,
		output: &str,
		next_at: Option<Timestamp>,
		retry: Option<&str>,
	) -> GpResult<()>;
	async fn job_dead_letter(&self, job_id: u64, output: &str) -> GpResult<()>;
	async fn load_jobs(&self) -> GpResult<Vec<QueuedJob>>;
	async fn list_dead_letters(&self) -> GpResult<Vec<QueuedJob>>;

	/// # Templates
	/// Most-specific-wins lookup: per-student override first, then the
	/// per-(class, exam) template. None means the built-in default applies.
	async fn find_template(
		&self,
		class_id: i64,
		exam_id: i64,
		student_id: i64,
	) -> GpResult<Option<EmailTemplate>>;

	/// # Recipients
	async fn list_recipients(&self, class_id: i64, exam_id: i64) -> GpResult<Vec<Recipient>>;

	/// # Settings
	async fn read_setting(&self, key: &str) -> GpResult<Option<Box<str>>>;
	async fn write_setting(&self, key: &str, value: &str) -> GpResult<()>;
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_status_char_roundtrip() {
		for status in [
			DeliveryStatus::Pending,
			DeliveryStatus::Queued,
			DeliveryStatus::Sent,
			DeliveryStatus::Delivered,
			DeliveryStatus::Bounced,
			DeliveryStatus::Failed,
		] {
			assert_eq!(DeliveryStatus::from_char(status.as_char()).unwrap(), status);
		}
		assert!(DeliveryStatus::from_char('Z').is_err());
	}

	#[test]
	fn test_forward_transitions() {
		use DeliveryStatus::*;
		assert!(Pending.can_transition_to(Queued));
		assert!(Queued.can_transition_to(Sent));
		assert!(Queued.can_transition_to(Failed));
		assert!(Failed.can_transition_to(Queued));
		assert!(Sent.can_transition_to(Delivered));
		assert!(Sent.can_transition_to(Bounced));
	}

	#[test]
	fn test_sent_to_failed_unreachable() {
		assert!(!DeliveryStatus::Sent.can_transition_to(DeliveryStatus::Failed));
	}

	#[test]
	fn test_delivered_never_regresses() {
		use DeliveryStatus::*;
		assert!(!Delivered.can_transition_to(Sent));
		assert!(!Delivered.can_transition_to(Bounced));
		assert!(!Delivered.can_transition_to(Failed));
		// duplicate webhook redelivery is a no-op, not an error
		assert!(Delivered.can_transition_to(Delivered));
	}

	#[test]
	fn test_status_serde_names() {
		let json = serde_json::to_string(&DeliveryStatus::Delivered).unwrap();
		assert_eq!(json, "\"delivered\"");
		let back: DeliveryStatus = serde_json::from_str("\"bounced\"").unwrap();
		assert_eq!(back, DeliveryStatus::Bounced);
	}
}

// vim: ts=4
