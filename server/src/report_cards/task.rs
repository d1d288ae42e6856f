//! Report-card email worker job
//!
//! Runs inside the durable queue. Each job references one delivery-log row;
//! the queue guarantees single-flight per job and at-least-once execution,
//! and every log write here is a guarded full-row overwrite, so re-running a
//! job converges to the same end state instead of corrupting it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::prelude::*;
use gradepost_core::queue::{Job, JobId};
use gradepost_types::delivery_adapter::{DeliveryLog, DeliveryLogPatch, DeliveryStatus};
use gradepost_types::mail_transport::EmailMessage;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReportMailJob {
	#[serde(rename = "logId")]
	pub log_id: i64,
	#[serde(rename = "studentId")]
	pub student_id: i64,
	#[serde(rename = "classId")]
	pub class_id: i64,
	#[serde(rename = "examId")]
	pub exam_id: i64,
}

impl ReportMailJob {
	/// Guarded log write: re-reads and retries on an `updated_at` conflict,
	/// and silently skips when the row has moved to a state the patch may
	/// not follow (a webhook settled it first).
	async fn record(&self, app: &App, log: &DeliveryLog, patch: &DeliveryLogPatch) -> GpResult<()> {
		let mut current = log.clone();
		for _ in 0..3 {
			let target = match patch.status {
				Patch::Value(status) => status,
				_ => current.status,
			};
			if target != current.status && !current.status.can_transition_to(target) {
				debug!(
					"Delivery log {} is {}, not applying {} update",
					self.log_id, current.status, target
				);
				return Ok(());
			}
			if app.delivery_adapter.update_log(self.log_id, Some(current.updated_at), patch).await? {
				return Ok(());
			}
			current = app.delivery_adapter.read_log(self.log_id).await?;
		}
		Err(Error::Internal(format!("delivery log {} kept changing concurrently", self.log_id)))
	}
}

#[async_trait]
impl Job<App> for ReportMailJob {
	fn kind() -> &'static str {
		"report.email"
	}

	fn kind_of(&self) -> &'static str {
		Self::kind()
	}

	fn build(_id: JobId, input: &str) -> GpResult<Arc<dyn Job<App>>> {
		let job: ReportMailJob = serde_json::from_str(input).map_err(|e| {
			Error::ValidationError(format!("Failed to deserialize report mail job: {}", e))
		})?;
		Ok(Arc::new(job))
	}

	fn serialize(&self) -> String {
		serde_json::to_string(self).unwrap_or_else(|_| format!("report.email:{}", self.log_id))
	}

	async fn run(&self, app: &App, attempt: u16) -> GpResult<()> {
		info!("Sending report-card email for log {} (attempt {})", self.log_id, attempt);

		let mut log = match app.delivery_adapter.read_log(self.log_id).await {
			Ok(log) => log,
			Err(Error::NotFound) => {
				warn!("Delivery log {} is gone, discarding job", self.log_id);
				return Ok(());
			}
			Err(e) => return Err(e),
		};

		// A retry starts from failed; flip the row back to queued first.
		if matches!(log.status, DeliveryStatus::Pending | DeliveryStatus::Failed) {
			let requeue = DeliveryLogPatch {
				status: Patch::Value(DeliveryStatus::Queued),
				..Default::default()
			};
			self.record(app, &log, &requeue).await?;
			log = app.delivery_adapter.read_log(self.log_id).await?;
		}
		if log.status != DeliveryStatus::Queued {
			debug!("Delivery log {} already {}, nothing to do", self.log_id, log.status);
			return Ok(());
		}

		let template = app
			.delivery_adapter
			.find_template(self.class_id, self.exam_id, self.student_id)
			.await?;
		let vars = serde_json::json!({
			"student_name": log.student_name.as_ref(),
			"student_id": log.student_id,
			"class_id": self.class_id,
			"exam_id": self.exam_id,
			"school_name": app.config.smtp.from_name.as_deref().unwrap_or("Gradepost"),
		});

		let outcome = match app.renderer.render_report(template.as_ref(), &vars) {
			Ok(rendered) => {
				let message = EmailMessage {
					to: log.email.to_string(),
					subject: rendered.subject,
					text_body: rendered.text_body,
					html_body: rendered.html_body,
				};
				app.mailer.send(&message).await
			}
			Err(e) => Err(e),
		};

		match outcome {
			Ok(accepted) => {
				let patch = DeliveryLogPatch {
					status: Patch::Value(DeliveryStatus::Sent),
					error: Patch::Null,
					retry_count: Patch::Value(u32::from(attempt)),
					message_id: match accepted.message_id {
						Some(id) => Patch::Value(id),
						None => Patch::Null,
					},
					last_attempt_at: Patch::Value(Timestamp::now()),
				};
				self.record(app, &log, &patch).await?;
				info!("Report-card email for log {} handed off to transport", self.log_id);
				Ok(())
			}
			Err(e) => {
				warn!("Report-card email for log {} failed: {}", self.log_id, e);
				let patch = DeliveryLogPatch {
					status: Patch::Value(DeliveryStatus::Failed),
					error: Patch::Value(e.to_string().into()),
					retry_count: Patch::Value(u32::from(attempt)),
					last_attempt_at: Patch::Value(Timestamp::now()),
					..Default::default()
				};
				self.record(app, &log, &patch).await?;
				// the queue decides: transient errors retry, permanent ones
				// dead-letter
				Err(e)
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_job_serialization_roundtrip() {
		let job = ReportMailJob { log_id: 42, student_id: 7, class_id: 5, exam_id: 9 };
		let serialized = Job::<App>::serialize(&job);
		assert!(serialized.contains("\"logId\":42"));

		let parsed: ReportMailJob = serde_json::from_str(&serialized).unwrap();
		assert_eq!(parsed.log_id, 42);
		assert_eq!(parsed.student_id, 7);
		assert_eq!(parsed.class_id, 5);
		assert_eq!(parsed.exam_id, 9);
	}

	#[test]
	fn test_job_kind() {
		let job = ReportMailJob { log_id: 1, student_id: 1, class_id: 1, exam_id: 1 };
		assert_eq!(<ReportMailJob as Job<App>>::kind(), "report.email");
		assert_eq!(Job::<App>::kind_of(&job), "report.email");
	}
}

// vim: ts=4
