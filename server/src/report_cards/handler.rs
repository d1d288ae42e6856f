//! Bulk-trigger, resend and log-listing endpoints
//!
//! The bulk trigger is fire-and-forget: it answers with a queued count and
//! delivery state is only observable through the logs endpoint. A queue or
//! store failure fails the request loudly; no job is created without a
//! durable enqueue.

use axum::{
	Json,
	extract::{Path, Query, State},
	http::StatusCode,
};
use serde_json::{Value, json};
use std::sync::Arc;

use crate::prelude::*;
use crate::report_cards::{ReportMailJob, gate};
use gradepost_core::queue::RetryPolicy;
use gradepost_types::delivery_adapter::{
	CreateDeliveryLog, DeliveryLog, DeliveryLogPatch, DeliveryStatus, ListLogOptions,
};

const ORG_NOTIFY_DEFAULT_KEY: &str = "notify.default";

/// Enqueue the job for a row already marked Queued. A failed enqueue leaves
/// no durable job behind the row, so the row must not keep claiming Queued:
/// it is reverted to Failed with the cause recorded before the error
/// propagates. Failed rows stay resendable.
async fn enqueue_or_revert(app: &App, log_id: i64, job: ReportMailJob, retry: RetryPolicy) -> GpResult<()> {
	if let Err(e) = app.queue.push_with(Arc::new(job), retry).await {
		warn!("Failed to enqueue delivery for log {}: {}", log_id, e);
		let revert = DeliveryLogPatch {
			status: Patch::Value(DeliveryStatus::Failed),
			error: Patch::Value(format!("enqueue failed: {}", e).into()),
			..Default::default()
		};
		app.delivery_adapter.update_log(log_id, None, &revert).await?;
		return Err(e);
	}
	Ok(())
}

async fn org_notify_default(app: &App) -> GpResult<bool> {
	Ok(app
		.delivery_adapter
		.read_setting(ORG_NOTIFY_DEFAULT_KEY)
		.await?
		.map(|v| v.as_ref() != "false")
		.unwrap_or(true))
}

fn retry_policy(app: &App) -> RetryPolicy {
	RetryPolicy::new(app.config.retry_wait_min_max, app.config.max_attempts)
}

/// POST /report-cards/class/{class_id}/exam/{exam_id}/bulk-email
pub async fn post_bulk_email(
	State(app): State<App>,
	Path((class_id, exam_id)): Path<(i64, i64)>,
) -> GpResult<(StatusCode, Json<Value>)> {
	let recipients = app.delivery_adapter.list_recipients(class_id, exam_id).await?;
	let org_default = org_notify_default(&app).await?;
	let retry = retry_policy(&app);

	let mut queued = 0u32;
	let mut skipped = 0u32;
	for recipient in &recipients {
		if !gate::should_notify(org_default, recipient.user_pref, recipient.item_pref) {
			debug!("Skipping {} (notifications disabled)", recipient.email);
			skipped += 1;
			continue;
		}

		let log_id = app
			.delivery_adapter
			.create_log(&CreateDeliveryLog {
				student_id: recipient.student_id,
				student_name: &recipient.name,
				email: &recipient.email,
				class_id,
				exam_id,
			})
			.await?;

		// Queued before the push so a fast worker never races the flip
		let patch = DeliveryLogPatch {
			status: Patch::Value(DeliveryStatus::Queued),
			..Default::default()
		};
		app.delivery_adapter.update_log(log_id, None, &patch).await?;

		let job =
			ReportMailJob { log_id, student_id: recipient.student_id, class_id, exam_id };
		enqueue_or_revert(&app, log_id, job, retry.clone()).await?;
		queued += 1;
	}

	info!(
		"Queued {} report-card emails for class {} exam {} ({} skipped)",
		queued, class_id, exam_id, skipped
	);
	Ok((
		StatusCode::ACCEPTED,
		Json(json!({
			"status": "queued",
			"queued": queued,
			"skipped": skipped,
			"message": format!("{} emails queued, {} recipients skipped", queued, skipped),
		})),
	))
}

/// POST /report-cards/email-resend/{log_id}
///
/// Re-queues a settled delivery. The row keeps its `created_at` and prior
/// error text; the error is only overwritten once the new attempt completes.
pub async fn post_resend(
	State(app): State<App>,
	Path(log_id): Path<i64>,
) -> GpResult<(StatusCode, Json<Value>)> {
	let log = app.delivery_adapter.read_log(log_id).await?;

	if !log.status.can_transition_to(DeliveryStatus::Queued) {
		return Err(Error::ValidationError(format!(
			"delivery log {} is {} and cannot be re-queued",
			log_id, log.status
		)));
	}

	let patch = DeliveryLogPatch {
		status: Patch::Value(DeliveryStatus::Queued),
		retry_count: Patch::Value(0),
		message_id: Patch::Null,
		..Default::default()
	};
	if !app.delivery_adapter.update_log(log_id, Some(log.updated_at), &patch).await? {
		return Err(Error::ValidationError(format!(
			"delivery log {} changed concurrently, retry the resend",
			log_id
		)));
	}

	let job = ReportMailJob {
		log_id,
		student_id: log.student_id,
		class_id: log.class_id,
		exam_id: log.exam_id,
	};
	enqueue_or_revert(&app, log_id, job, retry_policy(&app)).await?;

	info!("Re-queued delivery log {}", log_id);
	Ok((StatusCode::ACCEPTED, Json(json!({ "status": "queued" }))))
}

/// GET /report-cards/email-logs?class_id=&exam_id=
pub async fn get_logs(
	State(app): State<App>,
	Query(opts): Query<ListLogOptions>,
) -> GpResult<Json<Vec<DeliveryLog>>> {
	let logs = app.delivery_adapter.list_logs(&opts).await?;
	Ok(Json(logs))
}

/// GET /report-cards/dead-letters
pub async fn get_dead_letters(State(app): State<App>) -> GpResult<Json<Value>> {
	let dead = app.delivery_adapter.list_dead_letters().await?;
	let dead: Vec<Value> = dead
		.iter()
		.map(|j| {
			json!({
				"jobId": j.job_id,
				"kind": j.kind,
				"input": j.input,
				"error": j.output,
				"createdAt": j.created_at,
			})
		})
		.collect();
	Ok(Json(json!({ "deadLetters": dead })))
}

// vim: ts=4
