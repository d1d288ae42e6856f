//! Delivery adapter CRUD operation tests
//!
//! Exercises delivery logs, queue jobs, templates, recipients and settings
//! against a real temporary SQLite database.

use gradepost::delivery_adapter::{
	CreateDeliveryLog, DeliveryAdapter, DeliveryLogPatch, DeliveryStatus, ListLogOptions,
};
use gradepost::types::{Patch, Timestamp};
use gradepost_delivery_adapter_sqlite::DeliveryAdapterSqlite;
use tempfile::TempDir;

async fn create_test_adapter() -> (DeliveryAdapterSqlite, TempDir) {
	let temp_dir = TempDir::new().expect("Failed to create temp directory");

	let adapter = DeliveryAdapterSqlite::new(temp_dir.path().join("delivery.db"))
		.await
		.expect("Failed to create adapter");

	(adapter, temp_dir)
}

fn log_data(student_id: i64, email: &'static str) -> CreateDeliveryLog<'static> {
	CreateDeliveryLog {
		student_id,
		student_name: "Alice Example",
		email,
		class_id: 12,
		exam_id: 7,
	}
}

#[tokio::test]
async fn test_create_and_read_log() {
	let (adapter, _temp) = create_test_adapter().await;

	let log_id = adapter.create_log(&log_data(1, "alice@example.com")).await.unwrap();
	let log = adapter.read_log(log_id).await.unwrap();

	assert_eq!(log.log_id, log_id);
	assert_eq!(log.student_id, 1);
	assert_eq!(log.email.as_ref(), "alice@example.com");
	assert_eq!(log.status, DeliveryStatus::Pending);
	assert_eq!(log.retry_count, 0);
	assert!(log.error.is_none());
	assert!(log.message_id.is_none());
	assert!(log.last_attempt_at.is_none());
}

#[tokio::test]
async fn test_read_missing_log_is_not_found() {
	let (adapter, _temp) = create_test_adapter().await;

	let res = adapter.read_log(12345).await;
	assert!(matches!(res, Err(gradepost::error::Error::NotFound)));
}

#[tokio::test]
async fn test_update_log_patch() {
	let (adapter, _temp) = create_test_adapter().await;

	let log_id = adapter.create_log(&log_data(1, "alice@example.com")).await.unwrap();

	let patch = DeliveryLogPatch {
		status: Patch::Value(DeliveryStatus::Queued),
		retry_count: Patch::Value(1),
		message_id: Patch::Value("abc.0@example.com".into()),
		last_attempt_at: Patch::Value(Timestamp::now()),
		..Default::default()
	};
	let applied = adapter.update_log(log_id, None, &patch).await.unwrap();
	assert!(applied);

	let log = adapter.read_log(log_id).await.unwrap();
	assert_eq!(log.status, DeliveryStatus::Queued);
	assert_eq!(log.retry_count, 1);
	assert_eq!(log.message_id.as_deref(), Some("abc.0@example.com"));
	assert!(log.last_attempt_at.is_some());
}

#[tokio::test]
async fn test_update_log_clears_error_with_null() {
	let (adapter, _temp) = create_test_adapter().await;

	let log_id = adapter.create_log(&log_data(1, "alice@example.com")).await.unwrap();

	let patch =
		DeliveryLogPatch { error: Patch::Value("timeout".into()), ..Default::default() };
	assert!(adapter.update_log(log_id, None, &patch).await.unwrap());
	assert_eq!(adapter.read_log(log_id).await.unwrap().error.as_deref(), Some("timeout"));

	let patch = DeliveryLogPatch { error: Patch::Null, ..Default::default() };
	assert!(adapter.update_log(log_id, None, &patch).await.unwrap());
	assert!(adapter.read_log(log_id).await.unwrap().error.is_none());
}

#[tokio::test]
async fn test_update_log_optimistic_guard() {
	let (adapter, _temp) = create_test_adapter().await;

	let log_id = adapter.create_log(&log_data(1, "alice@example.com")).await.unwrap();
	let log = adapter.read_log(log_id).await.unwrap();

	// Stale guard must not apply
	let stale = Timestamp(log.updated_at.0 - 100);
	let patch = DeliveryLogPatch {
		status: Patch::Value(DeliveryStatus::Queued),
		..Default::default()
	};
	let applied = adapter.update_log(log_id, Some(stale), &patch).await.unwrap();
	assert!(!applied);
	assert_eq!(adapter.read_log(log_id).await.unwrap().status, DeliveryStatus::Pending);

	// Matching guard applies
	let applied = adapter.update_log(log_id, Some(log.updated_at), &patch).await.unwrap();
	assert!(applied);
	assert_eq!(adapter.read_log(log_id).await.unwrap().status, DeliveryStatus::Queued);
}

#[tokio::test]
async fn test_list_logs_filters() {
	let (adapter, _temp) = create_test_adapter().await;

	adapter.create_log(&log_data(1, "alice@example.com")).await.unwrap();
	adapter.create_log(&log_data(2, "bob@example.com")).await.unwrap();
	adapter
		.create_log(&CreateDeliveryLog {
			student_id: 3,
			student_name: "Carol",
			email: "carol@example.com",
			class_id: 99,
			exam_id: 7,
		})
		.await
		.unwrap();

	let all = adapter.list_logs(&ListLogOptions::default()).await.unwrap();
	assert_eq!(all.len(), 3);

	let class_12 = adapter
		.list_logs(&ListLogOptions { class_id: Some(12), exam_id: None })
		.await
		.unwrap();
	assert_eq!(class_12.len(), 2);

	let class_12_exam_7 = adapter
		.list_logs(&ListLogOptions { class_id: Some(12), exam_id: Some(7) })
		.await
		.unwrap();
	assert_eq!(class_12_exam_7.len(), 2);

	let none = adapter
		.list_logs(&ListLogOptions { class_id: Some(12), exam_id: Some(8) })
		.await
		.unwrap();
	assert!(none.is_empty());
}

#[tokio::test]
async fn test_webhook_match_prefers_message_id() {
	let (adapter, _temp) = create_test_adapter().await;

	let old_id = adapter.create_log(&log_data(1, "alice@example.com")).await.unwrap();
	let new_id = adapter.create_log(&log_data(1, "alice@example.com")).await.unwrap();

	let patch = DeliveryLogPatch {
		message_id: Patch::Value("m-old@example.com".into()),
		..Default::default()
	};
	adapter.update_log(old_id, None, &patch).await.unwrap();

	// Message id wins even though the other row is more recent
	let found = adapter
		.find_log_for_webhook("alice@example.com", Some("m-old@example.com"))
		.await
		.unwrap()
		.unwrap();
	assert_eq!(found.log_id, old_id);

	// Unknown message id falls back to the address match
	let found = adapter
		.find_log_for_webhook("alice@example.com", Some("m-unknown@example.com"))
		.await
		.unwrap()
		.unwrap();
	assert_eq!(found.log_id, new_id);

	// No match at all
	let found = adapter.find_log_for_webhook("nobody@example.com", None).await.unwrap();
	assert!(found.is_none());
}

#[tokio::test]
async fn test_webhook_fallback_picks_most_recently_updated() {
	let (adapter, _temp) = create_test_adapter().await;

	let first = adapter.create_log(&log_data(1, "alice@example.com")).await.unwrap();
	let second = adapter.create_log(&log_data(1, "alice@example.com")).await.unwrap();

	// Same updated_at second: higher log_id breaks the tie
	let found =
		adapter.find_log_for_webhook("alice@example.com", None).await.unwrap().unwrap();
	assert_eq!(found.log_id, second);

	// Touching the first row makes it the latest
	tokio::time::sleep(tokio::time::Duration::from_millis(1100)).await;
	let patch = DeliveryLogPatch {
		status: Patch::Value(DeliveryStatus::Queued),
		..Default::default()
	};
	adapter.update_log(first, None, &patch).await.unwrap();

	let found =
		adapter.find_log_for_webhook("alice@example.com", None).await.unwrap().unwrap();
	assert_eq!(found.log_id, first);
}

#[tokio::test]
async fn test_job_lifecycle() {
	let (adapter, _temp) = create_test_adapter().await;

	let job_id = adapter.create_job("report.email", "{\"logId\":1}").await.unwrap();

	let pending = adapter.load_jobs().await.unwrap();
	assert_eq!(pending.len(), 1);
	assert_eq!(pending[0].job_id, job_id);
	assert_eq!(pending[0].kind.as_ref(), "report.email");
	assert_eq!(pending[0].status, 'P');
	assert!(pending[0].retry.is_none());

	// Failed attempt keeps the job pending with retry bookkeeping
	let next_at = Timestamp::from_now(60);
	adapter.job_error(job_id, "timeout", Some(next_at), Some("1,60,3600,3")).await.unwrap();
	let pending = adapter.load_jobs().await.unwrap();
	assert_eq!(pending.len(), 1);
	assert_eq!(pending[0].retry.as_deref(), Some("1,60,3600,3"));
	assert_eq!(pending[0].next_at, Some(next_at));

	// Finished jobs are no longer loaded
	adapter.job_finished(job_id, "").await.unwrap();
	assert!(adapter.load_jobs().await.unwrap().is_empty());
	assert!(adapter.list_dead_letters().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_job_dead_letter() {
	let (adapter, _temp) = create_test_adapter().await;

	let job_id = adapter.create_job("report.email", "{\"logId\":2}").await.unwrap();
	adapter.job_dead_letter(job_id, "mailbox does not exist").await.unwrap();

	assert!(adapter.load_jobs().await.unwrap().is_empty());
	let dead = adapter.list_dead_letters().await.unwrap();
	assert_eq!(dead.len(), 1);
	assert_eq!(dead[0].status, 'X');
	assert_eq!(dead[0].output.as_deref(), Some("mailbox does not exist"));
}

#[tokio::test]
async fn test_template_most_specific_wins() {
	let (adapter, _temp) = create_test_adapter().await;

	assert!(adapter.find_template(12, 7, 1).await.unwrap().is_none());

	adapter.upsert_template(12, 7, None, "Class subject", "Class body").await.unwrap();
	adapter
		.upsert_template(12, 7, Some(1), "Student subject", "Student body")
		.await
		.unwrap();

	let t = adapter.find_template(12, 7, 1).await.unwrap().unwrap();
	assert_eq!(t.subject.as_ref(), "Student subject");

	let t = adapter.find_template(12, 7, 2).await.unwrap().unwrap();
	assert_eq!(t.subject.as_ref(), "Class subject");

	assert!(adapter.find_template(12, 8, 1).await.unwrap().is_none());
}

#[tokio::test]
async fn test_list_recipients_with_overrides() {
	let (adapter, _temp) = create_test_adapter().await;

	adapter.upsert_student(1, 12, "Alice", "alice@example.com", None).await.unwrap();
	adapter.upsert_student(2, 12, "Bob", "bob@example.com", Some(false)).await.unwrap();
	adapter.upsert_student(3, 99, "Carol", "carol@example.com", None).await.unwrap();
	adapter.set_notify_override(1, 7, false).await.unwrap();
	adapter.set_notify_override(1, 8, true).await.unwrap();

	let recipients = adapter.list_recipients(12, 7).await.unwrap();
	assert_eq!(recipients.len(), 2);

	assert_eq!(recipients[0].student_id, 1);
	assert_eq!(recipients[0].user_pref, None);
	assert_eq!(recipients[0].item_pref, Some(false));

	assert_eq!(recipients[1].student_id, 2);
	assert_eq!(recipients[1].user_pref, Some(false));
	assert_eq!(recipients[1].item_pref, None);
}

#[tokio::test]
async fn test_settings_roundtrip() {
	let (adapter, _temp) = create_test_adapter().await;

	assert!(adapter.read_setting("notify.default").await.unwrap().is_none());

	adapter.write_setting("notify.default", "true").await.unwrap();
	assert_eq!(adapter.read_setting("notify.default").await.unwrap().as_deref(), Some("true"));

	adapter.write_setting("notify.default", "false").await.unwrap();
	assert_eq!(
		adapter.read_setting("notify.default").await.unwrap().as_deref(),
		Some("false")
	);
}

// vim: ts=4
