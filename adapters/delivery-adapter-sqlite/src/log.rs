//! Delivery log persistence
//!
//! One row per (student, exam) send attempt history. Updates go through a
//! dynamic UPDATE with an optional `updated_at` guard for optimistic
//! concurrency; `updated_at` is bumped on every write.

use sqlx::{Row, SqlitePool, sqlite::SqliteRow};

use gradepost::delivery_adapter::{
	CreateDeliveryLog, DeliveryLog, DeliveryLogPatch, DeliveryStatus, ListLogOptions,
};
use gradepost::prelude::*;

use crate::utils::*;

fn map_log(row: &SqliteRow) -> Result<DeliveryLog, sqlx::Error> {
	let status: &str = row.try_get("status")?;
	Ok(DeliveryLog {
		log_id: row.try_get("log_id")?,
		student_id: row.try_get("student_id")?,
		student_name: row.try_get("student_name")?,
		email: row.try_get("email")?,
		class_id: row.try_get("class_id")?,
		exam_id: row.try_get("exam_id")?,
		status: DeliveryStatus::from_char(status.chars().next().unwrap_or(' '))
			.map_err(|_| sqlx::Error::ColumnDecode {
				index: "status".into(),
				source: format!("unknown status '{}'", status).into(),
			})?,
		error: row.try_get("error")?,
		retry_count: row.try_get("retry_count")?,
		message_id: row.try_get("message_id")?,
		last_attempt_at: row.try_get::<Option<i64>, _>("last_attempt_at")?.map(Timestamp),
		created_at: row.try_get("created_at").map(Timestamp)?,
		updated_at: row.try_get("updated_at").map(Timestamp)?,
	})
}

const LOG_COLUMNS: &str = "log_id, student_id, student_name, email, class_id, exam_id,
	status, error, retry_count, message_id, last_attempt_at, created_at, updated_at";

/// Create a new delivery log row in `pending` state
pub(crate) async fn create(db: &SqlitePool, data: &CreateDeliveryLog<'_>) -> GpResult<i64> {
	let res = sqlx::query(
		"INSERT INTO delivery_logs (student_id, student_name, email, class_id, exam_id, status)
		VALUES (?, ?, ?, ?, ?, 'P') RETURNING log_id",
	)
	.bind(data.student_id)
	.bind(data.student_name)
	.bind(data.email)
	.bind(data.class_id)
	.bind(data.exam_id)
	.fetch_one(db)
	.await;

	map_res(res, |row| row.try_get("log_id"))
}

pub(crate) async fn read(db: &SqlitePool, log_id: i64) -> GpResult<DeliveryLog> {
	let res = sqlx::query(&format!("SELECT {} FROM delivery_logs WHERE log_id=?", LOG_COLUMNS))
		.bind(log_id)
		.fetch_one(db)
		.await;

	map_res(res, |row| map_log(&row))
}

/// List logs, newest activity first. Ties on `updated_at` are broken by
/// `log_id` so the order is stable within one second.
pub(crate) async fn list(db: &SqlitePool, opts: &ListLogOptions) -> GpResult<Vec<DeliveryLog>> {
	let mut query = sqlx::QueryBuilder::new(format!(
		"SELECT {} FROM delivery_logs WHERE 1=1",
		LOG_COLUMNS
	));

	if let Some(class_id) = opts.class_id {
		query.push(" AND class_id=").push_bind(class_id);
	}
	if let Some(exam_id) = opts.exam_id {
		query.push(" AND exam_id=").push_bind(exam_id);
	}
	query.push(" ORDER BY updated_at DESC, log_id DESC LIMIT 1000");

	let res =
		query.build().fetch_all(db).await.inspect_err(inspect).map_err(|_| Error::DbError)?;

	collect_res(res.iter().map(map_log))
}

/// Apply a partial update, guarded by `expect` when set. Returns false when
/// the guard did not match (or the row is gone), so the caller can re-read.
pub(crate) async fn update(
	db: &SqlitePool,
	log_id: i64,
	expect: Option<Timestamp>,
	patch: &DeliveryLogPatch,
) -> GpResult<bool> {
	let mut query = sqlx::QueryBuilder::new("UPDATE delivery_logs SET ");
	let mut has_updates = false;

	has_updates = push_patch!(query, has_updates, "status", &patch.status, |v| v
		.as_char()
		.to_string());
	has_updates = push_patch!(query, has_updates, "error", &patch.error);
	has_updates = push_patch!(query, has_updates, "retry_count", &patch.retry_count);
	has_updates = push_patch!(query, has_updates, "message_id", &patch.message_id);
	has_updates =
		push_patch!(query, has_updates, "last_attempt_at", &patch.last_attempt_at, |v| v.0);

	if !has_updates {
		return Ok(true);
	}
	query.push(", updated_at=unixepoch()");

	query.push(" WHERE log_id=").push_bind(log_id);
	if let Some(expect) = expect {
		query.push(" AND updated_at=").push_bind(expect.0);
	}

	let res = query
		.build()
		.execute(db)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;

	Ok(res.rows_affected() > 0)
}

/// Locate the row a webhook event refers to: stored message id first, then
/// the most recently updated row for the address.
pub(crate) async fn find_for_webhook(
	db: &SqlitePool,
	address: &str,
	message_id: Option<&str>,
) -> GpResult<Option<DeliveryLog>> {
	if let Some(message_id) = message_id {
		let res = sqlx::query(&format!(
			"SELECT {} FROM delivery_logs WHERE message_id=? LIMIT 1",
			LOG_COLUMNS
		))
		.bind(message_id)
		.fetch_optional(db)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;

		if let Some(row) = res {
			return Ok(Some(map_log(&row).inspect_err(inspect).map_err(|_| Error::DbError)?));
		}
	}

	let res = sqlx::query(&format!(
		"SELECT {} FROM delivery_logs WHERE email=?
		ORDER BY updated_at DESC, log_id DESC LIMIT 1",
		LOG_COLUMNS
	))
	.bind(address)
	.fetch_optional(db)
	.await
	.inspect_err(inspect)
	.map_err(|_| Error::DbError)?;

	match res {
		Some(row) => Ok(Some(map_log(&row).inspect_err(inspect).map_err(|_| Error::DbError)?)),
		None => Ok(None),
	}
}

// vim: ts=4
