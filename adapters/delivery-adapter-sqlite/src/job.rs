//! Queue job persistence

use sqlx::{Row, SqlitePool, sqlite::SqliteRow};

use gradepost::delivery_adapter::QueuedJob;
use gradepost::prelude::*;

use crate::utils::*;

fn map_job(row: &SqliteRow) -> Result<QueuedJob, sqlx::Error> {
	let status: &str = row.try_get("status")?;
	Ok(QueuedJob {
		job_id: row.try_get("job_id")?,
		kind: row.try_get("kind")?,
		status: status.chars().next().unwrap_or('X'),
		input: row.try_get("input")?,
		retry: row.try_get("retry")?,
		next_at: row.try_get::<Option<i64>, _>("next_at")?.map(Timestamp),
		output: row.try_get("output")?,
		created_at: row.try_get("created_at").map(Timestamp)?,
	})
}

/// Create a new pending job
pub(crate) async fn create(db: &SqlitePool, kind: &'static str, input: &str) -> GpResult<u64> {
	let res = sqlx::query("INSERT INTO jobs (kind, status, input) VALUES (?, 'P', ?) RETURNING job_id")
		.bind(kind)
		.bind(input)
		.fetch_one(db)
		.await;

	map_res(res, |row| row.try_get("job_id"))
}

/// Mark a job as finished
pub(crate) async fn mark_finished(db: &SqlitePool, job_id: u64, output: &str) -> GpResult<()> {
	sqlx::query("UPDATE jobs SET status='F', output=?, next_at=NULL WHERE job_id=? AND status='P'")
		.bind(output)
		.bind(job_id.cast_signed())
		.execute(db)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;

	Ok(())
}

/// Record a failed attempt, keeping the job pending for its next run
pub(crate) async fn mark_error(
	db: &SqlitePool,
	job_id: u64,
	output: &str,
	next_at: Option<Timestamp>,
	retry: Option<&str>,
) -> GpResult<()> {
	sqlx::query("UPDATE jobs SET output=?, next_at=?, retry=? WHERE job_id=? AND status='P'")
		.bind(output)
		.bind(next_at.map(|t| t.0))
		.bind(retry)
		.bind(job_id.cast_signed())
		.execute(db)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;

	Ok(())
}

/// Move a job to the dead-letter state; it will not be retried or reloaded
pub(crate) async fn mark_dead_letter(db: &SqlitePool, job_id: u64, output: &str) -> GpResult<()> {
	sqlx::query("UPDATE jobs SET status='X', output=?, next_at=NULL WHERE job_id=? AND status='P'")
		.bind(output)
		.bind(job_id.cast_signed())
		.execute(db)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;

	Ok(())
}

/// List all pending jobs, for restore at startup
pub(crate) async fn list_pending(db: &SqlitePool) -> GpResult<Vec<QueuedJob>> {
	let res = sqlx::query(
		"SELECT job_id, kind, status, input, retry, next_at, output, created_at
		FROM jobs WHERE status='P'",
	)
	.fetch_all(db)
	.await
	.inspect_err(inspect)
	.map_err(|_| Error::DbError)?;

	collect_res(res.iter().map(map_job))
}

/// List dead-lettered jobs, newest first
pub(crate) async fn list_dead_letters(db: &SqlitePool) -> GpResult<Vec<QueuedJob>> {
	let res = sqlx::query(
		"SELECT job_id, kind, status, input, retry, next_at, output, created_at
		FROM jobs WHERE status='X' ORDER BY job_id DESC",
	)
	.fetch_all(db)
	.await
	.inspect_err(inspect)
	.map_err(|_| Error::DbError)?;

	collect_res(res.iter().map(map_job))
}

// vim: ts=4
