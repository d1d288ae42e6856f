//! SQLite-backed delivery adapter for Gradepost
//!
//! Stores delivery logs, durable queue jobs, email templates, the class
//! roster with notification preferences, and org-level settings in a single
//! SQLite database with WAL journaling.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

use async_trait::async_trait;
use sqlx::sqlite::{self, SqlitePool};
use std::path::Path;

use gradepost::delivery_adapter::{
	CreateDeliveryLog, DeliveryAdapter, DeliveryLog, DeliveryLogPatch, EmailTemplate,
	ListLogOptions, QueuedJob, Recipient,
};
use gradepost::prelude::*;

mod job;
mod log;
mod recipient;
mod schema;
mod setting;
mod template;
mod utils;

use utils::inspect;

#[derive(Debug)]
pub struct DeliveryAdapterSqlite {
	db: SqlitePool,
}

impl DeliveryAdapterSqlite {
	pub async fn new(path: impl AsRef<Path>) -> GpResult<Self> {
		let opts = sqlite::SqliteConnectOptions::new()
			.filename(path.as_ref())
			.create_if_missing(true)
			.journal_mode(sqlite::SqliteJournalMode::Wal);
		let db = sqlite::SqlitePoolOptions::new()
			.max_connections(5)
			.connect_with(opts)
			.await
			.inspect_err(|err| inspect(err))
			.or(Err(Error::DbError))?;

		schema::init_db(&db)
			.await
			.inspect_err(|err| inspect(err))
			.or(Err(Error::DbError))?;

		Ok(Self { db })
	}

	/// # Roster administration
	/// Not part of the `DeliveryAdapter` trait; the delivery pipeline only
	/// reads the roster. Used by import tooling and tests.
	pub async fn upsert_student(
		&self,
		student_id: i64,
		class_id: i64,
		name: &str,
		email: &str,
		notify_pref: Option<bool>,
	) -> GpResult<()> {
		sqlx::query(
			"INSERT OR REPLACE INTO students (student_id, class_id, name, email, notify_pref, updated_at)
			VALUES (?, ?, ?, ?, ?, unixepoch())",
		)
		.bind(student_id)
		.bind(class_id)
		.bind(name)
		.bind(email)
		.bind(notify_pref)
		.execute(&self.db)
		.await
		.inspect_err(inspect)
		.or(Err(Error::DbError))?;
		Ok(())
	}

	pub async fn set_notify_override(
		&self,
		student_id: i64,
		exam_id: i64,
		notify: bool,
	) -> GpResult<()> {
		sqlx::query(
			"INSERT OR REPLACE INTO notify_overrides (student_id, exam_id, notify) VALUES (?, ?, ?)",
		)
		.bind(student_id)
		.bind(exam_id)
		.bind(notify)
		.execute(&self.db)
		.await
		.inspect_err(inspect)
		.or(Err(Error::DbError))?;
		Ok(())
	}

	pub async fn upsert_template(
		&self,
		class_id: i64,
		exam_id: i64,
		student_id: Option<i64>,
		subject: &str,
		body: &str,
	) -> GpResult<()> {
		sqlx::query(
			"INSERT INTO email_templates (class_id, exam_id, student_id, subject, body)
			VALUES (?, ?, ?, ?, ?)
			ON CONFLICT (class_id, exam_id, coalesce(student_id, -1))
			DO UPDATE SET subject=excluded.subject, body=excluded.body, updated_at=unixepoch()",
		)
		.bind(class_id)
		.bind(exam_id)
		.bind(student_id)
		.bind(subject)
		.bind(body)
		.execute(&self.db)
		.await
		.inspect_err(inspect)
		.or(Err(Error::DbError))?;
		Ok(())
	}
}

#[async_trait]
impl DeliveryAdapter for DeliveryAdapterSqlite {
	// Delivery logs
	//***************
	async fn create_log(&self, data: &CreateDeliveryLog<'_>) -> GpResult<i64> {
		log::create(&self.db, data).await
	}

	async fn read_log(&self, log_id: i64) -> GpResult<DeliveryLog> {
		log::read(&self.db, log_id).await
	}

	async fn list_logs(&self, opts: &ListLogOptions) -> GpResult<Vec<DeliveryLog>> {
		log::list(&self.db, opts).await
	}

	async fn update_log(
		&self,
		log_id: i64,
		expect: Option<Timestamp>,
		patch: &DeliveryLogPatch,
	) -> GpResult<bool> {
		log::update(&self.db, log_id, expect, patch).await
	}

	async fn find_log_for_webhook(
		&self,
		address: &str,
		message_id: Option<&str>,
	) -> GpResult<Option<DeliveryLog>> {
		log::find_for_webhook(&self.db, address, message_id).await
	}

	// Queue jobs
	//************
	async fn create_job(&self, kind: &'static str, input: &str) -> GpResult<u64> {
		job::create(&self.db, kind, input).await
	}

	async fn job_finished(&self, job_id: u64, output: &str) -> GpResult<()> {
		job::mark_finished(&self.db, job_id, output).await
	}

	async fn job_error(
		&self,
		job_id: u64,
		output: &str,
		next_at: Option<Timestamp>,
		retry: Option<&str>,
	) -> GpResult<()> {
		job::mark_error(&self.db, job_id, output, next_at, retry).await
	}

	async fn job_dead_letter(&self, job_id: u64, output: &str) -> GpResult<()> {
		job::mark_dead_letter(&self.db, job_id, output).await
	}

	async fn load_jobs(&self) -> GpResult<Vec<QueuedJob>> {
		job::list_pending(&self.db).await
	}

	async fn list_dead_letters(&self) -> GpResult<Vec<QueuedJob>> {
		job::list_dead_letters(&self.db).await
	}

	// Templates
	//***********
	async fn find_template(
		&self,
		class_id: i64,
		exam_id: i64,
		student_id: i64,
	) -> GpResult<Option<EmailTemplate>> {
		template::find(&self.db, class_id, exam_id, student_id).await
	}

	// Recipients
	//************
	async fn list_recipients(&self, class_id: i64, exam_id: i64) -> GpResult<Vec<Recipient>> {
		recipient::list(&self.db, class_id, exam_id).await
	}

	// Settings
	//**********
	async fn read_setting(&self, key: &str) -> GpResult<Option<Box<str>>> {
		setting::read(&self.db, key).await
	}

	async fn write_setting(&self, key: &str, value: &str) -> GpResult<()> {
		setting::write(&self.db, key, value).await
	}
}

// vim: ts=4
