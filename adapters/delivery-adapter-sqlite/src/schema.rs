//! Database schema initialization and migrations

use sqlx::{Sqlite, SqlitePool, Transaction};

/// Get the current database version from vars table
async fn get_db_version(tx: &mut Transaction<'_, Sqlite>) -> i64 {
	sqlx::query_scalar::<_, String>("SELECT value FROM vars WHERE key = 'db_version'")
		.fetch_optional(&mut **tx)
		.await
		.ok()
		.flatten()
		.and_then(|v| v.parse().ok())
		.unwrap_or(0)
}

/// Set the database version in vars table
async fn set_db_version(tx: &mut Transaction<'_, Sqlite>, version: i64) {
	let _ = sqlx::query("INSERT OR REPLACE INTO vars (key, value) VALUES ('db_version', ?)")
		.bind(version.to_string())
		.execute(&mut **tx)
		.await;
}

// Current schema version - update this when adding new migrations
const CURRENT_DB_VERSION: i64 = 1;

/// Initialize the database schema and run migrations
pub(crate) async fn init_db(db: &SqlitePool) -> Result<(), sqlx::Error> {
	let mut tx = db.begin().await?;

	// Create vars table first (needed for version tracking)
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS vars (
			key text NOT NULL,
			value text NOT NULL,
			created_at INTEGER DEFAULT (unixepoch()),
			updated_at INTEGER DEFAULT (unixepoch()),
			PRIMARY KEY(key)
		)",
	)
	.execute(&mut *tx)
	.await?;

	let version = get_db_version(&mut tx).await;

	// Schema creation - safe to run every time (uses IF NOT EXISTS)

	// Delivery logs
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS delivery_logs (
			log_id integer PRIMARY KEY AUTOINCREMENT,
			student_id integer NOT NULL,
			student_name text NOT NULL,
			email text NOT NULL,
			class_id integer NOT NULL,
			exam_id integer NOT NULL,
			status char(1) NOT NULL,	-- 'P' pending, 'Q' queued, 'S' sent,
										-- 'D' delivered, 'B' bounced, 'F' failed
			error text,
			retry_count integer NOT NULL DEFAULT 0,
			message_id text,
			last_attempt_at INTEGER,
			created_at INTEGER DEFAULT (unixepoch()),
			updated_at INTEGER DEFAULT (unixepoch())
		)",
	)
	.execute(&mut *tx)
	.await?;
	sqlx::query(
		"CREATE INDEX IF NOT EXISTS idx_delivery_logs_class_exam
		ON delivery_logs(class_id, exam_id)",
	)
	.execute(&mut *tx)
	.await?;
	sqlx::query("CREATE INDEX IF NOT EXISTS idx_delivery_logs_email ON delivery_logs(email)")
		.execute(&mut *tx)
		.await?;
	sqlx::query(
		"CREATE INDEX IF NOT EXISTS idx_delivery_logs_message_id
		ON delivery_logs(message_id) WHERE message_id NOT NULL",
	)
	.execute(&mut *tx)
	.await?;

	// Jobs
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS jobs (
			job_id integer PRIMARY KEY AUTOINCREMENT,
			kind text NOT NULL,
			status char(1) NOT NULL DEFAULT 'P',	-- 'P' pending, 'F' finished,
													-- 'X' dead-lettered
			input text NOT NULL,
			retry text,					-- 'count,min,max,times'
			next_at INTEGER,
			output text,
			created_at INTEGER DEFAULT (unixepoch())
		)",
	)
	.execute(&mut *tx)
	.await?;
	sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status)")
		.execute(&mut *tx)
		.await?;

	// Email templates, optionally overridden per student
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS email_templates (
			template_id integer PRIMARY KEY AUTOINCREMENT,
			class_id integer NOT NULL,
			exam_id integer NOT NULL,
			student_id integer,			-- NULL: applies to the whole class
			subject text NOT NULL,
			body text NOT NULL,
			created_at INTEGER DEFAULT (unixepoch()),
			updated_at INTEGER DEFAULT (unixepoch())
		)",
	)
	.execute(&mut *tx)
	.await?;
	sqlx::query(
		"CREATE UNIQUE INDEX IF NOT EXISTS idx_email_templates_scope
		ON email_templates(class_id, exam_id, coalesce(student_id, -1))",
	)
	.execute(&mut *tx)
	.await?;

	// Students
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS students (
			student_id integer PRIMARY KEY,
			class_id integer NOT NULL,
			name text NOT NULL,
			email text NOT NULL,
			notify_pref boolean,		-- NULL: fall back to the org default
			created_at INTEGER DEFAULT (unixepoch()),
			updated_at INTEGER DEFAULT (unixepoch())
		)",
	)
	.execute(&mut *tx)
	.await?;
	sqlx::query("CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id)")
		.execute(&mut *tx)
		.await?;

	// Per-exam notification overrides
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS notify_overrides (
			student_id integer NOT NULL,
			exam_id integer NOT NULL,
			notify boolean NOT NULL,
			created_at INTEGER DEFAULT (unixepoch()),
			PRIMARY KEY(student_id, exam_id)
		)",
	)
	.execute(&mut *tx)
	.await?;

	if version < CURRENT_DB_VERSION {
		set_db_version(&mut tx, CURRENT_DB_VERSION).await;
	}

	tx.commit().await?;

	Ok(())
}

// vim: ts=4
