//! Email template lookup
//!
//! Most-specific-wins: a per-student override beats the per-(class, exam)
//! template. No row means the built-in default template applies.

use sqlx::{Row, SqlitePool};

use gradepost::delivery_adapter::EmailTemplate;
use gradepost::prelude::*;

use crate::utils::*;

pub(crate) async fn find(
	db: &SqlitePool,
	class_id: i64,
	exam_id: i64,
	student_id: i64,
) -> GpResult<Option<EmailTemplate>> {
	let res = sqlx::query(
		"SELECT subject, body FROM email_templates
		WHERE class_id=? AND exam_id=? AND (student_id=? OR student_id IS NULL)
		ORDER BY student_id IS NULL
		LIMIT 1",
	)
	.bind(class_id)
	.bind(exam_id)
	.bind(student_id)
	.fetch_optional(db)
	.await
	.inspect_err(inspect)
	.map_err(|_| Error::DbError)?;

	match res {
		Some(row) => Ok(Some(EmailTemplate {
			subject: row.try_get("subject").map_err(|_| Error::DbError)?,
			body: row.try_get("body").map_err(|_| Error::DbError)?,
		})),
		None => Ok(None),
	}
}

// vim: ts=4
