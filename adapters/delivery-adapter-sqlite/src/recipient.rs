//! Recipient lookup for bulk sends
//!
//! Joins the class roster with per-(student, exam) notification overrides so
//! the caller can run the notification gate without further queries.

use sqlx::{Row, SqlitePool};

use gradepost::delivery_adapter::Recipient;
use gradepost::prelude::*;

use crate::utils::*;

pub(crate) async fn list(db: &SqlitePool, class_id: i64, exam_id: i64) -> GpResult<Vec<Recipient>> {
	let res = sqlx::query(
		"SELECT s.student_id, s.name, s.email, s.notify_pref, o.notify as item_pref
		FROM students s
		LEFT JOIN notify_overrides o ON o.student_id=s.student_id AND o.exam_id=?
		WHERE s.class_id=?
		ORDER BY s.student_id",
	)
	.bind(exam_id)
	.bind(class_id)
	.fetch_all(db)
	.await
	.inspect_err(inspect)
	.map_err(|_| Error::DbError)?;

	collect_res(res.iter().map(|row| {
		Ok(Recipient {
			student_id: row.try_get("student_id")?,
			name: row.try_get("name")?,
			email: row.try_get("email")?,
			user_pref: row.try_get("notify_pref")?,
			item_pref: row.try_get("item_pref")?,
		})
	}))
}

// vim: ts=4
