//! Org-level settings storage

use sqlx::{Row, SqlitePool};

use gradepost::prelude::*;

use crate::utils::*;

/// Read an org setting, None when unset
pub(crate) async fn read(db: &SqlitePool, key: &str) -> GpResult<Option<Box<str>>> {
	let res = sqlx::query("SELECT value FROM vars WHERE key = ?1")
		.bind(key)
		.fetch_optional(db)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;

	match res {
		Some(row) => Ok(Some(row.try_get("value").map_err(|_| Error::DbError)?)),
		None => Ok(None),
	}
}

/// Create or update an org setting
pub(crate) async fn write(db: &SqlitePool, key: &str, value: &str) -> GpResult<()> {
	sqlx::query(
		"INSERT OR REPLACE INTO vars (key, value, updated_at) VALUES (?1, ?2, unixepoch())",
	)
	.bind(key)
	.bind(value)
	.execute(db)
	.await
	.inspect_err(inspect)
	.or(Err(Error::DbError))?;
	Ok(())
}

// vim: ts=4
