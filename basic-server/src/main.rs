use std::{path::Path, sync::Arc};

use gradepost::GradepostOpts;
use gradepost_core::Config;
use gradepost_delivery_adapter_sqlite::DeliveryAdapterSqlite;
use gradepost_email::SmtpMailTransport;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.init();

	let config = Config::from_env()?;

	let delivery_adapter =
		Arc::new(DeliveryAdapterSqlite::new(Path::new(&config.db_dir).join("delivery.db")).await?);
	let mailer = Arc::new(SmtpMailTransport::new(&config.smtp)?);

	gradepost::run(GradepostOpts { config, delivery_adapter, mailer }).await?;
	Ok(())
}

// vim: ts=4
