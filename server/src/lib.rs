//! Gradepost is an asynchronous report-card email delivery service.
//!
//! # Features
//!
//! - Bulk triggers: enqueue one email per eligible recipient of a
//!   class/exam cohort, filtered by notification preferences
//! - Durable job queue with exponential-backoff retry and dead-lettering
//! - Per-recipient delivery log with a monotonic status state machine
//!   (`pending → queued → sent → {delivered | bounced}`)
//! - Webhook reconciliation of provider delivery/bounce callbacks,
//!   idempotent under redelivery
//! - Manual resend of any settled delivery
//!
//! Storage and mail transport are injected behind the `DeliveryAdapter` and
//! `MailTransport` traits; see `basic-server` for a SQLite + SMTP wiring.

#![forbid(unsafe_code)]

pub mod prelude;
pub mod report_cards;
pub mod routes;

use std::sync::Arc;

use crate::prelude::*;
use crate::report_cards::ReportMailJob;
use gradepost_core::Config;
use gradepost_core::queue::{AdapterJobStore, Queue};
use gradepost_email::TemplateEngine;
use gradepost_types::delivery_adapter::DeliveryAdapter;
use gradepost_types::mail_transport::MailTransport;

pub struct GradepostOpts {
	pub config: Config,
	pub delivery_adapter: Arc<dyn DeliveryAdapter>,
	pub mailer: Arc<dyn MailTransport>,
}

/// Build the application state and start the queue. Pending jobs from a
/// previous run are restored from the adapter and rescheduled.
pub fn init(opts: GradepostOpts) -> GpResult<App> {
	let queue = Queue::new(AdapterJobStore::new(opts.delivery_adapter.clone()));
	queue.register::<ReportMailJob>()?;

	let app = AppState::new(
		opts.config,
		opts.delivery_adapter,
		opts.mailer,
		Arc::new(TemplateEngine::new()),
		queue.clone(),
	);
	queue.start(app.clone());

	// Dead-lettered jobs are already persisted by the store; the channel is
	// drained here so exhausted deliveries show up in the logs.
	let dead_letters = queue.dead_letters();
	tokio::spawn(async move {
		while let Ok(dead) = dead_letters.recv_async().await {
			warn!("Job {} ({}) dead-lettered: {}", dead.job_id, dead.kind, dead.error);
		}
	});

	Ok(app)
}

/// Run the HTTP server until shutdown.
pub async fn run(opts: GradepostOpts) -> GpResult<()> {
	let app = init(opts)?;
	let router = routes::init(app.clone());

	let listener = tokio::net::TcpListener::bind(&app.config.listen).await?;
	info!("Listening on {}", app.config.listen);
	axum::serve(listener, router).await?;

	Ok(())
}

// vim: ts=4
