//! Application state shared by the server's feature modules.
//!
//! All collaborators are wired explicitly at startup: the delivery adapter,
//! the mail transport, the template renderer and the job queue. Handlers
//! receive the state as an `Arc` and reach every dependency through it.

use std::sync::Arc;

use crate::config::Config;
use crate::queue::Queue;
use gradepost_types::delivery_adapter::DeliveryAdapter;
use gradepost_types::mail_transport::MailTransport;
use gradepost_types::template::TemplateRenderer;

pub type App = Arc<AppState>;

pub struct AppState {
	pub config: Config,
	pub delivery_adapter: Arc<dyn DeliveryAdapter>,
	pub mailer: Arc<dyn MailTransport>,
	pub renderer: Arc<dyn TemplateRenderer>,
	pub queue: Arc<Queue<App>>,
}

impl AppState {
	pub fn new(
		config: Config,
		delivery_adapter: Arc<dyn DeliveryAdapter>,
		mailer: Arc<dyn MailTransport>,
		renderer: Arc<dyn TemplateRenderer>,
		queue: Arc<Queue<App>>,
	) -> App {
		Arc::new(Self { config, delivery_adapter, mailer, renderer, queue })
	}
}

impl std::fmt::Debug for AppState {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("AppState").field("config", &self.config).finish_non_exhaustive()
	}
}

// vim: ts=4
