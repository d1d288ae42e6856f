use axum::{
	Router,
	routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::prelude::*;
use crate::report_cards;

pub fn init(state: App) -> Router {
	Router::new()
		.route(
			"/report-cards/class/{class_id}/exam/{exam_id}/bulk-email",
			post(report_cards::handler::post_bulk_email),
		)
		.route("/report-cards/email-resend/{log_id}", post(report_cards::handler::post_resend))
		.route("/report-cards/email-logs", get(report_cards::handler::get_logs))
		.route("/report-cards/email-webhook", post(report_cards::webhook::post_webhook))
		.route("/report-cards/dead-letters", get(report_cards::handler::get_dead_letters))
		.layer(TraceLayer::new_for_http())
		.with_state(state)
}

// vim: ts=4
