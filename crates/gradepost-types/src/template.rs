//! Template rendering seam.
//!
//! The worker resolves a stored template (or none, meaning the built-in
//! default) and hands it to a renderer together with the per-recipient
//! variables. Keeping this behind a trait lets tests substitute a renderer
//! without pulling the templating stack into the core crates.

use std::fmt::Debug;

use crate::delivery_adapter::EmailTemplate;
use crate::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedEmail {
	pub subject: String,
	pub text_body: String,
	pub html_body: Option<String>,
}

pub trait TemplateRenderer: Debug + Send + Sync {
	/// Render `template`, falling back to the built-in default when the
	/// store had no template for the recipient.
	fn render_report(
		&self,
		template: Option<&EmailTemplate>,
		vars: &serde_json::Value,
	) -> GpResult<RenderedEmail>;
}

// vim: ts=4
