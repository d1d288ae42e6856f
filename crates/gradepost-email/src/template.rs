//! Report-card template rendering with Handlebars
//!
//! Templates are stored per (class, exam) with optional per-student
//! overrides; resolution happens in the worker, this module only renders.
//! Strict mode is enabled so a stored template referencing an unknown
//! variable fails validation instead of sending a half-rendered email.

use handlebars::Handlebars;

use crate::prelude::*;
use gradepost_types::delivery_adapter::EmailTemplate;
use gradepost_types::template::{RenderedEmail, TemplateRenderer};

const DEFAULT_SUBJECT: &str = "Report card for {{student_name}}";
const DEFAULT_BODY: &str = "\
Dear {{student_name}},

Your report card for exam {{exam_id}} (class {{class_id}}) is now available.

Best regards,
{{school_name}}
";

pub struct TemplateEngine {
	handlebars: Handlebars<'static>,
}

impl std::fmt::Debug for TemplateEngine {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("TemplateEngine").finish_non_exhaustive()
	}
}

impl TemplateEngine {
	pub fn new() -> Self {
		let mut handlebars = Handlebars::new();

		// Strict mode to catch undefined variables
		handlebars.set_strict_mode(true);

		Self { handlebars }
	}

	fn render_part(&self, template: &str, vars: &serde_json::Value) -> GpResult<String> {
		self.handlebars
			.render_template(template, vars)
			.map_err(|e| Error::ValidationError(format!("Failed to render template: {}", e)))
	}
}

impl Default for TemplateEngine {
	fn default() -> Self {
		Self::new()
	}
}

impl TemplateRenderer for TemplateEngine {
	fn render_report(
		&self,
		template: Option<&EmailTemplate>,
		vars: &serde_json::Value,
	) -> GpResult<RenderedEmail> {
		let (subject_tpl, body_tpl) = match template {
			Some(t) => (t.subject.as_ref(), t.body.as_ref()),
			None => {
				debug!("No stored template, using built-in default");
				(DEFAULT_SUBJECT, DEFAULT_BODY)
			}
		};

		Ok(RenderedEmail {
			subject: self.render_part(subject_tpl, vars)?,
			text_body: self.render_part(body_tpl, vars)?,
			html_body: None,
		})
	}
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
	use super::*;

	fn vars() -> serde_json::Value {
		serde_json::json!({
			"student_name": "Alice",
			"class_id": 12,
			"exam_id": 7,
			"school_name": "Northfield High",
		})
	}

	#[test]
	fn test_default_template_renders() {
		let engine = TemplateEngine::new();
		let rendered = engine.render_report(None, &vars()).unwrap();
		assert_eq!(rendered.subject, "Report card for Alice");
		assert!(rendered.text_body.contains("Dear Alice,"));
		assert!(rendered.text_body.contains("exam 7 (class 12)"));
		assert!(rendered.html_body.is_none());
	}

	#[test]
	fn test_stored_template_renders() {
		let engine = TemplateEngine::new();
		let template = EmailTemplate {
			subject: "{{student_name}}: results are in".into(),
			body: "Hi {{student_name}}, see you in class {{class_id}}.".into(),
		};
		let rendered = engine.render_report(Some(&template), &vars()).unwrap();
		assert_eq!(rendered.subject, "Alice: results are in");
		assert_eq!(rendered.text_body, "Hi Alice, see you in class 12.");
	}

	#[test]
	fn test_unknown_variable_fails_in_strict_mode() {
		let engine = TemplateEngine::new();
		let template = EmailTemplate {
			subject: "Results".into(),
			body: "Hello {{nonexistent_variable}}".into(),
		};
		let err = engine.render_report(Some(&template), &vars()).unwrap_err();
		assert!(matches!(err, Error::ValidationError(_)));
	}

	#[test]
	fn test_html_escaping() {
		let engine = TemplateEngine::new();
		let template = EmailTemplate {
			subject: "Results".into(),
			body: "{{student_name}}".into(),
		};
		let mut v = vars();
		v["student_name"] = serde_json::json!("<script>alert('xss')</script>");
		let rendered = engine.render_report(Some(&template), &v).unwrap();
		assert!(rendered.text_body.contains("&lt;script&gt;"));
	}
}

// vim: ts=4
